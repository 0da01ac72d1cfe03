//! 模板语言：词法、语法、遍历、展开、渲染与预编译

pub mod ast;
pub mod cache;
pub mod compiler;
pub mod expr;
pub mod inherit;
pub mod lexer;
pub mod mixin;
pub mod parser;
pub mod render;
pub mod render_context;
pub mod runtime;
pub mod walker;
