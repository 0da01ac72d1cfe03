//! 预编译：把语法树翻译成 Rust 渲染函数
//!
//! The generated function has the signature
//! `pub fn name(ctx: &::pugview::Value, out: &mut String)` and never fails.
//! Markup that does not depend on `ctx` is folded into string literals at
//! compile time; everything else calls the helpers in
//! [`crate::tpl::runtime`], so compiled and interpreted output agree.
//! Only a subset of the language is accepted: tags, text, buffered code,
//! conditionals, comments and doctypes. Loops, `case`, mixins, includes
//! and inheritance fail with [`CompileError::UnsupportedConstruct`].

use crate::error::{CompileError, TemplateError};
use crate::tpl::ast::*;
use crate::tpl::expr::{BinaryOp, Builtin, Expr, eval, parse_expression};
use crate::tpl::parser::{parse_template, string_literal};
use crate::tpl::render_context::Context;
use crate::tpl::runtime::{self, Attr};
use crate::value::Value;
use proc_macro2::{Ident, Span, TokenStream};
use quote::quote;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    /// doctype assumed before any `doctype` line is seen
    pub doctype: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub name: String,
    pub tokens: TokenStream,
}

impl CompiledTemplate {
    pub fn to_source(&self) -> String {
        self.tokens.to_string()
    }
}

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
    "type", "unsafe", "use", "where", "while", "abstract", "become", "box", "do", "final", "gen",
    "macro", "override", "priv", "try", "typeof", "unsized", "virtual", "yield", "_",
];

fn valid_fn_name(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    head_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RUST_KEYWORDS.contains(&name)
}

/// 解析源码并编译
pub fn compile_source(
    fn_name: &str,
    source: &str,
    options: &CompileOptions,
) -> Result<CompiledTemplate, TemplateError> {
    let ast = parse_template(source)?;
    Ok(compile(fn_name, &ast, options)?)
}

pub fn compile(
    fn_name: &str,
    block: &Block,
    options: &CompileOptions,
) -> Result<CompiledTemplate, CompileError> {
    if !valid_fn_name(fn_name) {
        return Err(CompileError::InvalidName(fn_name.to_string()));
    }
    let doctype = options.doctype.as_deref();
    let mut compiler = Compiler {
        stmts: Vec::new(),
        markup: String::new(),
        terse: doctype.is_some_and(runtime::is_terse_doctype),
        xml: doctype == Some("xml"),
    };
    compiler.nodes(&block.nodes)?;
    compiler.flush();

    let name = Ident::new(fn_name, Span::call_site());
    let stmts = compiler.stmts;
    let tokens = quote! {
        #[allow(unused_variables, clippy::all)]
        pub fn #name(ctx: &::pugview::Value, out: &mut ::std::string::String) {
            #(#stmts)*
        }
    };
    Ok(CompiledTemplate {
        name: fn_name.to_string(),
        tokens,
    })
}

struct Compiler {
    stmts: Vec<TokenStream>,
    /// 待输出的静态标记
    markup: String,
    terse: bool,
    xml: bool,
}

fn unsupported(construct: &'static str, line: usize) -> CompileError {
    CompileError::UnsupportedConstruct { construct, line }
}

impl Compiler {
    fn flush(&mut self) {
        if !self.markup.is_empty() {
            let markup = std::mem::take(&mut self.markup);
            self.stmts.push(quote! { out.push_str(#markup); });
        }
    }

    fn emit(&mut self, stmt: TokenStream) {
        self.flush();
        self.stmts.push(stmt);
    }

    /// 编译子块，返回其语句序列
    fn branch(&mut self, nodes: &[Node]) -> Result<TokenStream, CompileError> {
        self.flush();
        let outer = std::mem::take(&mut self.stmts);
        let compiled = self.nodes(nodes);
        self.flush();
        let inner = std::mem::replace(&mut self.stmts, outer);
        compiled?;
        Ok(quote! { #(#inner)* })
    }

    fn nodes(&mut self, nodes: &[Node]) -> Result<(), CompileError> {
        for node in nodes {
            self.node(node)?;
        }
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<(), CompileError> {
        match node {
            Node::Block(b) => self.nodes(&b.nodes),
            Node::NamedBlock(b) => self.nodes(&b.nodes),
            Node::Tag(t) => self.tag(t),
            Node::Text(t) => {
                self.markup.push_str(&t.val);
                Ok(())
            }
            Node::Code(c) if c.buffer => {
                let expr = expression(&c.val, c.line)?;
                match constant(&expr) {
                    Some(value) => runtime::push_value(&mut self.markup, &value, c.escape),
                    None => {
                        let value = value_tokens(&expr);
                        let escape = c.escape;
                        self.emit(quote! {
                            ::pugview::tpl::runtime::push_value(out, &#value, #escape);
                        });
                    }
                }
                Ok(())
            }
            Node::Code(c) => Err(unsupported("unbuffered code", c.line)),
            Node::Conditional(c) => {
                let test = expression(&c.test, c.line)?;
                if let Some(value) = constant(&test) {
                    return if value.is_truthy() {
                        self.nodes(&c.consequent.nodes)
                    } else if let Some(alt) = &c.alternate {
                        self.nodes(&alt.nodes)
                    } else {
                        Ok(())
                    };
                }
                let test = value_tokens(&test);
                let consequent = self.branch(&c.consequent.nodes)?;
                let stmt = match &c.alternate {
                    Some(alt) => {
                        let alternate = self.branch(&alt.nodes)?;
                        quote! {
                            if ::pugview::tpl::runtime::truthy(&#test) { #consequent } else { #alternate }
                        }
                    }
                    None => quote! {
                        if ::pugview::tpl::runtime::truthy(&#test) { #consequent }
                    },
                };
                self.emit(stmt);
                Ok(())
            }
            Node::Comment(c) => {
                if c.buffer {
                    self.markup.push_str("<!--");
                    self.markup.push_str(&c.val);
                    self.markup.push_str("-->");
                }
                Ok(())
            }
            Node::BlockComment(c) => {
                if c.buffer {
                    self.markup.push_str("<!--");
                    self.markup.push_str(&c.val);
                    self.nodes(&c.block.nodes)?;
                    self.markup.push_str("-->");
                }
                Ok(())
            }
            Node::Doctype(d) => {
                self.terse = runtime::is_terse_doctype(&d.val);
                self.xml = d.val.trim() == "xml";
                self.markup.push_str(&runtime::doctype_markup(&d.val));
                Ok(())
            }
            Node::IncludeFilter(_) | Node::TypeHint(_) => Ok(()),
            Node::InterpolatedTag(t) => Err(unsupported("interpolated tag", t.line)),
            Node::Each(e) => Err(unsupported("each", e.line)),
            Node::EachOf(e) => Err(unsupported("each", e.line)),
            Node::While(w) => Err(unsupported("while", w.line)),
            Node::Case(c) => Err(unsupported("case", c.line)),
            Node::When(w) => Err(unsupported("when", w.line)),
            Node::Mixin(m) => Err(unsupported("mixin", m.line)),
            Node::MixinBlock { line } => Err(unsupported("block", *line)),
            Node::MixinCall(m) => Err(unsupported("mixin", m.line)),
            Node::CallerBlock(b) => Err(unsupported("block", b.line)),
            Node::YieldBlock { line } => Err(unsupported("yield", *line)),
            Node::Include(i) => Err(unsupported("include", i.line)),
            Node::RawInclude(i) => Err(unsupported("include", i.line)),
            Node::Extends(e) => Err(unsupported("extends", e.line)),
        }
    }

    fn tag(&mut self, tag: &Tag) -> Result<(), CompileError> {
        let mut parsed = Vec::with_capacity(tag.attrs.len());
        for attr in &tag.attrs {
            parsed.push((attr, expression(&attr.val, tag.line)?));
        }
        let mut spreads = Vec::with_capacity(tag.attribute_blocks.len());
        for src in &tag.attribute_blocks {
            spreads.push(expression(src, tag.line)?);
        }

        self.markup.push('<');
        self.markup.push_str(&tag.name);

        let all_constant = spreads.is_empty() && parsed.iter().all(|(_, e)| constant(e).is_some());
        if all_constant {
            let attrs: Vec<Attr> = parsed
                .iter()
                .filter_map(|(attr, e)| {
                    let value = constant(e)?;
                    let is_static = string_literal(&attr.val).is_some();
                    Some(Attr::new(attr.name.clone(), value, attr.escape, is_static))
                })
                .collect();
            runtime::push_attrs(&mut self.markup, &attrs, &[], self.terse);
        } else {
            let attrs = parsed.iter().map(|(attr, e)| {
                let name = &attr.name;
                let value = value_tokens(e);
                let escape = attr.escape;
                let is_static = string_literal(&attr.val).is_some();
                quote! { ::pugview::tpl::runtime::Attr::new(#name, #value, #escape, #is_static) }
            });
            let spreads = spreads.iter().map(value_tokens);
            let terse = self.terse;
            self.emit(quote! {
                {
                    let attrs: ::std::vec::Vec<::pugview::tpl::runtime::Attr> = vec![#(#attrs),*];
                    let spreads: ::std::vec::Vec<::pugview::Value> = vec![#(#spreads),*];
                    ::pugview::tpl::runtime::push_attrs(out, &attrs, &spreads, #terse);
                }
            });
        }

        if tag.self_closing {
            self.markup.push_str("/>");
            return Ok(());
        }
        if runtime::is_void(&tag.name) {
            self.markup
                .push_str(if self.terse && !self.xml { ">" } else { "/>" });
            return Ok(());
        }
        self.markup.push('>');
        self.nodes(&tag.block.nodes)?;
        self.markup.push_str("</");
        self.markup.push_str(&tag.name);
        self.markup.push('>');
        Ok(())
    }
}

fn expression(src: &str, line: usize) -> Result<Expr, CompileError> {
    parse_expression(src).map_err(|source| CompileError::UnsupportedExpression { line, source })
}

fn is_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) => true,
        Expr::Ident(_) => false,
        Expr::Array(items) => items.iter().all(is_constant),
        Expr::Object(entries) => entries.iter().all(|(_, e)| is_constant(e)),
        Expr::Member(obj, _) => is_constant(obj),
        Expr::Index(obj, key) => is_constant(obj) && is_constant(key),
        Expr::Method { receiver, args, .. } => is_constant(receiver) && args.iter().all(is_constant),
        Expr::Builtin(_, args) => args.iter().all(is_constant),
        Expr::Not(e) | Expr::Neg(e) => is_constant(e),
        Expr::Binary(_, a, b) | Expr::And(a, b) | Expr::Or(a, b) => is_constant(a) && is_constant(b),
        Expr::Ternary(c, a, b) => is_constant(c) && is_constant(a) && is_constant(b),
    }
}

/// 不依赖上下文的表达式在编译期求值
fn constant(expr: &Expr) -> Option<Value> {
    if !is_constant(expr) {
        return None;
    }
    let empty = Value::Null;
    eval(expr, &Context::new(&empty)).ok()
}

fn literal_tokens(value: &Value) -> TokenStream {
    match value {
        Value::Null => quote! { ::pugview::Value::Null },
        Value::Bool(b) => quote! { ::pugview::Value::Bool(#b) },
        Value::Int(i) => quote! { ::pugview::Value::Int(#i) },
        Value::Float(f) => {
            let bits = f.to_bits();
            quote! { ::pugview::Value::Float(f64::from_bits(#bits)) }
        }
        Value::Str(s) => quote! { ::pugview::Value::Str(::std::string::String::from(#s)) },
        Value::List(items) => {
            let items = items.iter().map(literal_tokens);
            quote! { ::pugview::Value::List(vec![#(#items),*]) }
        }
        Value::Map(entries) => {
            let entries = entries.iter().map(|(k, v)| {
                let v = literal_tokens(v);
                quote! { (#k, #v) }
            });
            quote! {
                <::pugview::Value as ::core::iter::FromIterator<(&str, ::pugview::Value)>>::from_iter([#(#entries),*])
            }
        }
    }
}

fn binary_op(op: BinaryOp) -> TokenStream {
    match op {
        BinaryOp::Eq => quote! { Eq },
        BinaryOp::Ne => quote! { Ne },
        BinaryOp::StrictEq => quote! { StrictEq },
        BinaryOp::StrictNe => quote! { StrictNe },
        BinaryOp::Lt => quote! { Lt },
        BinaryOp::Le => quote! { Le },
        BinaryOp::Gt => quote! { Gt },
        BinaryOp::Ge => quote! { Ge },
        BinaryOp::Add => quote! { Add },
    }
}

/// 生成求值为 `::pugview::Value` 的 Rust 表达式
fn value_tokens(expr: &Expr) -> TokenStream {
    if let Some(value) = constant(expr) {
        return literal_tokens(&value);
    }
    match expr {
        Expr::Literal(v) => literal_tokens(v),
        Expr::Ident(name) => quote! { ::pugview::tpl::runtime::lookup(ctx, #name) },
        Expr::Array(items) => {
            let items = items.iter().map(value_tokens);
            quote! { ::pugview::Value::List(vec![#(#items),*]) }
        }
        Expr::Object(entries) => {
            let entries = entries.iter().map(|(k, e)| {
                let v = value_tokens(e);
                quote! { (#k, #v) }
            });
            quote! {
                <::pugview::Value as ::core::iter::FromIterator<(&str, ::pugview::Value)>>::from_iter([#(#entries),*])
            }
        }
        Expr::Member(obj, name) => {
            let obj = value_tokens(obj);
            quote! { ::pugview::tpl::runtime::member(&#obj, #name) }
        }
        Expr::Index(obj, key) => {
            let obj = value_tokens(obj);
            let key = value_tokens(key);
            quote! { ::pugview::tpl::runtime::index(&#obj, &#key) }
        }
        Expr::Method {
            receiver,
            name,
            args,
        } => {
            let receiver = value_tokens(receiver);
            let args = args.iter().map(value_tokens);
            quote! {
                ::pugview::tpl::runtime::call_method(&#receiver, #name, &[#(#args),*])
                    .unwrap_or(::pugview::Value::Null)
            }
        }
        Expr::Builtin(func, args) => {
            let arg = args
                .first()
                .map(value_tokens)
                .unwrap_or_else(|| quote! { ::pugview::Value::Null });
            match func {
                Builtin::JsonStringify => quote! { ::pugview::tpl::runtime::json_stringify(&#arg) },
                Builtin::String => quote! { ::pugview::tpl::runtime::string(&#arg) },
            }
        }
        Expr::Not(e) => {
            let e = value_tokens(e);
            quote! { ::pugview::tpl::runtime::not(&#e) }
        }
        Expr::Neg(e) => {
            let e = value_tokens(e);
            quote! { ::pugview::tpl::runtime::negate(&#e) }
        }
        Expr::Binary(op, a, b) => {
            let op = binary_op(*op);
            let a = value_tokens(a);
            let b = value_tokens(b);
            quote! { ::pugview::tpl::expr::BinaryOp::#op.apply(&#a, &#b) }
        }
        Expr::And(a, b) => {
            let a = value_tokens(a);
            let b = value_tokens(b);
            quote! {
                {
                    let left = #a;
                    if ::pugview::tpl::runtime::truthy(&left) { #b } else { left }
                }
            }
        }
        Expr::Or(a, b) => {
            let a = value_tokens(a);
            let b = value_tokens(b);
            quote! {
                {
                    let left = #a;
                    if ::pugview::tpl::runtime::truthy(&left) { left } else { #b }
                }
            }
        }
        Expr::Ternary(c, a, b) => {
            let c = value_tokens(c);
            let a = value_tokens(a);
            let b = value_tokens(b);
            quote! {
                if ::pugview::tpl::runtime::truthy(&#c) { #a } else { #b }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(src: &str) -> String {
        compile_source("render_page", src, &CompileOptions::default())
            .unwrap()
            .to_source()
    }

    fn error(src: &str) -> CompileError {
        match compile_source("render_page", src, &CompileOptions::default()) {
            Err(TemplateError::Compile(e)) => e,
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_static_markup_is_folded() {
        let code = source("div.a(title=\"x\")\n  p Hello\n  br");
        assert!(code.contains("pub fn render_page"));
        assert!(code.contains(r#""<div class=\"a\" title=\"x\"><p>Hello</p><br/></div>""#));
        assert_eq!(code.matches("push_str").count(), 1);
    }

    #[test]
    fn test_dynamic_parts_call_runtime() {
        let code = source("p= user.name\nif admin\n  b admin\nelse\n  i guest");
        assert!(code.contains("runtime :: member"));
        assert!(code.contains("runtime :: lookup (ctx , \"user\")"));
        assert!(code.contains("runtime :: truthy"));
        assert!(code.contains("\"<b>admin</b>\""));
        assert!(code.contains("\"<i>guest</i>\""));
    }

    #[test]
    fn test_constant_condition_is_resolved() {
        let code = source("if 1 == 1\n  p yes\nelse\n  p no");
        assert!(code.contains("\"<p>yes</p>\""));
        assert!(!code.contains("<p>no</p>"));
    }

    #[test]
    fn test_dynamic_attributes() {
        let code = source("a.btn(href=url class={active: on})");
        assert!(code.contains("push_attrs"));
        assert!(code.contains("Attr :: new (\"class\""));
    }

    #[test]
    fn test_unsupported_constructs() {
        assert_eq!(
            error("each x in xs\n  p= x"),
            CompileError::UnsupportedConstruct {
                construct: "each",
                line: 1
            }
        );
        assert_eq!(
            error("p\n  include foo"),
            CompileError::UnsupportedConstruct {
                construct: "include",
                line: 2
            }
        );
        assert!(matches!(
            error("mixin a\n  p"),
            CompileError::UnsupportedConstruct {
                construct: "mixin",
                ..
            }
        ));
        assert!(matches!(
            error("extends base"),
            CompileError::UnsupportedConstruct {
                construct: "extends",
                ..
            }
        ));
        assert!(matches!(
            error("p= a * b"),
            CompileError::UnsupportedExpression { line: 1, .. }
        ));
        assert!(matches!(
            error("- x = 1"),
            CompileError::UnsupportedConstruct {
                construct: "unbuffered code",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_function_name() {
        let ast = parse_template("p").unwrap();
        for name in ["", "1abc", "fn", "a-b"] {
            assert_eq!(
                compile(name, &ast, &CompileOptions::default()).unwrap_err(),
                CompileError::InvalidName(name.to_string())
            );
        }
    }
}
