//! extends / include 解析
//!
//! Includes are spliced first, per file, so that blocks and mixins they
//! bring in take part in the merge. The `extends` chain is then followed up
//! to its base, and each more derived file applies its top-level named
//! blocks (replace, append or prepend) to the tree built so far, from the
//! file nearest the base down to the entry template. Every file read is
//! recorded as a [`Dependency`] so cached results can be checked for
//! staleness.

use crate::error::{InheritanceError, TemplateError};
use crate::loader::{TemplateLoader, extension_of, resolve_path};
use crate::tpl::ast::{Block, BlockMode, Mixin, NamedBlock, Node};
use crate::tpl::parser::parse_template;
use crate::tpl::walker::{Action, Visitor, WalkState, walk_block};

/// 一个被读取过的文件及其读取时的修改标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub path: String,
    pub modified: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub ast: Block,
    pub dependencies: Vec<Dependency>,
}

/// Loads, parses and resolves `path` through `loader`.
pub fn resolve_file(
    loader: &dyn TemplateLoader,
    path: &str,
    extension: &str,
) -> Result<Resolved, TemplateError> {
    let mut resolver = Resolver::new(loader, extension);
    let ast = resolver.load(path)?;
    let ast = resolver.resolve(path, ast)?;
    Ok(Resolved {
        ast,
        dependencies: resolver.into_dependencies(),
    })
}

/// Resolves an already parsed template that lives at `path`.
pub fn resolve(
    path: &str,
    ast: Block,
    loader: &dyn TemplateLoader,
    extension: &str,
) -> Result<Resolved, TemplateError> {
    let mut resolver = Resolver::new(loader, extension);
    resolver.record(path);
    let ast = resolver.resolve(path, ast)?;
    Ok(Resolved {
        ast,
        dependencies: resolver.into_dependencies(),
    })
}

pub struct Resolver<'l> {
    loader: &'l dyn TemplateLoader,
    extension: String,
    dependencies: Vec<Dependency>,
}

impl<'l> Resolver<'l> {
    pub fn new(loader: &'l dyn TemplateLoader, extension: &str) -> Self {
        Self {
            loader,
            extension: extension.to_string(),
            dependencies: Vec::new(),
        }
    }

    fn record(&mut self, path: &str) {
        if self.dependencies.iter().any(|d| d.path == path) {
            return;
        }
        self.dependencies.push(Dependency {
            path: path.to_string(),
            modified: self.loader.modified(path),
        });
    }

    fn read(&mut self, path: &str) -> Result<String, TemplateError> {
        // 先记录修改标记再读取：并发修改时宁可多一次重新加载
        self.record(path);
        Ok(self.loader.load(path)?)
    }

    /// 读取并解析模板，解析错误附带文件路径
    pub fn load(&mut self, path: &str) -> Result<Block, TemplateError> {
        let source = self.read(path)?;
        parse_template(&source).map_err(|e| e.in_file(path))
    }

    fn is_template(&self, path: &str) -> bool {
        extension_of(path) == Some(self.extension.as_str())
    }

    /// Every file read so far, including those read by a failed resolution.
    pub fn into_dependencies(self) -> Vec<Dependency> {
        self.dependencies
    }

    pub fn resolve(&mut self, path: &str, ast: Block) -> Result<Block, TemplateError> {
        let ast = self.resolve_includes(path, ast, &mut vec![path.to_string()])?;

        let mut chain = vec![(path.to_string(), ast)];
        loop {
            let Some((current, ast)) = chain.last() else {
                break;
            };
            let Some((target, line)) = extends_target(ast) else {
                break;
            };
            let parent = resolve_path(current, &target, &self.extension)
                .map_err(|e| TemplateError::from(e).in_file(current))?;
            tracing::debug!("{} (line {}) extends {}", current, line, parent);
            if chain.iter().any(|(p, _)| *p == parent) {
                let mut paths: Vec<String> = chain.iter().map(|(p, _)| p.clone()).collect();
                paths.push(parent);
                return Err(InheritanceError::CyclicExtends { chain: paths }.into());
            }
            let parent_ast = self.load(&parent)?;
            let parent_ast = self.resolve_includes(&parent, parent_ast, &mut vec![parent.clone()])?;
            chain.push((parent, parent_ast));
        }

        let Some((base_path, mut merged)) = chain.pop() else {
            return Err(InheritanceError::FileNotFound {
                path: path.to_string(),
            }
            .into());
        };
        let mut parent_path = base_path;
        while let Some((child_path, child)) = chain.pop() {
            merged = merge(&parent_path, merged, &child_path, child)?;
            parent_path = child_path;
        }

        walk_block(merged, &mut Flatten)
    }

    fn resolve_includes(
        &mut self,
        path: &str,
        ast: Block,
        stack: &mut Vec<String>,
    ) -> Result<Block, TemplateError> {
        let mut visitor = IncludeResolver {
            resolver: self,
            path: path.to_string(),
            stack,
        };
        walk_block(ast, &mut visitor)
    }
}

fn extends_target(ast: &Block) -> Option<(String, usize)> {
    ast.nodes.iter().find_map(|n| match n {
        Node::Extends(e) => Some((e.file.path.clone(), e.line)),
        _ => None,
    })
}

struct IncludeResolver<'a, 'l> {
    resolver: &'a mut Resolver<'l>,
    path: String,
    stack: &'a mut Vec<String>,
}

impl IncludeResolver<'_, '_> {
    fn target(&self, reference: &str) -> Result<String, TemplateError> {
        resolve_path(&self.path, reference, &self.resolver.extension)
            .map_err(|e| TemplateError::from(e).in_file(&self.path))
    }

    fn raw_text(&mut self, target: &str, line: usize) -> Result<Node, TemplateError> {
        let text = self.resolver.read(target)?;
        Ok(Node::text(text, line))
    }
}

impl Visitor for IncludeResolver<'_, '_> {
    type Error = TemplateError;

    fn before(&mut self, node: &mut Node, state: &WalkState) -> Result<Action, TemplateError> {
        match node {
            Node::Extends(e) if state.depth() > 1 => Err(InheritanceError::ExtendsNotFirst {
                path: self.path.clone(),
                line: e.line,
            }
            .into()),
            Node::RawInclude(inc) => {
                let target = self.target(&inc.file.path)?;
                let filters: Vec<&str> = inc
                    .filters
                    .iter()
                    .filter_map(|f| match f {
                        Node::IncludeFilter(f) => Some(f.name.as_str()),
                        _ => None,
                    })
                    .collect();
                tracing::warn!(
                    "{}: filters [{}] are not supported; including {} as plain text",
                    self.path,
                    filters.join(", "),
                    target
                );
                let text = self.raw_text(&target, inc.line)?;
                Ok(Action::Replace(text))
            }
            Node::Include(inc) => {
                let target = self.target(&inc.file.path)?;
                if !self.resolver.is_template(&target) {
                    let text = self.raw_text(&target, inc.line)?;
                    return Ok(Action::Replace(text));
                }
                if self.stack.contains(&target) {
                    let mut chain = self.stack.clone();
                    chain.push(target);
                    return Err(InheritanceError::CyclicInclude { chain }.into());
                }

                // include 自身的缩进内容属于当前文件，先在当前上下文中解析
                let body = walk_block(std::mem::take(&mut inc.block), self)?;
                let line = inc.line;

                let included = self.resolver.load(&target)?;
                if extends_target(&included).is_some() {
                    return Err(InheritanceError::ExtendsInInclude { path: target }.into());
                }
                self.stack.push(target.clone());
                let resolved = self.resolver.resolve_includes(&target, included, self.stack);
                self.stack.pop();
                let mut content = resolved?;

                if !body.is_empty() {
                    let mut filler = YieldFiller {
                        content: Some(body),
                    };
                    content = walk_block(content, &mut filler)?;
                    if let Some(rest) = filler.content {
                        content.nodes.extend(rest.nodes);
                    }
                }
                *node = Node::Block(Block::with_nodes(content.nodes, line));
                Ok(Action::Skip)
            }
            _ => Ok(Action::Keep),
        }
    }
}

/// 将 include 的缩进内容放到被包含文件的第一个 `yield` 处
struct YieldFiller {
    content: Option<Block>,
}

impl Visitor for YieldFiller {
    type Error = TemplateError;

    fn before(&mut self, node: &mut Node, _state: &WalkState) -> Result<Action, TemplateError> {
        match node {
            Node::YieldBlock { line } => match self.content.take() {
                Some(content) => {
                    *node = Node::Block(Block::with_nodes(content.nodes, *line));
                    Ok(Action::Skip)
                }
                None => Ok(Action::Remove),
            },
            _ => Ok(Action::Keep),
        }
    }
}

/// Top-level block overrides and mixin definitions of an extending file.
fn collect_overrides(nodes: Vec<Node>, blocks: &mut Vec<NamedBlock>, mixins: &mut Vec<Mixin>) {
    for node in nodes {
        match node {
            Node::NamedBlock(b) => blocks.push(b),
            Node::Mixin(m) if !m.call => mixins.push(m),
            // 来自 include 的内容
            Node::Block(b) => collect_overrides(b.nodes, blocks, mixins),
            _ => {}
        }
    }
}

fn merge(
    parent_path: &str,
    parent: Block,
    child_path: &str,
    child: Block,
) -> Result<Block, TemplateError> {
    let mut overrides = Vec::new();
    let mut mixins = Vec::new();
    collect_overrides(child.nodes, &mut overrides, &mut mixins);

    let mut merger = BlockMerger {
        applied: vec![false; overrides.len()],
        overrides,
    };
    let mut merged = walk_block(parent, &mut merger)?;

    for (block, applied) in merger.overrides.iter().zip(&merger.applied) {
        if !applied {
            tracing::warn!(
                "{}: block `{}` (line {}) has no counterpart in {}",
                child_path,
                block.name,
                block.line,
                parent_path
            );
        }
    }

    if !mixins.is_empty() {
        let mut nodes: Vec<Node> = mixins.into_iter().map(Node::Mixin).collect();
        nodes.append(&mut merged.nodes);
        merged.nodes = nodes;
    }
    Ok(merged)
}

struct BlockMerger {
    overrides: Vec<NamedBlock>,
    applied: Vec<bool>,
}

impl Visitor for BlockMerger {
    type Error = TemplateError;

    fn before(&mut self, node: &mut Node, _state: &WalkState) -> Result<Action, TemplateError> {
        let Node::NamedBlock(target) = node else {
            return Ok(Action::Keep);
        };
        for (i, block) in self.overrides.iter().enumerate() {
            if self.applied[i] || block.name != target.name {
                continue;
            }
            self.applied[i] = true;
            let content = block.nodes.clone();
            match block.mode {
                BlockMode::Replace => target.nodes = content,
                BlockMode::Append => target.nodes.extend(content),
                BlockMode::Prepend => {
                    target.nodes.splice(0..0, content);
                }
            }
        }
        Ok(Action::Keep)
    }
}

/// 合并完成后，命名块只剩普通内容
struct Flatten;

impl Visitor for Flatten {
    type Error = TemplateError;

    fn before(&mut self, node: &mut Node, _state: &WalkState) -> Result<Action, TemplateError> {
        match node {
            Node::NamedBlock(b) => {
                let nodes = std::mem::take(&mut b.nodes);
                Ok(Action::Replace(Node::Block(Block::with_nodes(nodes, b.line))))
            }
            Node::Extends(_) => Ok(Action::Remove),
            _ => Ok(Action::Keep),
        }
    }
}
