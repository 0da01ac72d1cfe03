//! 语法树遍历
//!
//! [`walk`] visits every node depth first, calling [`Visitor::before`] on the
//! way down and [`Visitor::after`] on the way up. Either hook may replace or
//! remove the current node. Nodes sitting in a sequence (the children of a
//! block) may be replaced by any number of nodes; a node occupying a single
//! slot (a tag body, a branch of a conditional, the root) must stay exactly
//! one node, otherwise the walk fails with
//! [`WalkError::ArrayReplaceNotAllowed`].

use crate::error::WalkError;
use crate::tpl::ast::{Block, Node, NodeKind};

/// What to do with the node just visited.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Keep,
    /// Keep the node but do not descend into it (and skip `after`).
    Skip,
    Replace(Node),
    ReplaceMany(Vec<Node>),
    Remove,
}

/// 祖先节点类型栈，最近的父节点在末尾
#[derive(Debug, Default)]
pub struct WalkState {
    parents: Vec<NodeKind>,
}

impl WalkState {
    /// `parent(0)` is the direct parent.
    pub fn parent(&self, n: usize) -> Option<NodeKind> {
        self.parents.iter().rev().nth(n).copied()
    }

    pub fn depth(&self) -> usize {
        self.parents.len()
    }

    pub fn inside(&self, kind: NodeKind) -> bool {
        self.parents.contains(&kind)
    }
}

pub trait Visitor {
    type Error: From<WalkError>;

    fn before(&mut self, _node: &mut Node, _state: &WalkState) -> Result<Action, Self::Error> {
        Ok(Action::Keep)
    }

    fn after(&mut self, _node: &mut Node, _state: &WalkState) -> Result<Action, Self::Error> {
        Ok(Action::Keep)
    }
}

/// Walks a single root node; the root must not be removed or multiplied.
pub fn walk<V: Visitor>(node: Node, visitor: &mut V) -> Result<Node, V::Error> {
    let kind = node.kind();
    let mut state = WalkState::default();
    let mut out = visit(node, visitor, &mut state)?;
    if out.len() != 1 {
        return Err(WalkError::ArrayReplaceNotAllowed { kind: kind.name() }.into());
    }
    Ok(out.remove(0))
}

pub fn walk_block<V: Visitor>(block: Block, visitor: &mut V) -> Result<Block, V::Error> {
    let line = block.line;
    let node = walk(Node::Block(block), visitor)?;
    Ok(into_block(node, line))
}

fn into_block(node: Node, line: usize) -> Block {
    match node {
        Node::Block(b) => b,
        other => Block::with_nodes(vec![other], line),
    }
}

fn visit<V: Visitor>(
    mut node: Node,
    visitor: &mut V,
    state: &mut WalkState,
) -> Result<Vec<Node>, V::Error> {
    match visitor.before(&mut node, state)? {
        Action::Keep => {}
        Action::Skip => return Ok(vec![node]),
        Action::Replace(replacement) => node = replacement,
        Action::ReplaceMany(nodes) => {
            let mut out = Vec::with_capacity(nodes.len());
            for n in nodes {
                out.extend(visit(n, visitor, state)?);
            }
            return Ok(out);
        }
        Action::Remove => return Ok(Vec::new()),
    }

    state.parents.push(node.kind());
    let walked = walk_children(&mut node, visitor, state);
    state.parents.pop();
    walked?;

    Ok(match visitor.after(&mut node, state)? {
        Action::Keep | Action::Skip => vec![node],
        Action::Replace(replacement) => vec![replacement],
        Action::ReplaceMany(nodes) => nodes,
        Action::Remove => Vec::new(),
    })
}

fn walk_sequence<V: Visitor>(
    nodes: &mut Vec<Node>,
    visitor: &mut V,
    state: &mut WalkState,
) -> Result<(), V::Error> {
    let taken = std::mem::take(nodes);
    let mut out = Vec::with_capacity(taken.len());
    for node in taken {
        out.extend(visit(node, visitor, state)?);
    }
    *nodes = out;
    Ok(())
}

/// 单槽位子块：作为 `Node::Block` 访问，替换结果必须恰好一个节点
fn walk_slot<V: Visitor>(
    block: &mut Block,
    visitor: &mut V,
    state: &mut WalkState,
) -> Result<(), V::Error> {
    let line = block.line;
    let taken = std::mem::take(block);
    let mut out = visit(Node::Block(taken), visitor, state)?;
    if out.len() != 1 {
        return Err(WalkError::ArrayReplaceNotAllowed {
            kind: NodeKind::Block.name(),
        }
        .into());
    }
    *block = into_block(out.remove(0), line);
    Ok(())
}

fn walk_optional_slot<V: Visitor>(
    block: &mut Option<Block>,
    visitor: &mut V,
    state: &mut WalkState,
) -> Result<(), V::Error> {
    match block {
        Some(b) => walk_slot(b, visitor, state),
        None => Ok(()),
    }
}

fn walk_children<V: Visitor>(
    node: &mut Node,
    visitor: &mut V,
    state: &mut WalkState,
) -> Result<(), V::Error> {
    match node {
        Node::Block(b) => walk_sequence(&mut b.nodes, visitor, state),
        Node::NamedBlock(b) => walk_sequence(&mut b.nodes, visitor, state),
        Node::Tag(t) => walk_slot(&mut t.block, visitor, state),
        Node::InterpolatedTag(t) => walk_slot(&mut t.block, visitor, state),
        Node::Code(c) => walk_optional_slot(&mut c.block, visitor, state),
        Node::Conditional(c) => {
            walk_slot(&mut c.consequent, visitor, state)?;
            walk_optional_slot(&mut c.alternate, visitor, state)
        }
        Node::Each(e) => {
            walk_slot(&mut e.block, visitor, state)?;
            walk_optional_slot(&mut e.alternate, visitor, state)
        }
        Node::EachOf(e) => walk_slot(&mut e.block, visitor, state),
        Node::While(w) => walk_slot(&mut w.block, visitor, state),
        Node::Case(c) => walk_slot(&mut c.block, visitor, state),
        Node::When(w) => walk_optional_slot(&mut w.block, visitor, state),
        Node::Mixin(m) => walk_optional_slot(&mut m.block, visitor, state),
        Node::MixinCall(m) => walk_slot(&mut m.body, visitor, state),
        Node::CallerBlock(b) => walk_sequence(&mut b.nodes, visitor, state),
        Node::Include(i) => walk_sequence(&mut i.block.nodes, visitor, state),
        Node::RawInclude(r) => walk_sequence(&mut r.filters, visitor, state),
        Node::BlockComment(c) => walk_slot(&mut c.block, visitor, state),
        Node::Text(_)
        | Node::MixinBlock { .. }
        | Node::Extends(_)
        | Node::Comment(_)
        | Node::Doctype(_)
        | Node::IncludeFilter(_)
        | Node::TypeHint(_)
        | Node::YieldBlock { .. } => Ok(()),
    }
}

/// Direct child blocks of a node, in traversal order.
pub fn child_blocks(node: &Node) -> Vec<&[Node]> {
    fn opt(b: &Option<Block>) -> Vec<&[Node]> {
        b.iter().map(|b| b.nodes.as_slice()).collect()
    }
    match node {
        Node::Block(b) => vec![b.nodes.as_slice()],
        Node::NamedBlock(b) => vec![b.nodes.as_slice()],
        Node::Tag(t) => vec![t.block.nodes.as_slice()],
        Node::InterpolatedTag(t) => vec![t.block.nodes.as_slice()],
        Node::Code(c) => opt(&c.block),
        Node::Conditional(c) => {
            let mut out = vec![c.consequent.nodes.as_slice()];
            out.extend(opt(&c.alternate));
            out
        }
        Node::Each(e) => {
            let mut out = vec![e.block.nodes.as_slice()];
            out.extend(opt(&e.alternate));
            out
        }
        Node::EachOf(e) => vec![e.block.nodes.as_slice()],
        Node::While(w) => vec![w.block.nodes.as_slice()],
        Node::Case(c) => vec![c.block.nodes.as_slice()],
        Node::When(w) => opt(&w.block),
        Node::Mixin(m) => opt(&m.block),
        Node::MixinCall(m) => vec![m.body.nodes.as_slice()],
        Node::CallerBlock(b) => vec![b.nodes.as_slice()],
        Node::Include(i) => vec![i.block.nodes.as_slice()],
        Node::RawInclude(r) => vec![r.filters.as_slice()],
        Node::BlockComment(c) => vec![c.block.nodes.as_slice()],
        Node::Text(_)
        | Node::MixinBlock { .. }
        | Node::Extends(_)
        | Node::Comment(_)
        | Node::Doctype(_)
        | Node::IncludeFilter(_)
        | Node::TypeHint(_)
        | Node::YieldBlock { .. } => Vec::new(),
    }
}

/// 只读深度优先遍历
pub fn visit_nodes<'a>(nodes: &'a [Node], f: &mut dyn FnMut(&'a Node)) {
    for node in nodes {
        f(node);
        for children in child_blocks(node) {
            visit_nodes(children, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::ast::Text;
    use crate::tpl::parser::parse_template;

    struct Upper;

    impl Visitor for Upper {
        type Error = WalkError;

        fn before(&mut self, node: &mut Node, _: &WalkState) -> Result<Action, WalkError> {
            if let Node::Text(t) = node {
                t.val = t.val.to_uppercase();
            }
            Ok(Action::Keep)
        }
    }

    fn texts(block: &Block) -> Vec<String> {
        let mut out = Vec::new();
        visit_nodes(&block.nodes, &mut |n| {
            if let Node::Text(t) = n {
                out.push(t.val.clone());
            }
        });
        out
    }

    #[test]
    fn test_mutate_in_place() {
        let block = parse_template("div\n  p a\n  if x\n    p b\n  else\n    p c").unwrap();
        let block = walk_block(block, &mut Upper).unwrap();
        assert_eq!(texts(&block), vec!["A", "B", "C"]);
    }

    struct Explode;

    impl Visitor for Explode {
        type Error = WalkError;

        fn before(&mut self, node: &mut Node, _: &WalkState) -> Result<Action, WalkError> {
            match node {
                Node::Text(t) if t.val == "x" => Ok(Action::ReplaceMany(vec![
                    Node::text("1", t.line),
                    Node::text("2", t.line),
                ])),
                Node::Comment(_) => Ok(Action::Remove),
                _ => Ok(Action::Keep),
            }
        }
    }

    #[test]
    fn test_replace_many_in_sequence() {
        let block = parse_template("p\n  | x\n  | y\n// gone").unwrap();
        let block = walk_block(block, &mut Explode).unwrap();
        assert_eq!(texts(&block), vec!["1", "2", "\n", "y"]);
        assert_eq!(block.nodes.len(), 1);
    }

    struct RemoveBlocks;

    impl Visitor for RemoveBlocks {
        type Error = WalkError;

        fn before(&mut self, node: &mut Node, state: &WalkState) -> Result<Action, WalkError> {
            if matches!(node, Node::Block(_)) && state.parent(0) == Some(NodeKind::Tag) {
                return Ok(Action::Remove);
            }
            Ok(Action::Keep)
        }
    }

    #[test]
    fn test_remove_single_slot_fails() {
        let block = parse_template("div\n  p").unwrap();
        let err = walk_block(block, &mut RemoveBlocks).unwrap_err();
        assert_eq!(err, WalkError::ArrayReplaceNotAllowed { kind: "Block" });
    }

    struct Depths(Vec<(String, usize)>);

    impl Visitor for Depths {
        type Error = WalkError;

        fn after(&mut self, node: &mut Node, state: &WalkState) -> Result<Action, WalkError> {
            if let Node::Tag(t) = node {
                self.0.push((t.name.clone(), state.depth()));
            }
            Ok(Action::Keep)
        }
    }

    #[test]
    fn test_parent_stack_and_post_order() {
        let block = parse_template("ul\n  li").unwrap();
        let mut v = Depths(Vec::new());
        walk_block(block, &mut v).unwrap();
        // root Block > ul > Block > li
        assert_eq!(v.0, vec![("li".into(), 3), ("ul".into(), 1)]);
    }

    struct Replacer;

    impl Visitor for Replacer {
        type Error = WalkError;

        fn before(&mut self, node: &mut Node, _: &WalkState) -> Result<Action, WalkError> {
            if let Node::Comment(c) = node {
                return Ok(Action::Replace(Node::Text(Text {
                    val: "x".into(),
                    line: c.line,
                })));
            }
            if let Node::Text(t) = node {
                t.val.push('!');
            }
            Ok(Action::Keep)
        }
    }

    #[test]
    fn test_replacement_from_before_is_not_revisited_by_before() {
        let block = parse_template("// c").unwrap();
        let block = walk_block(block, &mut Replacer).unwrap();
        assert_eq!(texts(&block), vec!["x"]);
    }
}
