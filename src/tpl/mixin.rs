//! Mixin 收集与展开
//!
//! Every call is replaced by a [`MixinCall`] holding a fresh clone of the
//! definition body and the caller's argument expressions. The body itself is
//! never rewritten: arguments are evaluated by the renderer in the caller's
//! scope and bound in a frame of their own, and the caller's `block` content
//! is wrapped in a [`Node::CallerBlock`] so it renders back in the caller's
//! frame.

use crate::error::WalkError;
use crate::tpl::ast::{Attribute, Block, Mixin, MixinArg, MixinCall, Node};
use crate::tpl::parser::{quote_js, split_top_level};
use crate::tpl::walker::{Action, Visitor, WalkState, visit_nodes, walk_block};
use std::cell::Cell;
use std::collections::HashMap;

/// Nesting limit for mixins calling mixins.
pub const MAX_DEPTH: usize = 24;
/// Total expansions allowed for one template.
pub const MAX_EXPANSIONS: usize = 10_000;

/// 名称到定义的映射，同名以最后一个定义为准
#[derive(Debug, Default, Clone)]
pub struct MixinRegistry {
    defs: HashMap<String, Mixin>,
}

impl MixinRegistry {
    pub fn collect(block: &Block) -> Self {
        let mut registry = Self::default();
        visit_nodes(&block.nodes, &mut |node| {
            if let Node::Mixin(m) = node {
                if !m.call {
                    registry.register(m.clone());
                }
            }
        });
        registry
    }

    pub fn register(&mut self, def: Mixin) {
        if let Some(prev) = self.defs.get(&def.name) {
            tracing::warn!(
                "mixin `{}` redefined at line {} (previous definition at line {})",
                def.name,
                def.line,
                prev.line
            );
        }
        self.defs.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<&Mixin> {
        self.defs.get(name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// 收集并展开模板中的全部 mixin
pub fn expand_template(block: Block) -> Result<Block, WalkError> {
    let registry = MixinRegistry::collect(&block);
    expand(block, &registry)
}

/// Replaces every call with its expanded body and drops the definitions.
pub fn expand(block: Block, registry: &MixinRegistry) -> Result<Block, WalkError> {
    let expansions = Cell::new(0);
    let mut expander = Expander {
        registry,
        depth: 0,
        caller_block: None,
        expansions: &expansions,
    };
    walk_block(block, &mut expander)
}

struct Expander<'r> {
    registry: &'r MixinRegistry,
    depth: usize,
    /// content passed by the call being expanded, for `block`
    caller_block: Option<Block>,
    expansions: &'r Cell<usize>,
}

impl Visitor for Expander<'_> {
    type Error = WalkError;

    fn before(&mut self, node: &mut Node, _state: &WalkState) -> Result<Action, WalkError> {
        match node {
            Node::Mixin(m) if !m.call => Ok(Action::Remove),
            Node::Mixin(m) => {
                *node = self.expand_call(m)?;
                Ok(Action::Skip)
            }
            Node::MixinBlock { line } => {
                *node = match &self.caller_block {
                    Some(content) => Node::CallerBlock(content.clone()),
                    None => Node::Block(Block::new(*line)),
                };
                Ok(Action::Skip)
            }
            _ => Ok(Action::Keep),
        }
    }
}

impl Expander<'_> {
    fn expand_call(&mut self, call: &Mixin) -> Result<Node, WalkError> {
        let line = call.line;
        let Some(def) = self.registry.get(&call.name) else {
            tracing::warn!("mixin `{}` not found (line {})", call.name, line);
            return Ok(marker(format!("mixin not found: {}", call.name), line));
        };
        let count = self.expansions.get() + 1;
        self.expansions.set(count);
        if self.depth >= MAX_DEPTH || count > MAX_EXPANSIONS {
            tracing::warn!(
                "mixin `{}` expansion truncated at depth {} after {} expansions",
                call.name,
                self.depth,
                count
            );
            return Ok(marker(format!("mixin expansion truncated: {}", call.name), line));
        }

        // The caller's block belongs to the caller's scope: expand it there.
        let caller_block = match &call.block {
            Some(block) => {
                let mut outer = Expander {
                    registry: self.registry,
                    depth: self.depth,
                    caller_block: self.caller_block.clone(),
                    expansions: self.expansions,
                };
                walk_block(block.clone(), &mut outer)?
            }
            None => Block::new(line),
        };

        let body = def.block.clone().unwrap_or_else(|| Block::new(def.line));
        let mut inner = Expander {
            registry: self.registry,
            depth: self.depth + 1,
            caller_block: Some(caller_block),
            expansions: self.expansions,
        };
        let mut body = walk_block(body, &mut inner)?;
        body.line = line;
        Ok(Node::MixinCall(MixinCall {
            name: call.name.clone(),
            args: bind_arguments(def, call),
            body,
            line,
        }))
    }
}

fn marker(message: String, line: usize) -> Node {
    Node::Block(Block::with_nodes(vec![Node::marker(message, line)], line))
}

/// 形参与实参按位置绑定
///
/// Missing arguments without a default bind `null`; a rest parameter
/// `...items` collects the remaining arguments into an array, and the call's
/// attributes are always bound as `attributes`.
pub fn bind_arguments(def: &Mixin, call: &Mixin) -> Vec<MixinArg> {
    let params = def.args.as_deref().map(split_top_level).unwrap_or_default();
    let args = call.args.as_deref().map(split_top_level).unwrap_or_default();
    let mut bindings = Vec::with_capacity(params.len() + 1);

    for (i, param) in params.iter().enumerate() {
        if let Some(rest) = param.strip_prefix("...") {
            let items = args.get(i..).unwrap_or_default().join(", ");
            bindings.push(arg(rest.trim(), format!("[{}]", items), false));
            break;
        }
        let (name, default) = match param.split_once('=') {
            Some((name, default)) => (name.trim(), Some(default.trim())),
            None => (param.as_str(), None),
        };
        let binding = match (args.get(i), default) {
            (Some(value), _) if !value.is_empty() => arg(name, value.clone(), false),
            (_, Some(default)) => arg(name, default.to_string(), true),
            _ => arg(name, "null".to_string(), false),
        };
        bindings.push(binding);
    }

    bindings.push(arg("attributes", attributes_object(call), false));
    bindings
}

fn arg(name: &str, value: String, default: bool) -> MixinArg {
    MixinArg {
        name: name.to_string(),
        value,
        default,
    }
}

/// `+btn(...)(class="big" href=url)` 的调用属性绑定为 `attributes` 对象
fn attributes_object(call: &Mixin) -> String {
    if call.attrs.is_empty() {
        return match call.attribute_blocks.first() {
            Some(expr) => expr.clone(),
            None => "{}".to_string(),
        };
    }
    let mut entries: Vec<(String, Vec<&str>)> = Vec::new();
    for Attribute { name, val, .. } in &call.attrs {
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, vals)) => vals.push(val.as_str()),
            None => entries.push((name.clone(), vec![val.as_str()])),
        }
    }
    let body: Vec<String> = entries
        .iter()
        .map(|(name, vals)| {
            let value = if vals.len() == 1 {
                vals[0].to_string()
            } else {
                format!("[{}]", vals.join(", "))
            };
            format!("{}: {}", quote_js(name), value)
        })
        .collect();
    format!("{{{}}}", body.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::parser::parse_template;

    fn expanded(src: &str) -> Block {
        expand_template(parse_template(src).unwrap()).unwrap()
    }

    fn calls(block: &Block) -> Vec<&MixinCall> {
        let mut out = Vec::new();
        visit_nodes(&block.nodes, &mut |n| {
            if let Node::MixinCall(c) = n {
                out.push(c);
            }
        });
        out
    }

    fn args(call: &MixinCall) -> Vec<(&str, &str, bool)> {
        call.args
            .iter()
            .map(|a| (a.name.as_str(), a.value.as_str(), a.default))
            .collect()
    }

    fn comments(block: &Block) -> Vec<String> {
        let mut out = Vec::new();
        visit_nodes(&block.nodes, &mut |n| {
            if let Node::Comment(c) = n {
                out.push(c.val.clone());
            }
        });
        out
    }

    #[test]
    fn test_positional_binding_and_defaults() {
        let block = expanded(
            "mixin card(title, body, footer = 'none')\n  h2= title\n  p= body\n  small= footer\n+card(\"Hi\", \"World\")\n+card(\"Only\")",
        );
        let calls = calls(&block);
        assert_eq!(calls.len(), 2);
        assert_eq!(
            args(calls[0]),
            vec![
                ("title", "\"Hi\"", false),
                ("body", "\"World\"", false),
                ("footer", "'none'", true),
                ("attributes", "{}", false),
            ]
        );
        assert_eq!(
            args(calls[1])[..3],
            [("title", "\"Only\"", false), ("body", "null", false), ("footer", "'none'", true)]
        );
    }

    #[test]
    fn test_body_is_not_rewritten() {
        let block = expanded("mixin m(item)\n  p= item\n  each item in [1]\n    li= item\n+m('outer')");
        let mut codes = Vec::new();
        visit_nodes(&block.nodes, &mut |n| {
            if let Node::Code(c) = n {
                codes.push(c.val.clone());
            }
        });
        assert_eq!(codes, vec!["item", "item"]);
        assert_eq!(args(calls(&block)[0])[0], ("item", "'outer'", false));
    }

    #[test]
    fn test_rest_parameter() {
        let block = expanded("mixin list(id, ...items)\n  each item in items\n    li= item\n+list('x', 1, 2, 3)");
        assert_eq!(
            args(calls(&block)[0])[..2],
            [("id", "'x'", false), ("items", "[1, 2, 3]", false)]
        );
    }

    #[test]
    fn test_missing_mixin_renders_marker() {
        let block = expanded("+nope(1)");
        assert_eq!(comments(&block), vec![" mixin not found: nope "]);
    }

    #[test]
    fn test_block_content_and_nested_calls() {
        let block = expanded(
            "mixin box(label)\n  .box\n    +tag(label)\n    block\nmixin tag(t)\n  span= t\n+box('L')\n  p= label",
        );
        let calls = calls(&block);
        assert_eq!(
            calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["box", "tag"]
        );
        // 嵌套调用的实参保持原样，在外层 mixin 的帧中求值
        assert_eq!(args(calls[1])[0], ("t", "label", false));

        let mut caller_blocks = 0;
        let mut defs = 0;
        visit_nodes(&block.nodes, &mut |n| match n {
            Node::CallerBlock(b) => {
                caller_blocks += 1;
                assert!(matches!(&b.nodes[0], Node::Tag(t) if t.name == "p"));
            }
            Node::Mixin(_) => defs += 1,
            _ => {}
        });
        assert_eq!((caller_blocks, defs), (1, 0));
    }

    #[test]
    fn test_block_outside_mixin_is_empty() {
        let block = expanded("div\n  block");
        let mut caller_blocks = 0;
        visit_nodes(&block.nodes, &mut |n| {
            if matches!(n, Node::CallerBlock(_)) {
                caller_blocks += 1;
            }
        });
        assert_eq!(caller_blocks, 0);
    }

    #[test]
    fn test_call_attributes_bound_to_attributes() {
        let block = expanded("mixin btn()\n  a&attributes(attributes)\n+btn()(class=\"big\" href=url)");
        assert_eq!(
            args(calls(&block)[0]),
            vec![("attributes", "{\"class\": \"big\", \"href\": url}", false)]
        );
    }

    #[test]
    fn test_recursion_is_truncated() {
        let block = expanded("mixin r(n)\n  p= n\n  +r(n)\n+r(1)");
        assert_eq!(comments(&block), vec![" mixin expansion truncated: r "]);
        assert_eq!(calls(&block).len(), MAX_DEPTH);
    }

    #[test]
    fn test_last_definition_wins() {
        let block = expanded("mixin a\n  p one\nmixin a\n  p two\n+a");
        let mut texts = Vec::new();
        visit_nodes(&block.nodes, &mut |n| {
            if let Node::Text(t) = n {
                texts.push(t.val.clone());
            }
        });
        assert_eq!(texts, vec!["two"]);
    }
}
