use crate::error::{EvalError, RenderError};
use crate::tpl::ast::*;
use crate::tpl::expr;
use crate::tpl::parser::string_literal;
use crate::tpl::render_context::Context;
use crate::tpl::runtime::{self, Attr};
use crate::value::Value;

/// `while` 循环的最大迭代次数
pub const MAX_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    pub pretty: bool,
    /// missing values and unsupported expressions become errors
    pub strict: bool,
    /// doctype assumed before any `doctype` line is seen
    pub doctype: Option<String>,
}

/// 渲染已解析（继承、mixin 均已展开）的语法树
pub fn render(block: &Block, data: &Value, options: &RenderOptions) -> Result<String, RenderError> {
    let mut renderer = Renderer::new(data, options);
    renderer.render_nodes(&block.nodes)?;
    Ok(renderer.finish())
}

struct Renderer<'a> {
    ctx: Context<'a>,
    out: String,
    pretty: bool,
    terse: bool,
    xml: bool,
    indent: usize,
    /// >0 while inside `pre` / `textarea`
    preserve: usize,
    broke_line: bool,
}

impl<'a> Renderer<'a> {
    fn new(data: &'a Value, options: &RenderOptions) -> Self {
        let doctype = options.doctype.as_deref();
        Self {
            ctx: Context::new(data).strict(options.strict),
            out: String::with_capacity(1024),
            pretty: options.pretty,
            terse: doctype.is_some_and(runtime::is_terse_doctype),
            xml: doctype == Some("xml"),
            indent: 0,
            preserve: 0,
            broke_line: false,
        }
    }

    fn finish(self) -> String {
        let mut out = self.out;
        if self.pretty && out.starts_with('\n') {
            out.remove(0);
        }
        out
    }

    fn pretty_active(&self) -> bool {
        self.pretty && self.preserve == 0
    }

    fn newline(&mut self) {
        if self.pretty_active() {
            self.out.push('\n');
            for _ in 0..self.indent {
                self.out.push_str("  ");
            }
            self.broke_line = true;
        }
    }

    fn eval(&mut self, src: &str, line: usize) -> Result<Value, RenderError> {
        match expr::evaluate(src, &self.ctx) {
            Ok(v) => Ok(v),
            Err(EvalError::MissingValue { path }) => {
                Err(RenderError::MissingContextValue { path, line })
            }
            Err(e) if self.ctx.is_strict() => Err(RenderError::EvaluationError { line, source: e }),
            Err(e) => {
                tracing::warn!("line {}: {}; rendering empty value", line, e);
                Ok(Value::Null)
            }
        }
    }

    fn render_nodes(&mut self, nodes: &[Node]) -> Result<(), RenderError> {
        for node in nodes {
            self.render_node(node)?;
        }
        Ok(())
    }

    fn render_node(&mut self, node: &Node) -> Result<(), RenderError> {
        match node {
            Node::Block(b) => self.render_nodes(&b.nodes),
            Node::NamedBlock(b) => self.render_nodes(&b.nodes),
            Node::Tag(t) => self.render_tag(
                &t.name,
                &t.attrs,
                &t.attribute_blocks,
                &t.block,
                t.self_closing,
                t.line,
            ),
            Node::InterpolatedTag(t) => {
                let name = self.eval(&t.expr, t.line)?.to_string();
                if name.is_empty() {
                    tracing::warn!("line {}: interpolated tag name is empty", t.line);
                    return self.render_nodes(&t.block.nodes);
                }
                self.render_tag(
                    &name,
                    &t.attrs,
                    &t.attribute_blocks,
                    &t.block,
                    t.self_closing,
                    t.line,
                )
            }
            Node::Text(t) => {
                self.out.push_str(&t.val);
                Ok(())
            }
            Node::Code(c) => self.render_code(c),
            Node::Conditional(c) => {
                if self.eval(&c.test, c.line)?.is_truthy() {
                    self.render_nodes(&c.consequent.nodes)
                } else if let Some(alt) = &c.alternate {
                    self.render_nodes(&alt.nodes)
                } else {
                    Ok(())
                }
            }
            Node::Each(e) => self.render_each(e),
            Node::EachOf(e) => self.render_each_of(e),
            Node::While(w) => {
                let mut count = 0;
                while self.eval(&w.test, w.line)?.is_truthy() {
                    count += 1;
                    if count > MAX_ITERATIONS {
                        return Err(RenderError::IterationLimit {
                            line: w.line,
                            limit: MAX_ITERATIONS,
                        });
                    }
                    self.render_nodes(&w.block.nodes)?;
                }
                Ok(())
            }
            Node::Case(c) => self.render_case(c),
            Node::When(_) => Ok(()),
            Node::Mixin(m) if m.call => {
                tracing::warn!("mixin `{}` was not expanded (line {})", m.name, m.line);
                self.render_node(&Node::marker(format!("mixin not found: {}", m.name), m.line))
            }
            Node::Mixin(_) => Ok(()),
            Node::MixinBlock { .. } | Node::YieldBlock { .. } => Ok(()),
            Node::MixinCall(m) => self.render_mixin_call(m),
            Node::CallerBlock(b) => {
                self.ctx.enter_caller();
                let rendered = self.render_nodes(&b.nodes);
                self.ctx.exit_frame();
                rendered
            }
            Node::Include(i) => Err(RenderError::UnresolvedDirective {
                directive: "include",
                line: i.line,
            }),
            Node::RawInclude(i) => Err(RenderError::UnresolvedDirective {
                directive: "include",
                line: i.line,
            }),
            Node::Extends(e) => Err(RenderError::UnresolvedDirective {
                directive: "extends",
                line: e.line,
            }),
            Node::Comment(c) => {
                if c.buffer {
                    self.newline();
                    self.out.push_str("<!--");
                    self.out.push_str(&c.val);
                    self.out.push_str("-->");
                }
                Ok(())
            }
            Node::BlockComment(c) => {
                if c.buffer {
                    self.newline();
                    self.out.push_str("<!--");
                    self.out.push_str(&c.val);
                    self.preserve += 1;
                    let rendered = self.render_nodes(&c.block.nodes);
                    self.preserve -= 1;
                    rendered?;
                    self.out.push_str("-->");
                }
                Ok(())
            }
            Node::Doctype(d) => {
                self.terse = runtime::is_terse_doctype(&d.val);
                self.xml = d.val.trim() == "xml";
                self.newline();
                self.out.push_str(&runtime::doctype_markup(&d.val));
                Ok(())
            }
            Node::IncludeFilter(_) | Node::TypeHint(_) => Ok(()),
        }
    }

    fn render_code(&mut self, code: &Code) -> Result<(), RenderError> {
        if code.buffer {
            let value = self.eval(&code.val, code.line)?;
            runtime::push_value(&mut self.out, &value, code.escape);
            return Ok(());
        }
        match expr::parse_assignment(&code.val) {
            Ok((name, value)) => {
                let value = match expr::eval(&value, &self.ctx) {
                    Ok(v) => v,
                    Err(EvalError::MissingValue { path }) => {
                        return Err(RenderError::MissingContextValue {
                            path,
                            line: code.line,
                        });
                    }
                    Err(e) if self.ctx.is_strict() => {
                        return Err(RenderError::EvaluationError {
                            line: code.line,
                            source: e,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("line {}: {}; assigning null", code.line, e);
                        Value::Null
                    }
                };
                self.ctx.assign(&name, value);
            }
            Err(e) if self.ctx.is_strict() => {
                return Err(RenderError::EvaluationError {
                    line: code.line,
                    source: e,
                });
            }
            Err(e) => tracing::warn!("line {}: {}; code skipped", code.line, e),
        }
        if let Some(block) = &code.block {
            self.render_nodes(&block.nodes)?;
        }
        Ok(())
    }

    fn render_mixin_call(&mut self, call: &MixinCall) -> Result<(), RenderError> {
        // 实参在调用方作用域求值，默认值留到新帧中求值
        let mut values = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            values.push(if arg.default {
                None
            } else {
                Some(self.eval(&arg.value, call.line)?)
            });
        }
        self.ctx.enter_frame();
        let rendered = self.bind_and_render(call, values);
        self.ctx.exit_frame();
        rendered
    }

    fn bind_and_render(&mut self, call: &MixinCall, values: Vec<Option<Value>>) -> Result<(), RenderError> {
        for (arg, value) in call.args.iter().zip(values) {
            let value = match value {
                Some(value) => value,
                None => self.eval(&arg.value, call.line)?,
            };
            self.ctx.push(&arg.name, value);
        }
        self.render_nodes(&call.body.nodes)
    }

    fn render_tag(
        &mut self,
        name: &str,
        attrs: &[Attribute],
        attribute_blocks: &[String],
        block: &Block,
        self_closing: bool,
        line: usize,
    ) -> Result<(), RenderError> {
        let mut evaluated = Vec::with_capacity(attrs.len());
        for attr in attrs {
            let value = self.eval(&attr.val, line)?;
            let is_static = string_literal(&attr.val).is_some();
            evaluated.push(Attr::new(attr.name.clone(), value, attr.escape, is_static));
        }
        let mut spreads = Vec::with_capacity(attribute_blocks.len());
        for src in attribute_blocks {
            spreads.push(self.eval(src, line)?);
        }

        let inline = runtime::is_inline(name);
        if !inline {
            self.newline();
        }
        self.out.push('<');
        self.out.push_str(name);
        runtime::push_attrs(&mut self.out, &evaluated, &spreads, self.terse);

        if self_closing {
            self.out.push_str("/>");
            return Ok(());
        }
        if runtime::is_void(name) {
            self.out.push_str(if self.terse && !self.xml { ">" } else { "/>" });
            if !block.is_empty() {
                tracing::warn!("void element <{}> cannot have content (line {})", name, line);
            }
            return Ok(());
        }
        self.out.push('>');

        let preserve = matches!(name, "pre" | "textarea");
        let outer_broke = std::mem::replace(&mut self.broke_line, false);
        self.indent += 1;
        if preserve {
            self.preserve += 1;
        }
        let rendered = self.render_nodes(&block.nodes);
        if preserve {
            self.preserve -= 1;
        }
        self.indent -= 1;
        rendered?;

        if self.broke_line {
            self.newline();
        }
        self.broke_line = outer_broke || self.broke_line || (!inline && self.pretty_active());
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
        Ok(())
    }

    fn render_each(&mut self, each: &Each) -> Result<(), RenderError> {
        let collection = self.eval(&each.obj, each.line)?;
        let entries: Vec<(Value, Value)> = match collection {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (v, Value::Int(i as i64)))
                .collect(),
            Value::Map(map) => map.into_iter().map(|(k, v)| (v, Value::Str(k))).collect(),
            Value::Null => Vec::new(),
            other => {
                tracing::warn!(
                    "line {}: cannot iterate over a {}",
                    each.line,
                    other.type_name()
                );
                Vec::new()
            }
        };
        if entries.is_empty() {
            if let Some(alt) = &each.alternate {
                return self.render_nodes(&alt.nodes);
            }
            return Ok(());
        }
        for (index, (value, key)) in entries.into_iter().enumerate() {
            self.ctx.enter_scope();
            self.ctx.push("$index", Value::Int(index as i64));
            if let Some(key_name) = &each.key {
                self.ctx.push(key_name, key);
            }
            self.ctx.push(&each.val, value);
            let rendered = self.render_nodes(&each.block.nodes);
            self.ctx.exit_scope();
            rendered?;
        }
        Ok(())
    }

    fn render_each_of(&mut self, each: &EachOf) -> Result<(), RenderError> {
        let items: Vec<Value> = match self.eval(&each.obj, each.line)? {
            Value::List(items) => items,
            Value::Map(map) => map
                .into_iter()
                .map(|(k, v)| Value::List(vec![Value::Str(k), v]))
                .collect(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Null => Vec::new(),
            other => {
                tracing::warn!("line {}: {} is not iterable", each.line, other.type_name());
                Vec::new()
            }
        };
        for (index, value) in items.into_iter().enumerate() {
            self.ctx.enter_scope();
            self.ctx.push("$index", Value::Int(index as i64));
            self.ctx.push(&each.value, value);
            let rendered = self.render_nodes(&each.block.nodes);
            self.ctx.exit_scope();
            rendered?;
        }
        Ok(())
    }

    /// 首个匹配分支（或 default）开始，落到第一个有内容的分支
    fn render_case(&mut self, case: &Case) -> Result<(), RenderError> {
        let subject = self.eval(&case.expr, case.line)?;
        let whens: Vec<&When> = case
            .block
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::When(w) => Some(w),
                _ => None,
            })
            .collect();

        let mut start = None;
        for (i, when) in whens.iter().enumerate() {
            if when.is_default() {
                continue;
            }
            let candidate = self.eval(&when.expr, when.line)?;
            if runtime::strict_eq(&subject, &candidate) {
                start = Some(i);
                break;
            }
        }
        let start = start.or_else(|| whens.iter().position(|w| w.is_default()));
        let Some(start) = start else {
            return Ok(());
        };
        if let Some(body) = whens[start..].iter().find_map(|w| w.block.as_ref()) {
            self.render_nodes(&body.nodes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::mixin::expand_template;
    use crate::tpl::parser::parse_template;

    fn data() -> Value {
        let user: Value = [("name", Value::from("Ada")), ("role", Value::from("admin"))]
            .into_iter()
            .collect();
        [
            ("user", user),
            ("items", Value::from(vec!["a", "b"])),
            ("empty", Value::List(vec![])),
            ("html", Value::from("<b>")),
            ("n", Value::Int(2)),
        ]
        .into_iter()
        .collect()
    }

    fn render_with(src: &str, options: &RenderOptions) -> Result<String, RenderError> {
        let ast = expand_template(parse_template(src).unwrap()).unwrap();
        render(&ast, &data(), options)
    }

    fn compact(src: &str) -> String {
        render_with(src, &RenderOptions::default()).unwrap()
    }

    #[test]
    fn test_tags_and_text() {
        assert_eq!(
            compact("ul#list.nav\n  li one\n  li: a(href=\"/x\") two"),
            "<ul id=\"list\" class=\"nav\"><li>one</li><li><a href=\"/x\">two</a></li></ul>"
        );
    }

    #[test]
    fn test_escaping() {
        assert_eq!(compact("p #{html}"), "<p>&lt;b&gt;</p>");
        assert_eq!(compact("p !{html}"), "<p><b></p>");
        assert_eq!(compact("p= html"), "<p>&lt;b&gt;</p>");
        assert_eq!(compact("p!= html"), "<p><b></p>");
    }

    #[test]
    fn test_class_literal_and_object() {
        assert_eq!(
            compact("div.a(class={b: true, c: false})"),
            "<div class=\"a b\"></div>"
        );
    }

    #[test]
    fn test_void_and_terse() {
        assert_eq!(compact("br\ninput(checked)"), "<br/><input checked=\"checked\"/>");
        assert_eq!(
            compact("doctype html\nbr\ninput(checked)"),
            "<!DOCTYPE html><br><input checked>"
        );
        assert_eq!(compact("foo/"), "<foo/>");
    }

    #[test]
    fn test_conditionals_and_loops() {
        assert_eq!(
            compact("if user.role == 'admin'\n  p admin\nelse\n  p user"),
            "<p>admin</p>"
        );
        assert_eq!(compact("unless n > 5\n  p small"), "<p>small</p>");
        assert_eq!(
            compact("each item, i in items\n  li= i + ':' + item"),
            "<li>0:a</li><li>1:b</li>"
        );
        assert_eq!(compact("each x in empty\n  li= x\nelse\n  li none"), "<li>none</li>");
        assert_eq!(compact("each v, k in user\n  i= k"), "<i>name</i><i>role</i>");
        assert_eq!(compact("for x of items\n  b= $index"), "<b>0</b><b>1</b>");
    }

    #[test]
    fn test_while_and_assignment() {
        assert_eq!(
            compact("- var i = 0\nwhile i < 3\n  span= i\n  - i = i + 1"),
            "<span>0</span><span>1</span><span>2</span>"
        );
        let err = render_with("while true\n  p", &RenderOptions::default()).unwrap_err();
        assert_eq!(
            err,
            RenderError::IterationLimit {
                line: 1,
                limit: MAX_ITERATIONS
            }
        );
    }

    #[test]
    fn test_case_fallthrough_and_default() {
        let src = "case n\n  when 1\n  when 2: p low\n  when 3: p mid\n  default: p other";
        assert_eq!(compact(src), "<p>low</p>");
        let src = "case n\n  when 1: p one\n  default\n  when 9: p fallback";
        assert_eq!(compact(src), "<p>fallback</p>");
    }

    #[test]
    fn test_comments_and_doctype() {
        assert_eq!(compact("// note\n//- hidden\np"), "<!-- note--><p></p>");
    }

    #[test]
    fn test_pretty_print() {
        let options = RenderOptions {
            pretty: true,
            ..Default::default()
        };
        let html = render_with("div\n  p a\n  p\n    span b", &options).unwrap();
        assert_eq!(html, "<div>\n  <p>a</p>\n  <p><span>b</span></p>\n</div>");
    }

    #[test]
    fn test_pretty_keeps_pre_content() {
        let options = RenderOptions {
            pretty: true,
            ..Default::default()
        };
        let html = render_with("pre\n  div x", &options).unwrap();
        assert_eq!(html, "<pre><div>x</div></pre>");
    }

    #[test]
    fn test_soft_and_strict_failures() {
        assert_eq!(compact("p= n * 2"), "<p></p>");
        assert_eq!(compact("p= missing"), "<p></p>");
        let strict = RenderOptions {
            strict: true,
            ..Default::default()
        };
        assert!(matches!(
            render_with("p= n * 2", &strict),
            Err(RenderError::EvaluationError { line: 1, .. })
        ));
        assert_eq!(
            render_with("p= missing", &strict),
            Err(RenderError::MissingContextValue {
                path: "missing".into(),
                line: 1
            })
        );
    }

    #[test]
    fn test_unresolved_include_fails() {
        let err = render_with("include other", &RenderOptions::default()).unwrap_err();
        assert_eq!(
            err,
            RenderError::UnresolvedDirective {
                directive: "include",
                line: 1
            }
        );
    }

    #[test]
    fn test_mixin_card() {
        let html = compact(
            "mixin card(title, body)\n  .card\n    h2= title\n    p= body\n+card(\"Hi\", \"World\")",
        );
        assert_eq!(html, "<div class=\"card\"><h2>Hi</h2><p>World</p></div>");
    }

    #[test]
    fn test_mixin_argument_not_captured_by_loop_variable() {
        assert_eq!(
            compact("mixin m(x)\n  each item in [1, 2]\n    p= x\n- var item = 'outer'\n+m(item)"),
            "<p>outer</p><p>outer</p>"
        );
    }

    #[test]
    fn test_mixin_locals_stay_inside_call() {
        assert_eq!(
            compact("mixin m()\n  - var y = 'inner'\n  p= y\n- var y = 'outer'\n+m()\np= y"),
            "<p>inner</p><p>outer</p>"
        );
    }

    #[test]
    fn test_nested_mixins_share_parameter_name() {
        assert_eq!(
            compact("mixin inner(x)\n  p= x\nmixin outer(x)\n  +inner(x + 1)\n  p= x\n+outer(1)"),
            "<p>2</p><p>1</p>"
        );
    }

    #[test]
    fn test_block_content_renders_in_caller_scope() {
        assert_eq!(
            compact(
                "mixin wrap(x)\n  section\n    block\nmixin outer(x)\n  +wrap('inner')\n    p= x\n+outer('outer')"
            ),
            "<section><p>outer</p></section>"
        );
        assert_eq!(
            compact("mixin wrap(label)\n  div\n    block\n- var label = 'caller'\n+wrap('mixin')\n  p= label"),
            "<div><p>caller</p></div>"
        );
    }

    #[test]
    fn test_mixin_default_sees_earlier_parameter() {
        assert_eq!(compact("mixin m(a, b = a + '!')\n  p= b\n+m('hi')"), "<p>hi!</p>");
    }

    #[test]
    fn test_interpolated_tag_and_attributes_spread() {
        assert_eq!(
            compact("#{'h' + n}(title=user.name)&attributes({'data-x': 1}) hi"),
            "<h2 title=\"Ada\" data-x=\"1\">hi</h2>"
        );
    }
}
