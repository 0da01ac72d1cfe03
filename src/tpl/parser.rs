use crate::error::{ParseError, ParseErrorKind, TemplateError};
use crate::tpl::ast::*;
use crate::tpl::lexer::{AttrToken, Token, TokenKind, is_identifier, tokenize};

/// 词法 + 语法分析
pub fn parse_template(source: &str) -> Result<Block, TemplateError> {
    let tokens = tokenize(source)?;
    Ok(parse(tokens)?)
}

/// 将 token 流构建为语法树根节点
pub fn parse(tokens: Vec<Token>) -> Result<Block, ParseError> {
    let mut parser = Parser::new(tokens);
    let root = parser.parse_block_body(1)?;
    match parser.peek() {
        TokenKind::Eos => Ok(root),
        other => Err(parser.unexpected("end of input", other.describe())),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

/// Attribute tokens collected after a tag name or mixin call.
#[derive(Default)]
struct AttrSet {
    attrs: Vec<Attribute>,
    attribute_blocks: Vec<String>,
    /// index into `attrs` of the merged literal class attribute
    class_slot: Option<usize>,
    classes: Vec<String>,
}

impl AttrSet {
    fn add_classes(&mut self, names: &str) {
        if self.class_slot.is_none() {
            self.class_slot = Some(self.attrs.len());
            self.attrs.push(Attribute::new("class", String::new(), true));
        }
        for name in names.split_whitespace() {
            if !self.classes.iter().any(|c| c == name) {
                self.classes.push(name.to_string());
            }
        }
    }

    fn add(&mut self, attr: &AttrToken) {
        if attr.name == "class" {
            if let Some(literal) = string_literal(&attr.val) {
                self.add_classes(&literal);
                return;
            }
        }
        self.attrs
            .push(Attribute::new(attr.name.clone(), attr.val.clone(), attr.escape));
    }

    fn finish(mut self) -> (Vec<Attribute>, Vec<String>) {
        if let Some(slot) = self.class_slot {
            self.attrs[slot].val = quote_js(&self.classes.join(" "));
        }
        (self.attrs, self.attribute_blocks)
    }
}

impl Parser {
    fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eos)) {
            let (line, col) = tokens.last().map_or((1, 1), |t| (t.line, t.col));
            tokens.push(Token {
                kind: TokenKind::Eos,
                line,
                col,
            });
        }
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn next(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        let token = self.current();
        ParseError {
            kind,
            line: token.line,
            col: token.col,
        }
    }

    fn unexpected(&self, expected: &str, found: String) -> ParseError {
        self.error(ParseErrorKind::UnexpectedToken {
            expected: expected.to_string(),
            found,
        })
    }

    // ---- blocks ----

    /// Statements until an Outdent or end of input (neither consumed).
    fn parse_block_body(&mut self, line: usize) -> Result<Block, ParseError> {
        let mut block = Block::new(line);
        let mut last_was_text = false;
        loop {
            match self.peek() {
                TokenKind::Newline => {
                    self.next();
                }
                TokenKind::Outdent | TokenKind::Eos => break,
                TokenKind::Text(_) | TokenKind::Interpolation { .. } => {
                    if last_was_text {
                        block.nodes.push(Node::text("\n", self.line()));
                    }
                    self.parse_text_run(&mut block.nodes);
                    if let TokenKind::Indent = self.peek() {
                        return Err(self.unexpected("newline", "indent".into()));
                    }
                    last_was_text = true;
                }
                TokenKind::Extends(_) => {
                    let node = self.parse_extends(&block)?;
                    block.nodes.push(node);
                    last_was_text = false;
                }
                _ => {
                    let node = self.parse_statement()?;
                    block.nodes.push(node);
                    last_was_text = false;
                }
            }
        }
        Ok(block)
    }

    /// `Indent body Outdent`, or an empty block when nothing is nested.
    fn parse_indented(&mut self) -> Result<Block, ParseError> {
        let line = self.line();
        if !matches!(self.peek(), TokenKind::Indent) {
            return Ok(Block::new(line));
        }
        self.next();
        self.depth += 1;
        let block = self.parse_block_body(line)?;
        self.depth -= 1;
        self.expect_outdent()?;
        Ok(block)
    }

    fn expect_outdent(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            TokenKind::Outdent => {
                self.next();
                Ok(())
            }
            TokenKind::Eos => Err(self.error(ParseErrorKind::UnclosedBlock(
                "indented block".into(),
            ))),
            other => Err(self.unexpected("outdent", other.describe())),
        }
    }

    fn parse_text_run(&mut self, out: &mut Vec<Node>) {
        loop {
            let line = self.line();
            match self.peek().clone() {
                TokenKind::Text(val) => {
                    self.next();
                    out.push(Node::text(val, line));
                }
                TokenKind::Interpolation { expr, escape } => {
                    self.next();
                    out.push(interpolation(expr, escape, line));
                }
                _ => break,
            }
        }
    }

    /// 文本块（`tag.` 或注释后的缩进行），换行保留为 "\n" 文本
    fn parse_text_block(&mut self) -> Result<Block, ParseError> {
        let line = self.line();
        let mut block = Block::new(line);
        if !matches!(self.peek(), TokenKind::Indent) {
            return Ok(block);
        }
        self.next();
        loop {
            let line = self.line();
            match self.peek() {
                TokenKind::Newline => {
                    self.next();
                    block.nodes.push(Node::text("\n", line));
                }
                TokenKind::Text(_) | TokenKind::Interpolation { .. } => {
                    self.parse_text_run(&mut block.nodes);
                }
                _ => break,
            }
        }
        self.expect_outdent()?;
        Ok(block)
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let token = self.current().clone();
        let line = token.line;
        match token.kind {
            TokenKind::Tag(name) => {
                self.next();
                self.parse_tag(name, line)
            }
            TokenKind::Class(_) | TokenKind::Id(_) => self.parse_tag("div".into(), line),
            TokenKind::InterpolatedTag(expr) => {
                self.next();
                let tag = self.parse_tag(String::new(), line)?;
                let Node::Tag(tag) = tag else {
                    return Err(self.unexpected("tag", "statement".into()));
                };
                Ok(Node::InterpolatedTag(InterpolatedTag {
                    expr,
                    attrs: tag.attrs,
                    attribute_blocks: tag.attribute_blocks,
                    block: tag.block,
                    self_closing: tag.self_closing,
                    line,
                }))
            }
            TokenKind::Code { val, buffer, escape } => {
                self.next();
                let block = if matches!(self.peek(), TokenKind::Indent) {
                    Some(self.parse_indented()?)
                } else {
                    None
                };
                Ok(Node::Code(Code {
                    val,
                    buffer,
                    escape,
                    block,
                    line,
                }))
            }
            TokenKind::Comment { val, buffer } => {
                self.next();
                if matches!(self.peek(), TokenKind::Indent) {
                    let block = self.parse_text_block()?;
                    Ok(Node::BlockComment(BlockComment {
                        val,
                        block,
                        buffer,
                        line,
                    }))
                } else {
                    Ok(Node::Comment(Comment { val, buffer, line }))
                }
            }
            TokenKind::TypeHint(val) => {
                self.next();
                Ok(Node::TypeHint(TypeHint { val, line }))
            }
            TokenKind::Doctype(val) => {
                self.next();
                Ok(Node::Doctype(Doctype { val, line }))
            }
            TokenKind::If(test) => {
                self.next();
                self.parse_conditional(test, line)
            }
            TokenKind::Unless(test) => {
                self.next();
                self.parse_conditional(format!("!({})", test), line)
            }
            TokenKind::Each { val, key, obj } => {
                self.next();
                let block = self.parse_indented()?;
                let alternate = if self.else_follows() {
                    self.skip_to_else();
                    self.next();
                    Some(self.parse_branch_body()?)
                } else {
                    None
                };
                Ok(Node::Each(Each {
                    val,
                    key,
                    obj,
                    block,
                    alternate,
                    line,
                }))
            }
            TokenKind::EachOf { value, obj } => {
                self.next();
                let block = self.parse_indented()?;
                Ok(Node::EachOf(EachOf {
                    value,
                    obj,
                    block,
                    line,
                }))
            }
            TokenKind::While(test) => {
                self.next();
                let block = self.parse_indented()?;
                Ok(Node::While(While { test, block, line }))
            }
            TokenKind::Case(expr) => {
                self.next();
                self.parse_case(expr, line)
            }
            TokenKind::MixinDef { name, args } => {
                self.next();
                if let Some(args) = &args {
                    validate_signature(args).map_err(|kind| self.error(kind))?;
                }
                let block = self.parse_indented()?;
                Ok(Node::Mixin(Mixin {
                    name,
                    args,
                    block: Some(block),
                    call: false,
                    attrs: Vec::new(),
                    attribute_blocks: Vec::new(),
                    line,
                }))
            }
            TokenKind::Call { name, args } => {
                self.next();
                self.parse_call(name, args, line)
            }
            TokenKind::MixinBlock => {
                self.next();
                Ok(Node::MixinBlock { line })
            }
            TokenKind::Yield => {
                self.next();
                Ok(Node::YieldBlock { line })
            }
            TokenKind::Block { name, mode } => {
                self.next();
                if name.is_empty() {
                    return Err(self.unexpected("block name", "newline".into()));
                }
                let block = self.parse_indented()?;
                Ok(Node::NamedBlock(NamedBlock {
                    name,
                    mode,
                    nodes: block.nodes,
                    line,
                }))
            }
            TokenKind::Include { path, filters } => {
                self.next();
                let file = FileReference { path, line };
                if filters.is_empty() {
                    let block = self.parse_indented()?;
                    Ok(Node::Include(Include { file, block, line }))
                } else {
                    let filters = filters
                        .into_iter()
                        .map(|name| Node::IncludeFilter(IncludeFilter { name, line }))
                        .collect();
                    Ok(Node::RawInclude(RawInclude {
                        file,
                        filters,
                        line,
                    }))
                }
            }
            TokenKind::Extends(_) => Err(self.error(ParseErrorKind::ExtendsNotFirst)),
            other => Err(self.unexpected("statement", other.describe())),
        }
    }

    fn parse_extends(&mut self, preceding: &Block) -> Result<Node, ParseError> {
        let only_comments = preceding.nodes.iter().all(|n| {
            matches!(
                n,
                Node::Comment(_) | Node::BlockComment(_) | Node::TypeHint(_)
            )
        });
        if self.depth > 0 || !only_comments {
            return Err(self.error(ParseErrorKind::ExtendsNotFirst));
        }
        let token = self.next();
        let TokenKind::Extends(path) = token.kind else {
            return Err(self.unexpected("`extends`", token.kind.describe()));
        };
        if path.is_empty() {
            return Err(self.unexpected("template path", "newline".into()));
        }
        let line = token.line;
        Ok(Node::Extends(Extends {
            file: FileReference { path, line },
            line,
        }))
    }

    /// Body of a branch: `: statement` on the same line or an indented block.
    fn parse_branch_body(&mut self) -> Result<Block, ParseError> {
        let line = self.line();
        if matches!(self.peek(), TokenKind::Colon) {
            self.next();
            let node = self.parse_statement()?;
            return Ok(Block::with_nodes(vec![node], line));
        }
        self.parse_indented()
    }

    fn else_follows(&self) -> bool {
        let mut offset = 0;
        while matches!(self.peek_at(offset), TokenKind::Newline) {
            offset += 1;
        }
        matches!(self.peek_at(offset), TokenKind::Else | TokenKind::ElseIf(_))
    }

    fn skip_to_else(&mut self) {
        while matches!(self.peek(), TokenKind::Newline) {
            self.next();
        }
    }

    fn parse_conditional(&mut self, test: String, line: usize) -> Result<Node, ParseError> {
        if test.is_empty() {
            return Err(self.unexpected("condition", "newline".into()));
        }
        let consequent = self.parse_branch_body()?;
        let alternate = if self.else_follows() {
            self.skip_to_else();
            let token = self.next();
            match token.kind {
                TokenKind::ElseIf(test) => {
                    let nested = self.parse_conditional(test, token.line)?;
                    Some(Block::with_nodes(vec![nested], token.line))
                }
                _ => Some(self.parse_branch_body()?),
            }
        } else {
            None
        };
        Ok(Node::Conditional(Conditional {
            test,
            consequent,
            alternate,
            line,
        }))
    }

    fn parse_case(&mut self, expr: String, line: usize) -> Result<Node, ParseError> {
        let mut block = Block::new(line);
        if !matches!(self.peek(), TokenKind::Indent) {
            return Ok(Node::Case(Case { expr, block, line }));
        }
        self.next();
        loop {
            let token = self.current().clone();
            match token.kind {
                TokenKind::Newline => {
                    self.next();
                }
                TokenKind::Outdent | TokenKind::Eos => break,
                TokenKind::When(expr) => {
                    self.next();
                    let body = self.parse_when_body()?;
                    block.nodes.push(Node::When(When {
                        expr,
                        block: body,
                        line: token.line,
                    }));
                }
                TokenKind::Default => {
                    self.next();
                    let body = self.parse_when_body()?;
                    block.nodes.push(Node::When(When {
                        expr: DEFAULT_WHEN.to_string(),
                        block: body,
                        line: token.line,
                    }));
                }
                TokenKind::Comment { .. } | TokenKind::TypeHint(_) => {
                    let node = self.parse_statement()?;
                    block.nodes.push(node);
                }
                other => return Err(self.unexpected("`when` or `default`", other.describe())),
            }
        }
        self.expect_outdent()?;
        Ok(Node::Case(Case { expr, block, line }))
    }

    /// `when x` with no body falls through to the next branch.
    fn parse_when_body(&mut self) -> Result<Option<Block>, ParseError> {
        match self.peek() {
            TokenKind::Colon | TokenKind::Indent => Ok(Some(self.parse_branch_body()?)),
            _ => Ok(None),
        }
    }

    fn parse_attr_set(&mut self) -> AttrSet {
        let mut set = AttrSet::default();
        loop {
            match self.peek().clone() {
                TokenKind::Class(name) => {
                    self.next();
                    set.add_classes(&name);
                }
                TokenKind::Id(id) => {
                    self.next();
                    set.attrs.push(Attribute::new("id", quote_js(&id), true));
                }
                TokenKind::Attrs(list) => {
                    self.next();
                    for attr in &list {
                        set.add(attr);
                    }
                }
                TokenKind::AndAttributes(expr) => {
                    self.next();
                    set.attribute_blocks.push(expr);
                }
                _ => return set,
            }
        }
    }

    /// Inline content after the attributes: text, `= code`, `: nested`, `.` block.
    fn parse_inline_content(&mut self, block: &mut Block) -> Result<(), ParseError> {
        let line = self.line();
        match self.peek().clone() {
            TokenKind::Text(_) | TokenKind::Interpolation { .. } => {
                self.parse_text_run(&mut block.nodes);
            }
            TokenKind::Code { val, buffer, escape } => {
                self.next();
                block.nodes.push(Node::Code(Code {
                    val,
                    buffer,
                    escape,
                    block: None,
                    line,
                }));
            }
            TokenKind::Colon => {
                self.next();
                let node = self.parse_statement()?;
                block.nodes.push(node);
            }
            TokenKind::Dot => {
                self.next();
                let text = self.parse_text_block()?;
                block.nodes.extend(text.nodes);
                return Ok(());
            }
            _ => {}
        }
        let nested = self.parse_indented()?;
        block.nodes.extend(nested.nodes);
        Ok(())
    }

    fn parse_tag(&mut self, name: String, line: usize) -> Result<Node, ParseError> {
        let (attrs, attribute_blocks) = self.parse_attr_set().finish();
        let mut block = Block::new(line);
        let mut self_closing = false;
        if matches!(self.peek(), TokenKind::Slash) {
            self.next();
            self_closing = true;
            if matches!(self.peek(), TokenKind::Indent) {
                return Err(self.unexpected("newline", "indent".into()));
            }
        } else {
            self.parse_inline_content(&mut block)?;
        }
        Ok(Node::Tag(Tag {
            name,
            attrs,
            attribute_blocks,
            block,
            self_closing,
            line,
        }))
    }

    fn parse_call(
        &mut self,
        name: String,
        args: Option<String>,
        line: usize,
    ) -> Result<Node, ParseError> {
        let (attrs, attribute_blocks) = self.parse_attr_set().finish();
        let mut block = Block::new(line);
        self.parse_inline_content(&mut block)?;
        Ok(Node::Mixin(Mixin {
            name,
            args,
            block: (!block.is_empty()).then_some(block),
            call: true,
            attrs,
            attribute_blocks,
            line,
        }))
    }
}

fn interpolation(expr: String, escape: bool, line: usize) -> Node {
    Node::Code(Code {
        val: expr,
        buffer: true,
        escape,
        block: None,
        line,
    })
}

/// `"a b"` / `'a b'` 这类纯字符串字面量，返回去引号后的内容
pub(crate) fn string_literal(src: &str) -> Option<String> {
    let src = src.trim();
    let mut chars = src.chars();
    let quote = chars.next().filter(|c| *c == '"' || *c == '\'')?;
    if src.len() < 2 || !src.ends_with(quote) {
        return None;
    }
    let inner = &src[1..src.len() - 1];
    let mut out = String::new();
    let mut it = inner.chars();
    while let Some(c) = it.next() {
        match c {
            '\\' => match it.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            },
            c if c == quote => return None,
            c => out.push(c),
        }
    }
    Some(out)
}

/// 生成 JS 字符串字面量（双引号）
pub(crate) fn quote_js(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Splits on commas that are outside quotes and brackets.
pub(crate) fn split_top_level(src: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in src.chars() {
        if let Some(q) = quote {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn validate_signature(args: &str) -> Result<(), ParseErrorKind> {
    let invalid = || ParseErrorKind::InvalidMixinSignature(args.to_string());
    let params = split_top_level(args);
    for (i, param) in params.iter().enumerate() {
        if let Some(rest) = param.strip_prefix("...") {
            if i + 1 != params.len() || !is_identifier(rest.trim()) {
                return Err(invalid());
            }
            continue;
        }
        match param.split_once('=') {
            Some((name, default)) => {
                if !is_identifier(name.trim()) || default.trim().is_empty() {
                    return Err(invalid());
                }
            }
            None if is_identifier(param) => {}
            None => return Err(invalid()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_src(src: &str) -> Block {
        parse_template(src).unwrap()
    }

    fn first_tag(block: &Block) -> &Tag {
        match &block.nodes[0] {
            Node::Tag(t) => t,
            other => panic!("expected tag, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_tags_and_text() {
        let root = parse_src("ul\n  li one\n  li two");
        let ul = first_tag(&root);
        assert_eq!(ul.name, "ul");
        assert_eq!(ul.block.nodes.len(), 2);
        let li = first_tag(&ul.block);
        assert_eq!(li.block.nodes, vec![Node::text("one", 2)]);
    }

    #[test]
    fn test_class_merge_dedup() {
        let root = parse_src("div.a(class=\"a b\" title=t).c");
        let tag = first_tag(&root);
        assert_eq!(tag.attrs[0], Attribute::new("class", "\"a b c\"", true));
        assert_eq!(tag.attrs[1], Attribute::new("title", "t", true));
        assert_eq!(tag.attrs.len(), 2);
    }

    #[test]
    fn test_computed_class_stays_separate() {
        let root = parse_src("p.x(class=cls)");
        let tag = first_tag(&root);
        assert_eq!(
            tag.attrs,
            vec![
                Attribute::new("class", "\"x\"", true),
                Attribute::new("class", "cls", true)
            ]
        );
    }

    #[test]
    fn test_implicit_div_and_id() {
        let root = parse_src("#main.box");
        let tag = first_tag(&root);
        assert_eq!(tag.name, "div");
        assert_eq!(tag.attrs[0], Attribute::new("id", "\"main\"", true));
    }

    #[test]
    fn test_if_else_chain() {
        let root = parse_src("if a\n  p A\nelse if b\n  p B\nelse\n  p C");
        let Node::Conditional(c) = &root.nodes[0] else {
            panic!("expected conditional");
        };
        assert_eq!(c.test, "a");
        let alt = c.alternate.as_ref().unwrap();
        let Node::Conditional(nested) = &alt.nodes[0] else {
            panic!("expected nested conditional");
        };
        assert_eq!(nested.test, "b");
        assert!(nested.alternate.is_some());
        assert_eq!(root.nodes.len(), 1);
    }

    #[test]
    fn test_unless_negates() {
        let root = parse_src("unless done\n  p todo");
        let Node::Conditional(c) = &root.nodes[0] else {
            panic!("expected conditional");
        };
        assert_eq!(c.test, "!(done)");
    }

    #[test]
    fn test_each_with_else() {
        let root = parse_src("each x, i in xs\n  li= x\nelse\n  li empty");
        let Node::Each(e) = &root.nodes[0] else {
            panic!("expected each");
        };
        assert_eq!(e.key.as_deref(), Some("i"));
        assert!(e.alternate.is_some());
    }

    #[test]
    fn test_case_with_fallthrough() {
        let root = parse_src("case n\n  when 1\n  when 2: p low\n  default: p other");
        let Node::Case(c) = &root.nodes[0] else {
            panic!("expected case");
        };
        assert_eq!(c.block.nodes.len(), 3);
        let Node::When(first) = &c.block.nodes[0] else {
            panic!("expected when");
        };
        assert!(first.block.is_none());
        let Node::When(last) = &c.block.nodes[2] else {
            panic!("expected when");
        };
        assert!(last.is_default());
    }

    #[test]
    fn test_piped_text_joined_with_newline() {
        let root = parse_src("p\n  | one\n  | two");
        let p = first_tag(&root);
        assert_eq!(
            p.block.nodes,
            vec![Node::text("one", 2), Node::text("\n", 3), Node::text("two", 3)]
        );
    }

    #[test]
    fn test_dot_block_text() {
        let root = parse_src("script.\n  a()\n  b()");
        let tag = first_tag(&root);
        let joined: String = tag
            .block
            .nodes
            .iter()
            .map(|n| match n {
                Node::Text(t) => t.val.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(joined, "a()\nb()");
    }

    #[test]
    fn test_extends_must_be_first() {
        assert!(parse_template("//- layout\nextends base").is_ok());
        let err = parse_template("p hi\nextends base").unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Parse(ParseError {
                kind: ParseErrorKind::ExtendsNotFirst,
                ..
            })
        ));
    }

    #[test]
    fn test_mixin_definition_and_call() {
        let root = parse_src("mixin card(title, body = 'x', ...rest)\n  h2= title\n+card('T')(class='big')\n  p inner");
        let Node::Mixin(def) = &root.nodes[0] else {
            panic!("expected mixin");
        };
        assert!(!def.call);
        let Node::Mixin(call) = &root.nodes[1] else {
            panic!("expected call");
        };
        assert!(call.call);
        assert_eq!(call.args.as_deref(), Some("'T'"));
        assert_eq!(call.attrs, vec![Attribute::new("class", "\"big\"", true)]);
        assert_eq!(call.block.as_ref().map(|b| b.nodes.len()), Some(1));
    }

    #[test]
    fn test_invalid_mixin_signature() {
        let err = parse_template("mixin m(...rest, a)\n  p").unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Parse(ParseError {
                kind: ParseErrorKind::InvalidMixinSignature(_),
                ..
            })
        ));
    }

    #[test]
    fn test_named_block_modes() {
        let root = parse_src("block content\n  p a\nappend scripts\n  script");
        let Node::NamedBlock(b) = &root.nodes[0] else {
            panic!("expected block");
        };
        assert_eq!(b.mode, BlockMode::Replace);
        let Node::NamedBlock(b) = &root.nodes[1] else {
            panic!("expected block");
        };
        assert_eq!(b.mode, BlockMode::Append);
    }

    #[test]
    fn test_block_expansion() {
        let root = parse_src("ul: li: a(href='/') x");
        let ul = first_tag(&root);
        let li = first_tag(&ul.block);
        let a = first_tag(&li.block);
        assert_eq!(a.name, "a");
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("a, 'b,c', f(1, 2), [3, 4]"),
            vec!["a", "'b,c'", "f(1, 2)", "[3, 4]"]
        );
        assert!(split_top_level("").is_empty());
    }
}
