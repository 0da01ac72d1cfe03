use crate::error::{LexError, LexErrorKind};
use crate::tpl::ast::BlockMode;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrToken {
    pub name: String,
    pub val: String,
    pub escape: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Tag(String),
    InterpolatedTag(String),
    Class(String),
    Id(String),
    Attrs(Vec<AttrToken>),
    AndAttributes(String),
    Text(String),
    Interpolation { expr: String, escape: bool },
    Code { val: String, buffer: bool, escape: bool },
    Comment { val: String, buffer: bool },
    TypeHint(String),
    Doctype(String),
    If(String),
    ElseIf(String),
    Else,
    Unless(String),
    Each { val: String, key: Option<String>, obj: String },
    EachOf { value: String, obj: String },
    While(String),
    Case(String),
    When(String),
    Default,
    MixinDef { name: String, args: Option<String> },
    Call { name: String, args: Option<String> },
    MixinBlock,
    Block { name: String, mode: BlockMode },
    Extends(String),
    Include { path: String, filters: Vec<String> },
    Yield,
    Colon,
    Dot,
    Slash,
    Newline,
    Indent,
    Outdent,
    Eos,
}

impl TokenKind {
    /// 用于错误信息的简短描述
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Tag(name) => format!("tag `{}`", name),
            TokenKind::InterpolatedTag(_) => "interpolated tag".into(),
            TokenKind::Class(c) => format!("class `.{}`", c),
            TokenKind::Id(id) => format!("id `#{}`", id),
            TokenKind::Attrs(_) => "attributes".into(),
            TokenKind::AndAttributes(_) => "`&attributes`".into(),
            TokenKind::Text(_) => "text".into(),
            TokenKind::Interpolation { .. } => "interpolation".into(),
            TokenKind::Code { .. } => "code".into(),
            TokenKind::Comment { .. } => "comment".into(),
            TokenKind::TypeHint(_) => "type hint".into(),
            TokenKind::Doctype(_) => "`doctype`".into(),
            TokenKind::If(_) => "`if`".into(),
            TokenKind::ElseIf(_) => "`else if`".into(),
            TokenKind::Else => "`else`".into(),
            TokenKind::Unless(_) => "`unless`".into(),
            TokenKind::Each { .. } | TokenKind::EachOf { .. } => "`each`".into(),
            TokenKind::While(_) => "`while`".into(),
            TokenKind::Case(_) => "`case`".into(),
            TokenKind::When(_) => "`when`".into(),
            TokenKind::Default => "`default`".into(),
            TokenKind::MixinDef { .. } => "`mixin`".into(),
            TokenKind::Call { name, .. } => format!("mixin call `+{}`", name),
            TokenKind::MixinBlock => "`block`".into(),
            TokenKind::Block { name, .. } => format!("block `{}`", name),
            TokenKind::Extends(_) => "`extends`".into(),
            TokenKind::Include { .. } => "`include`".into(),
            TokenKind::Yield => "`yield`".into(),
            TokenKind::Colon => "`:`".into(),
            TokenKind::Dot => "`.`".into(),
            TokenKind::Slash => "`/`".into(),
            TokenKind::Newline => "newline".into(),
            TokenKind::Indent => "indent".into(),
            TokenKind::Outdent => "outdent".into(),
            TokenKind::Eos => "end of input".into(),
        }
    }
}

/// 将模板源码切分为扁平的 token 流，缩进转换为 Indent / Outdent
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let normalized = source.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    Lexer::new(&normalized).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indent_stack: Vec<usize>,
    indent_char: Option<char>,
    /// `Some(interpolate)` once a `.` or comment opened a raw text block
    pending_text_block: Option<bool>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indent_stack: vec![0],
            indent_char: None,
            pending_text_block: None,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut first = true;
        while !self.eof() {
            let Some(width) = self.scan_indent()? else {
                self.skip_line();
                continue;
            };
            self.handle_indent(width, first)?;
            first = false;

            self.lex_statement()?;
            if !self.eof() && self.peek() != Some('\n') {
                return Err(self.error(LexErrorKind::UnexpectedCharacter(
                    self.peek().unwrap_or('\0'),
                )));
            }
            self.advance();

            if let Some(interpolate) = self.pending_text_block.take() {
                self.lex_text_block(interpolate)?;
            }
        }

        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Outdent);
        }
        self.push(TokenKind::Eos);
        Ok(self.tokens)
    }

    // ---- cursor helpers ----

    fn eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        let mut i = self.pos;
        for c in s.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }

    /// Matches a keyword followed by whitespace, end of line or `:`.
    fn keyword(&self, word: &str) -> bool {
        if !self.starts_with(word) {
            return false;
        }
        match self.chars.get(self.pos + word.chars().count()) {
            None | Some(' ') | Some('\t') | Some('\n') => true,
            Some(':') => matches!(word, "else" | "default" | "when"),
            _ => false,
        }
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
        }
    }

    fn rest_of_line(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }

    fn error(&self, kind: LexErrorKind) -> LexError {
        LexError {
            kind,
            line: self.line,
            col: self.col,
        }
    }

    fn push(&mut self, kind: TokenKind) {
        self.push_at(kind, self.line, self.col);
    }

    fn push_at(&mut self, kind: TokenKind, line: usize, col: usize) {
        self.tokens.push(Token { kind, line, col });
    }

    // ---- indentation ----

    /// 读取行首缩进，空行返回 None
    fn scan_indent(&mut self) -> Result<Option<usize>, LexError> {
        let start = self.pos;
        let mut seen: Option<char> = None;
        while let Some(c @ (' ' | '\t')) = self.peek() {
            if let Some(prev) = seen {
                if prev != c {
                    return Err(self.error(LexErrorKind::InvalidIndentation(
                        "mixed tabs and spaces".into(),
                    )));
                }
            }
            seen = Some(c);
            self.advance();
        }
        if matches!(self.peek(), None | Some('\n')) {
            return Ok(None);
        }
        if let Some(c) = seen {
            match self.indent_char {
                None => self.indent_char = Some(c),
                Some(expected) if expected != c => {
                    return Err(self.error(LexErrorKind::InvalidIndentation(format!(
                        "expected {} but found {}",
                        indent_name(expected),
                        indent_name(c)
                    ))));
                }
                Some(_) => {}
            }
        }
        Ok(Some(self.pos - start))
    }

    fn handle_indent(&mut self, width: usize, first: bool) -> Result<(), LexError> {
        let current = self.indent_stack.last().copied().unwrap_or(0);
        if width > current {
            if first {
                return Err(self.error(LexErrorKind::InvalidIndentation(
                    "first line must not be indented".into(),
                )));
            }
            self.indent_stack.push(width);
            self.push(TokenKind::Indent);
        } else if width < current {
            while self.indent_stack.last().is_some_and(|w| *w > width) {
                self.indent_stack.pop();
                self.push(TokenKind::Outdent);
            }
            if self.indent_stack.last().copied() != Some(width) {
                return Err(self.error(LexErrorKind::InvalidIndentation(format!(
                    "outdent to column {} matches no enclosing block",
                    width + 1
                ))));
            }
        } else if !first {
            self.push(TokenKind::Newline);
        }
        Ok(())
    }

    /// Consumes the lines nested under a `.` or a comment as raw text.
    fn lex_text_block(&mut self, interpolate: bool) -> Result<(), LexError> {
        let base = self.indent_stack.last().copied().unwrap_or(0);
        let mut lines: Vec<(String, usize, usize)> = Vec::new();
        let mut block_indent: Option<usize> = None;

        loop {
            if self.eof() {
                break;
            }
            let mut width = 0;
            while let Some(' ' | '\t') = self.peek_at(width) {
                width += 1;
            }
            let blank = matches!(self.peek_at(width), None | Some('\n'));
            if blank {
                lines.push((String::new(), self.line, 1));
                self.skip_line();
                continue;
            }
            if width <= base {
                break;
            }
            let indent = *block_indent.get_or_insert(width);
            let keep = width.saturating_sub(indent);
            self.advance_by(width);
            let (line, col) = (self.line, self.col);
            let content = format!("{}{}", " ".repeat(keep), self.rest_of_line());
            lines.push((content, line, col));
            self.advance();
        }

        while lines.last().is_some_and(|(s, _, _)| s.is_empty()) {
            lines.pop();
        }
        if lines.is_empty() {
            return Ok(());
        }

        self.push_at(TokenKind::Indent, lines[0].1, lines[0].2);
        for (i, (content, line, col)) in lines.into_iter().enumerate() {
            if i > 0 {
                self.push_at(TokenKind::Newline, line, col);
            }
            if interpolate {
                for kind in split_interpolations(&content, line, col)? {
                    self.push_at(kind, line, col);
                }
            } else {
                self.push_at(TokenKind::Text(content), line, col);
            }
        }
        self.push(TokenKind::Outdent);
        Ok(())
    }

    // ---- statements ----

    fn lex_statement(&mut self) -> Result<(), LexError> {
        let (line, col) = (self.line, self.col);

        if self.starts_with("//") {
            self.advance_by(2);
            let buffer = if self.peek() == Some('-') {
                self.advance();
                false
            } else {
                true
            };
            let val = self.rest_of_line();
            if !buffer && val.trim_start().starts_with("@type") {
                self.push_at(TokenKind::TypeHint(val.trim().to_string()), line, col);
            } else {
                self.push_at(TokenKind::Comment { val, buffer }, line, col);
                self.pending_text_block = Some(false);
            }
            return Ok(());
        }

        match self.peek() {
            Some('|') => {
                self.advance();
                if self.peek() == Some(' ') {
                    self.advance();
                }
                if self.rest_is_blank(0) {
                    self.skip_spaces();
                    self.push_at(TokenKind::Text(String::new()), line, col);
                    return Ok(());
                }
                return self.lex_text_rest();
            }
            Some('<') => return self.lex_text_rest(),
            Some('-') => {
                self.advance();
                let val = self.rest_of_line().trim().to_string();
                self.push_at(
                    TokenKind::Code {
                        val,
                        buffer: false,
                        escape: false,
                    },
                    line,
                    col,
                );
                return Ok(());
            }
            Some('=') | Some('!') if self.starts_with("=") || self.starts_with("!=") => {
                return self.lex_buffered_code();
            }
            Some('+') if self.peek_at(1).is_some_and(is_ident_start) => {
                self.advance();
                let name = self.take_while(is_mixin_name_char);
                let args = self.maybe_parens()?;
                self.push_at(TokenKind::Call { name, args }, line, col);
                return self.lex_tag_tail();
            }
            Some('#') if self.peek_at(1) == Some('{') => {
                self.advance();
                let expr = self.scan_balanced('{', '}', LexErrorKind::UnterminatedInterpolation)?;
                self.push_at(TokenKind::InterpolatedTag(expr.trim().to_string()), line, col);
                return self.lex_tag_tail();
            }
            _ => {}
        }

        if self.lex_keyword()? {
            return Ok(());
        }

        match self.peek() {
            Some(c) if is_ident_start(c) => {
                let name = self.scan_tag_name();
                self.push_at(TokenKind::Tag(name), line, col);
                self.lex_tag_tail()
            }
            Some('.') | Some('#') if self.peek_at(1).is_some_and(is_class_char) => {
                self.lex_tag_tail()
            }
            Some(c) => Err(self.error(LexErrorKind::UnexpectedCharacter(c))),
            None => Ok(()),
        }
    }

    fn lex_keyword(&mut self) -> Result<bool, LexError> {
        let (line, col) = (self.line, self.col);
        let word = [
            "doctype", "extends", "include", "block", "append", "prepend", "yield", "mixin",
            "if", "else", "unless", "each", "for", "while", "case", "when", "default",
        ]
        .into_iter()
        .find(|w| self.keyword(w) || (*w == "include" && self.starts_with("include:")));
        let Some(word) = word else {
            return Ok(false);
        };
        self.advance_by(word.len());

        let kind = match word {
            "doctype" => TokenKind::Doctype(self.rest_of_line().trim().to_string()),
            "extends" => TokenKind::Extends(self.rest_of_line().trim().to_string()),
            "include" => {
                let mut filters = Vec::new();
                while self.peek() == Some(':') {
                    self.advance();
                    filters.push(self.take_while(is_mixin_name_char));
                }
                let path = self.rest_of_line().trim().to_string();
                if path.is_empty() {
                    return Err(self.error(LexErrorKind::MalformedStatement("include")));
                }
                TokenKind::Include { path, filters }
            }
            "block" => {
                let rest = self.rest_of_line();
                let rest = rest.trim();
                if rest.is_empty() {
                    TokenKind::MixinBlock
                } else if let Some(name) = rest.strip_prefix("append ") {
                    block_token(name, BlockMode::Append)
                } else if let Some(name) = rest.strip_prefix("prepend ") {
                    block_token(name, BlockMode::Prepend)
                } else {
                    block_token(rest, BlockMode::Replace)
                }
            }
            "append" => block_token(&self.rest_of_line(), BlockMode::Append),
            "prepend" => block_token(&self.rest_of_line(), BlockMode::Prepend),
            "yield" => TokenKind::Yield,
            "mixin" => {
                self.skip_spaces();
                let name = self.take_while(is_mixin_name_char);
                if name.is_empty() {
                    return Err(self.error(LexErrorKind::MalformedStatement("mixin")));
                }
                let args = self.maybe_parens()?;
                TokenKind::MixinDef { name, args }
            }
            "if" => TokenKind::If(self.rest_of_line().trim().to_string()),
            "unless" => TokenKind::Unless(self.rest_of_line().trim().to_string()),
            "else" => {
                self.skip_spaces();
                if self.keyword("if") {
                    self.advance_by(2);
                    TokenKind::ElseIf(self.rest_of_line().trim().to_string())
                } else {
                    self.push_at(TokenKind::Else, line, col);
                    return self.lex_block_expansion().map(|_| true);
                }
            }
            "each" | "for" => parse_each(&self.rest_of_line())
                .ok_or_else(|| self.error(LexErrorKind::MalformedStatement("each")))?,
            "while" => TokenKind::While(self.rest_of_line().trim().to_string()),
            "case" => TokenKind::Case(self.rest_of_line().trim().to_string()),
            "when" => {
                self.skip_spaces();
                let expr = self.scan_when_expr()?;
                self.push_at(TokenKind::When(expr), line, col);
                return self.lex_block_expansion().map(|_| true);
            }
            "default" => {
                self.push_at(TokenKind::Default, line, col);
                return self.lex_block_expansion().map(|_| true);
            }
            _ => return Ok(false),
        };
        self.push_at(kind, line, col);
        Ok(true)
    }

    /// `when`/`default`/`else` may carry `: statement` on the same line.
    fn lex_block_expansion(&mut self) -> Result<(), LexError> {
        self.skip_spaces();
        if self.peek() == Some(':') {
            self.push(TokenKind::Colon);
            self.advance();
            self.skip_spaces();
            return self.lex_statement();
        }
        if !matches!(self.peek(), None | Some('\n')) {
            return Err(self.error(LexErrorKind::UnexpectedCharacter(self.peek().unwrap_or('\0'))));
        }
        Ok(())
    }

    /// `when` 表达式在顶层 `:` 处结束（块展开）
    fn scan_when_expr(&mut self) -> Result<String, LexError> {
        let mut expr = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            if let Some(q) = quote {
                if c == '\\' {
                    expr.push(c);
                    self.advance();
                    if let Some(n) = self.advance() {
                        expr.push(n);
                    }
                    continue;
                }
                if c == q {
                    quote = None;
                }
            } else {
                match c {
                    '"' | '\'' | '`' => quote = Some(c),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' => depth = depth.saturating_sub(1),
                    ':' if depth == 0 && matches!(self.peek_at(1), None | Some(' ') | Some('\n')) => {
                        break;
                    }
                    _ => {}
                }
            }
            expr.push(c);
            self.advance();
        }
        if quote.is_some() {
            return Err(self.error(LexErrorKind::UnterminatedString));
        }
        Ok(expr.trim().to_string())
    }

    fn lex_buffered_code(&mut self) -> Result<(), LexError> {
        let (line, col) = (self.line, self.col);
        let escape = if self.peek() == Some('!') {
            self.advance_by(2);
            false
        } else {
            self.advance();
            true
        };
        let val = self.rest_of_line().trim().to_string();
        self.push_at(
            TokenKind::Code {
                val,
                buffer: true,
                escape,
            },
            line,
            col,
        );
        Ok(())
    }

    fn lex_text_rest(&mut self) -> Result<(), LexError> {
        let (line, col) = (self.line, self.col);
        let text = self.rest_of_line();
        for kind in split_interpolations(&text, line, col)? {
            self.push_at(kind, line, col);
        }
        Ok(())
    }

    /// Class/id shorthands, attributes and whatever follows a tag name.
    fn lex_tag_tail(&mut self) -> Result<(), LexError> {
        loop {
            let (line, col) = (self.line, self.col);
            match self.peek() {
                Some('.') if self.peek_at(1).is_some_and(is_class_char) => {
                    self.advance();
                    let name = self.take_while(is_class_char);
                    self.push_at(TokenKind::Class(name), line, col);
                }
                Some('#') if self.peek_at(1).is_some_and(is_class_char) => {
                    self.advance();
                    let name = self.take_while(is_class_char);
                    self.push_at(TokenKind::Id(name), line, col);
                }
                Some('(') => {
                    let attrs = self.scan_attrs()?;
                    self.push_at(TokenKind::Attrs(attrs), line, col);
                }
                _ if self.starts_with("&attributes(") => {
                    self.advance_by("&attributes".len());
                    let expr =
                        self.scan_balanced('(', ')', LexErrorKind::UnterminatedAttributes)?;
                    self.push_at(TokenKind::AndAttributes(expr.trim().to_string()), line, col);
                }
                _ => break,
            }
        }

        let (line, col) = (self.line, self.col);
        match self.peek() {
            Some('/') => {
                self.advance();
                self.push_at(TokenKind::Slash, line, col);
                self.skip_spaces();
                Ok(())
            }
            Some('.') if self.rest_is_blank(1) => {
                self.advance();
                self.skip_spaces();
                self.push_at(TokenKind::Dot, line, col);
                self.pending_text_block = Some(true);
                Ok(())
            }
            Some(':') if matches!(self.peek_at(1), Some(' ') | Some('\t')) => {
                self.advance();
                self.push_at(TokenKind::Colon, line, col);
                self.skip_spaces();
                self.lex_statement()
            }
            Some('=') | Some('!') if self.starts_with("=") || self.starts_with("!=") => {
                self.lex_buffered_code()
            }
            Some(' ') | Some('\t') => {
                self.advance();
                if self.rest_is_blank(0) {
                    self.skip_spaces();
                    return Ok(());
                }
                self.lex_text_rest()
            }
            None | Some('\n') => Ok(()),
            Some(c) => Err(self.error(LexErrorKind::UnexpectedCharacter(c))),
        }
    }

    fn rest_is_blank(&self, from: usize) -> bool {
        let mut i = self.pos + from;
        while let Some(c) = self.chars.get(i) {
            match c {
                '\n' => return true,
                ' ' | '\t' => i += 1,
                _ => return false,
            }
        }
        true
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }

    /// 标签名：`\w(?:[-:\w]*\w)?`，结尾的 `:`/`-` 不属于标签名
    fn scan_tag_name(&mut self) -> String {
        let mut len = 0;
        while self
            .peek_at(len)
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == ':')
        {
            len += 1;
        }
        while len > 1 && matches!(self.peek_at(len - 1), Some(':') | Some('-')) {
            len -= 1;
        }
        let name: String = self.chars[self.pos..self.pos + len].iter().collect();
        self.advance_by(len);
        name
    }

    fn maybe_parens(&mut self) -> Result<Option<String>, LexError> {
        if self.peek() == Some('(') {
            let inner = self.scan_balanced('(', ')', LexErrorKind::UnterminatedAttributes)?;
            Ok(Some(inner.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Reads a bracketed span (cursor on `open`), tracking nesting and quotes.
    /// Returns the inner text; may span several lines.
    fn scan_balanced(
        &mut self,
        open: char,
        close: char,
        unterminated: LexErrorKind,
    ) -> Result<String, LexError> {
        self.advance();
        let mut out = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        loop {
            let Some(c) = self.peek() else {
                let kind = if quote.is_some() {
                    LexErrorKind::UnterminatedString
                } else {
                    unterminated
                };
                return Err(self.error(kind));
            };
            if let Some(q) = quote {
                if c == '\\' {
                    out.push(c);
                    self.advance();
                    if let Some(n) = self.advance() {
                        out.push(n);
                    }
                    continue;
                }
                if c == '\n' && q != '`' {
                    return Err(self.error(LexErrorKind::UnterminatedString));
                }
                if c == q {
                    quote = None;
                }
            } else if c == '"' || c == '\'' || c == '`' {
                quote = Some(c);
            } else if c == open {
                depth += 1;
            } else if c == close {
                if depth == 0 {
                    self.advance();
                    return Ok(out);
                }
                depth -= 1;
            }
            out.push(c);
            self.advance();
        }
    }

    /// `(a="x", b=y c)` 属性列表，逗号或空白分隔
    fn scan_attrs(&mut self) -> Result<Vec<AttrToken>, LexError> {
        self.advance();
        let mut attrs = Vec::new();
        loop {
            while matches!(self.peek(), Some(' ' | '\t' | '\n' | ',')) {
                self.advance();
            }
            match self.peek() {
                None => return Err(self.error(LexErrorKind::UnterminatedAttributes)),
                Some(')') => {
                    self.advance();
                    return Ok(attrs);
                }
                _ => {}
            }

            let name = match self.peek() {
                Some(q @ ('"' | '\'')) => {
                    self.advance();
                    let mut s = String::new();
                    loop {
                        match self.advance() {
                            Some(c) if c == q => break,
                            Some('\n') | None => {
                                return Err(self.error(LexErrorKind::UnterminatedString));
                            }
                            Some(c) => s.push(c),
                        }
                    }
                    s
                }
                _ => {
                    let mut s = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_whitespace() || c == ',' || c == ')' || c == '=' {
                            break;
                        }
                        if c == '!' && self.peek_at(1) == Some('=') {
                            break;
                        }
                        s.push(c);
                        self.advance();
                    }
                    s
                }
            };
            if name.is_empty() {
                let c = self.peek().unwrap_or('\0');
                return Err(self.error(LexErrorKind::UnexpectedCharacter(c)));
            }

            self.skip_spaces();
            let escape = if self.starts_with("!=") {
                self.advance_by(2);
                Some(false)
            } else if self.peek() == Some('=') {
                self.advance();
                Some(true)
            } else {
                None
            };
            match escape {
                Some(escape) => {
                    let val = self.scan_attr_value()?;
                    attrs.push(AttrToken { name, val, escape });
                }
                None => attrs.push(AttrToken {
                    name,
                    val: "true".into(),
                    escape: true,
                }),
            }
        }
    }

    fn scan_attr_value(&mut self) -> Result<String, LexError> {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.advance();
        }
        let mut val = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        loop {
            let Some(c) = self.peek() else {
                let kind = if quote.is_some() {
                    LexErrorKind::UnterminatedString
                } else {
                    LexErrorKind::UnterminatedAttributes
                };
                return Err(self.error(kind));
            };
            if let Some(q) = quote {
                if c == '\\' {
                    val.push(c);
                    self.advance();
                    if let Some(n) = self.advance() {
                        val.push(n);
                    }
                    continue;
                }
                if c == '\n' && q != '`' {
                    return Err(self.error(LexErrorKind::UnterminatedString));
                }
                if c == q {
                    quote = None;
                }
                val.push(c);
                self.advance();
                continue;
            }
            match c {
                '"' | '\'' | '`' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' if depth == 0 => break,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => break,
                c if c.is_whitespace() && depth == 0 => {
                    if !self.value_continues(&val) {
                        break;
                    }
                }
                _ => {}
            }
            val.push(c);
            self.advance();
        }
        Ok(val.trim().to_string())
    }

    /// 空白处判断属性值表达式是否继续：前后紧邻运算符时视为同一表达式
    fn value_continues(&self, val: &str) -> bool {
        let Some(prev) = val.trim_end().chars().last() else {
            return true;
        };
        if "+-*/%<>=!&|?:.,(".contains(prev) {
            return true;
        }
        let mut i = self.pos;
        while self.chars.get(i).is_some_and(|c| c.is_whitespace()) {
            i += 1;
        }
        match self.chars.get(i) {
            Some(next) => "+*/%<>=&|?:.".contains(*next)
                || (*next == '!' && self.chars.get(i + 1) == Some(&'=')),
            None => false,
        }
    }
}

fn indent_name(c: char) -> &'static str {
    if c == '\t' { "tabs" } else { "spaces" }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_mixin_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn is_class_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn block_token(rest: &str, mode: BlockMode) -> TokenKind {
    TokenKind::Block {
        name: rest.trim().to_string(),
        mode,
    }
}

/// `val[, key] in obj` / `val of obj`
fn parse_each(rest: &str) -> Option<TokenKind> {
    let rest = rest.trim();
    let (vars, obj, of) = [" in ", " of "].iter().find_map(|sep| {
        rest.find(sep)
            .map(|i| (&rest[..i], &rest[i + sep.len()..], *sep == " of "))
    })?;
    let obj = obj.trim().to_string();
    if obj.is_empty() {
        return None;
    }
    let mut names = vars.split(',').map(str::trim);
    let val = names.next().filter(|s| is_identifier(s))?.to_string();
    let key = match names.next() {
        Some(k) if is_identifier(k) => Some(k.to_string()),
        Some(_) => return None,
        None => None,
    };
    if names.next().is_some() {
        return None;
    }
    if of {
        if key.is_some() {
            return None;
        }
        return Some(TokenKind::EachOf { value: val, obj });
    }
    Some(TokenKind::Each { val, key, obj })
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// 拆分文本中的 `#{}` / `!{}` 插值，`\#{` 表示字面量
pub(crate) fn split_interpolations(
    text: &str,
    line: usize,
    col: usize,
) -> Result<Vec<TokenKind>, LexError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '\\' && matches!(next, Some('#') | Some('!')) && chars.get(i + 2) == Some(&'{') {
            literal.push(chars[i + 1]);
            literal.push('{');
            i += 3;
            continue;
        }
        if (c == '#' || c == '!') && next == Some('{') {
            let start = i + 2;
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            let mut j = start;
            let mut end = None;
            while j < chars.len() {
                let d = chars[j];
                if let Some(q) = quote {
                    if d == '\\' {
                        j += 2;
                        continue;
                    }
                    if d == q {
                        quote = None;
                    }
                } else {
                    match d {
                        '"' | '\'' | '`' => quote = Some(d),
                        '{' => depth += 1,
                        '}' if depth == 0 => {
                            end = Some(j);
                            break;
                        }
                        '}' => depth -= 1,
                        _ => {}
                    }
                }
                j += 1;
            }
            let Some(end) = end else {
                return Err(LexError {
                    kind: LexErrorKind::UnterminatedInterpolation,
                    line,
                    col: col + i,
                });
            };
            if !literal.is_empty() {
                out.push(TokenKind::Text(std::mem::take(&mut literal)));
            }
            out.push(TokenKind::Interpolation {
                expr: chars[start..end].iter().collect::<String>().trim().to_string(),
                escape: c == '#',
            });
            i = end + 1;
            continue;
        }
        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() {
        out.push(TokenKind::Text(literal));
    }
    Ok(out)
}
