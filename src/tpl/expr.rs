//! 内嵌表达式：解析与求值
//!
//! A deliberately small JavaScript subset: literals (numbers, strings,
//! booleans, `null`/`undefined`, arrays, objects), identifiers, `.prop` and
//! `[index]` access, `!`, unary `-`, `+`, comparisons, `==`/`!=`/`===`/`!==`,
//! `&&`, `||`, the ternary operator and a few whitelisted calls. Anything
//! else is rejected with [`EvalError::UnsupportedExpression`].

use crate::error::EvalError;
use crate::tpl::render_context::Context;
use crate::tpl::runtime;
use crate::value::Value;
use indexmap::IndexMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Method {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Builtin(Builtin, Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    JsonStringify,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
        }
    }

    /// Applies the operator to two evaluated operands.
    pub fn apply(self, a: &Value, b: &Value) -> Value {
        use std::cmp::Ordering::*;
        let ord = || runtime::compare(a, b);
        Value::Bool(match self {
            BinaryOp::Add => return runtime::add(a, b),
            BinaryOp::Eq => runtime::loose_eq(a, b),
            BinaryOp::Ne => !runtime::loose_eq(a, b),
            BinaryOp::StrictEq => runtime::strict_eq(a, b),
            BinaryOp::StrictNe => !runtime::strict_eq(a, b),
            BinaryOp::Lt => ord() == Some(Less),
            BinaryOp::Le => matches!(ord(), Some(Less | Equal)),
            BinaryOp::Gt => ord() == Some(Greater),
            BinaryOp::Ge => matches!(ord(), Some(Greater | Equal)),
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Str(s)) => write!(f, "{}", Value::Str(s.clone()).to_json()),
            Expr::Literal(Value::Null) => f.write_str("null"),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Ident(name) => f.write_str(name),
            Expr::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Object(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Expr::Member(obj, name) => write!(f, "{}.{}", obj, name),
            Expr::Index(obj, key) => write!(f, "{}[{}]", obj, key),
            Expr::Method {
                receiver,
                name,
                args,
            } => {
                write!(f, "{}.{}(", receiver, name)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Builtin(func, args) => {
                f.write_str(match func {
                    Builtin::JsonStringify => "JSON.stringify(",
                    Builtin::String => "String(",
                })?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Not(e) => write!(f, "!{}", e),
            Expr::Neg(e) => write!(f, "-{}", e),
            Expr::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            Expr::And(a, b) => write!(f, "({} && {})", a, b),
            Expr::Or(a, b) => write!(f, "({} || {})", a, b),
            Expr::Ternary(c, a, b) => write!(f, "({} ? {} : {})", c, a, b),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

// ---- tokenizer ----

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    End,
}

const PUNCTUATION: &[&str] = &[
    "===", "!==", "...", "==", "!=", "<=", ">=", "&&", "||", "=>", "++", "--", "+=", "-=", "(",
    ")", "[", "]", "{", "}", ",", ".", "?", ":", "!", "<", ">", "+", "-", "*", "/", "%", "=",
    ";", "&", "|",
];

const RESERVED: &[&str] = &[
    "new", "typeof", "function", "delete", "void", "instanceof", "in", "this", "class", "var",
    "let", "const", "return",
];

fn unsupported(src: &str, reason: impl Into<String>) -> EvalError {
    EvalError::UnsupportedExpression {
        expr: src.to_string(),
        reason: reason.into(),
    }
}

fn lex(src: &str) -> Result<Vec<Tok>, EvalError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            let mut float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                float |= chars[i] == '.';
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                float = true;
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let tok = match (float, text.parse::<i64>()) {
                (false, Ok(n)) => Tok::Int(n),
                _ => Tok::Float(
                    text.parse()
                        .map_err(|_| unsupported(src, format!("invalid number `{}`", text)))?,
                ),
            };
            tokens.push(tok);
            continue;
        }
        if c == '"' || c == '\'' {
            i += 1;
            let mut s = String::new();
            loop {
                let Some(&d) = chars.get(i) else {
                    return Err(unsupported(src, "unterminated string literal"));
                };
                i += 1;
                match d {
                    '\\' => {
                        let Some(&e) = chars.get(i) else {
                            return Err(unsupported(src, "unterminated string literal"));
                        };
                        i += 1;
                        match e {
                            'n' => s.push('\n'),
                            't' => s.push('\t'),
                            'r' => s.push('\r'),
                            'u' => {
                                let hex: String = chars.iter().skip(i).take(4).collect();
                                let ch = u32::from_str_radix(&hex, 16)
                                    .ok()
                                    .and_then(char::from_u32)
                                    .ok_or_else(|| unsupported(src, "invalid unicode escape"))?;
                                s.push(ch);
                                i += 4;
                            }
                            other => s.push(other),
                        }
                    }
                    d if d == c => break,
                    d => s.push(d),
                }
            }
            tokens.push(Tok::Str(s));
            continue;
        }
        if c == '`' {
            return Err(unsupported(src, "template literals are not supported"));
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(&p) => {
                tokens.push(Tok::Punct(p));
                i += p.len();
            }
            None => return Err(unsupported(src, format!("unexpected character {:?}", c))),
        }
    }
    tokens.push(Tok::End);
    Ok(tokens)
}

// ---- parser ----

struct ExprParser<'s> {
    src: &'s str,
    tokens: Vec<Tok>,
    pos: usize,
}

/// 解析表达式源码
pub fn parse_expression(src: &str) -> Result<Expr, EvalError> {
    let tokens = lex(src)?;
    let mut parser = ExprParser {
        src,
        tokens,
        pos: 0,
    };
    if parser.peek() == &Tok::End {
        return Err(unsupported(src, "empty expression"));
    }
    let expr = parser.ternary()?;
    match parser.peek() {
        Tok::End => Ok(expr),
        tok => Err(parser.unexpected(tok)),
    }
}

impl ExprParser<'_> {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).unwrap_or(&Tok::End)
    }

    fn next(&mut self) -> Tok {
        let tok = self.peek().clone();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Tok::Punct(p) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), EvalError> {
        if self.eat(punct) {
            Ok(())
        } else {
            let tok = self.peek().clone();
            Err(unsupported(
                self.src,
                format!("expected `{}` but found {}", punct, describe(&tok)),
            ))
        }
    }

    fn unexpected(&self, tok: &Tok) -> EvalError {
        let reason = match tok {
            Tok::Punct(p) if matches!(*p, "-" | "*" | "/" | "%") => {
                format!("operator `{}` is not supported", p)
            }
            Tok::Punct(p) if p.contains('=') && !p.starts_with("==") && *p != "!=" => {
                "assignment is not supported in expressions".to_string()
            }
            other => format!("unexpected {}", describe(other)),
        };
        unsupported(self.src, reason)
    }

    fn ternary(&mut self) -> Result<Expr, EvalError> {
        let cond = self.or()?;
        if self.eat("?") {
            let then = self.ternary()?;
            self.expect(":")?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Ternary(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and()?;
        while self.eat("||") {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.equality()?;
        while self.eat("&&") {
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_op(&mut self, ops: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        let Tok::Punct(p) = self.peek() else {
            return None;
        };
        let op = ops.iter().find(|(s, _)| s == p).map(|(_, op)| *op)?;
        self.pos += 1;
        Some(op)
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        let ops = [
            ("===", BinaryOp::StrictEq),
            ("!==", BinaryOp::StrictNe),
            ("==", BinaryOp::Eq),
            ("!=", BinaryOp::Ne),
        ];
        let mut left = self.relational()?;
        while let Some(op) = self.binary_op(&ops) {
            let right = self.relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Expr, EvalError> {
        let ops = [
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ];
        let mut left = self.additive()?;
        while let Some(op) = self.binary_op(&ops) {
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        while self.eat("+") {
            let right = self.unary()?;
            left = Expr::Binary(BinaryOp::Add, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(match self.unary()? {
                Expr::Literal(Value::Int(n)) => Expr::Literal(Value::Int(-n)),
                Expr::Literal(Value::Float(n)) => Expr::Literal(Value::Float(-n)),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                match self.next() {
                    Tok::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    tok => return Err(self.unexpected(&tok)),
                }
            } else if self.eat("[") {
                let key = self.ternary()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else if self.eat("(") {
                let args = self.arguments(")")?;
                expr = self.call(expr, args)?;
            } else {
                return Ok(expr);
            }
        }
    }

    /// 仅允许白名单调用
    fn call(&self, callee: Expr, args: Vec<Expr>) -> Result<Expr, EvalError> {
        match callee {
            Expr::Ident(name) if name == "String" => Ok(Expr::Builtin(Builtin::String, args)),
            Expr::Member(obj, name) if *obj == Expr::Ident("JSON".into()) && name == "stringify" => {
                Ok(Expr::Builtin(Builtin::JsonStringify, args))
            }
            Expr::Member(receiver, name) if runtime::METHODS.contains(&name.as_str()) => {
                Ok(Expr::Method {
                    receiver,
                    name,
                    args,
                })
            }
            other => Err(unsupported(
                self.src,
                format!("call to `{}` is not allowed", other),
            )),
        }
    }

    fn arguments(&mut self, close: &str) -> Result<Vec<Expr>, EvalError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            if self.eat("...") {
                return Err(unsupported(self.src, "spread syntax is not supported"));
            }
            items.push(self.ternary()?);
            if !self.eat(",") {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Tok::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Tok::Float(n) => Ok(Expr::Literal(Value::Float(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Tok::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                "NaN" => Ok(Expr::Literal(Value::Float(f64::NAN))),
                kw if RESERVED.contains(&kw) => Err(unsupported(
                    self.src,
                    format!("`{}` is not supported", kw),
                )),
                _ => Ok(Expr::Ident(name)),
            },
            Tok::Punct("(") => {
                let inner = self.ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            Tok::Punct("[") => Ok(Expr::Array(self.arguments("]")?)),
            Tok::Punct("{") => self.object(),
            tok => Err(self.unexpected(&tok)),
        }
    }

    fn object(&mut self) -> Result<Expr, EvalError> {
        let mut entries = Vec::new();
        loop {
            if self.eat("}") {
                return Ok(Expr::Object(entries));
            }
            let key = match self.next() {
                Tok::Ident(k) | Tok::Str(k) => k,
                Tok::Int(n) => n.to_string(),
                tok => return Err(self.unexpected(&tok)),
            };
            let value = if self.eat(":") {
                self.ternary()?
            } else {
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.eat(",") {
                self.expect("}")?;
                return Ok(Expr::Object(entries));
            }
        }
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Int(n) => format!("number {}", n),
        Tok::Float(n) => format!("number {}", n),
        Tok::Str(_) => "string".into(),
        Tok::Ident(name) => format!("identifier `{}`", name),
        Tok::Punct(p) => format!("`{}`", p),
        Tok::End => "end of expression".into(),
    }
}

// ---- evaluation ----

/// 解析并求值
pub fn evaluate(src: &str, ctx: &Context) -> Result<Value, EvalError> {
    let expr = parse_expression(src)?;
    eval(&expr, ctx)
}

pub fn eval(expr: &Expr, ctx: &Context) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => match ctx.lookup(name) {
            Some(v) => Ok(v.clone()),
            None if ctx.is_strict() => Err(EvalError::MissingValue { path: name.clone() }),
            None => Ok(Value::Null),
        },
        Expr::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(|e| eval(e, ctx))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Object(entries) => {
            let mut map = IndexMap::with_capacity(entries.len());
            for (k, e) in entries {
                map.insert(k.clone(), eval(e, ctx)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Member(obj, name) => {
            let base = eval(obj, ctx)?;
            if ctx.is_strict() {
                if let Value::Map(m) = &base {
                    if !m.contains_key(name) {
                        return Err(EvalError::MissingValue {
                            path: expr.to_string(),
                        });
                    }
                }
            }
            Ok(runtime::member(&base, name))
        }
        Expr::Index(obj, key) => Ok(runtime::index(&eval(obj, ctx)?, &eval(key, ctx)?)),
        Expr::Method {
            receiver,
            name,
            args,
        } => {
            let recv = eval(receiver, ctx)?;
            let args = args
                .iter()
                .map(|e| eval(e, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            runtime::call_method(&recv, name, &args).ok_or_else(|| {
                unsupported(
                    &expr.to_string(),
                    format!("`{}` is not available on {}", name, recv.type_name()),
                )
            })
        }
        Expr::Builtin(func, args) => {
            let arg = match args.first() {
                Some(e) => eval(e, ctx)?,
                None => Value::Null,
            };
            Ok(match func {
                Builtin::JsonStringify => runtime::json_stringify(&arg),
                Builtin::String => runtime::string(&arg),
            })
        }
        Expr::Not(e) => Ok(runtime::not(&eval(e, ctx)?)),
        Expr::Neg(e) => Ok(runtime::negate(&eval(e, ctx)?)),
        Expr::Binary(op, a, b) => Ok(op.apply(&eval(a, ctx)?, &eval(b, ctx)?)),
        Expr::And(a, b) => {
            let left = eval(a, ctx)?;
            if left.is_truthy() { eval(b, ctx) } else { Ok(left) }
        }
        Expr::Or(a, b) => {
            let left = eval(a, ctx)?;
            if left.is_truthy() { Ok(left) } else { eval(b, ctx) }
        }
        Expr::Ternary(c, a, b) => {
            if eval(c, ctx)?.is_truthy() {
                eval(a, ctx)
            } else {
                eval(b, ctx)
            }
        }
    }
}

/// Parses unbuffered code: `[var|let|const] name = expr`.
pub fn parse_assignment(code: &str) -> Result<(String, Expr), EvalError> {
    let trimmed = code.trim().trim_end_matches(';');
    let body = ["var ", "let ", "const "]
        .iter()
        .find_map(|kw| trimmed.strip_prefix(kw))
        .unwrap_or(trimmed)
        .trim();
    let not_assignment = || unsupported(code, "only assignments are supported in unbuffered code");
    let eq = body.find('=').ok_or_else(not_assignment)?;
    let (name, rest) = (body[..eq].trim(), &body[eq + 1..]);
    if rest.starts_with('=') || !crate::tpl::lexer::is_identifier(name) {
        return Err(not_assignment());
    }
    Ok((name.to_string(), parse_expression(rest.trim())?))
}
