//! 渲染运行时辅助函数
//!
//! Shared by the interpreting renderer and by code generated with the
//! ahead-of-time compiler, so both produce the same markup for the same
//! values. Everything here is infallible and allocation-light.

use crate::value::Value;
use std::cmp::Ordering;

pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// 美化输出时不换行的行内元素
pub const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "acronym", "b", "br", "code", "em", "font", "i", "img", "ins", "kbd", "map",
    "samp", "small", "span", "strong", "sub", "sup",
];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub fn is_inline(name: &str) -> bool {
    INLINE_ELEMENTS.contains(&name)
}

/// Doctype preamble for a `doctype` value (empty means html).
pub fn doctype_markup(val: &str) -> String {
    match val.trim() {
        "" | "html" => "<!DOCTYPE html>".into(),
        "xml" => r#"<?xml version="1.0" encoding="utf-8" ?>"#.into(),
        "transitional" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#.into(),
        "strict" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#.into(),
        "frameset" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#.into(),
        "1.1" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#.into(),
        "basic" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#.into(),
        "mobile" => r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#.into(),
        "plist" => r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#.into(),
        other => format!("<!DOCTYPE {}>", other),
    }
}

/// `doctype html` 启用简写模式：布尔属性不带值，空元素不加 `/`
pub fn is_terse_doctype(val: &str) -> bool {
    matches!(val.trim(), "" | "html")
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    push_escaped(&mut out, s);
    out
}

pub fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

/// Writes a value's text form, escaped or raw.
pub fn push_value(out: &mut String, value: &Value, escape: bool) {
    match value {
        Value::Null => {}
        Value::Str(s) if escape => push_escaped(out, s),
        Value::Str(s) => out.push_str(s),
        other if escape => push_escaped(out, &other.to_string()),
        other => out.push_str(&other.to_string()),
    }
}

// ---- value semantics ----

pub fn truthy(value: &Value) -> bool {
    value.is_truthy()
}

/// Top-level lookup in the render context root.
pub fn lookup(root: &Value, name: &str) -> Value {
    root.get(name).cloned().unwrap_or_default()
}

/// `obj.name`，字符串与数组支持 `length`
pub fn member(obj: &Value, name: &str) -> Value {
    match (obj, name) {
        (Value::Map(m), _) => m.get(name).cloned().unwrap_or_default(),
        (Value::Str(s), "length") => Value::Int(s.chars().count() as i64),
        (Value::List(items), "length") => Value::Int(items.len() as i64),
        (Value::List(items), _) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i).cloned())
            .unwrap_or_default(),
        _ => Value::Null,
    }
}

/// `obj[key]`
pub fn index(obj: &Value, key: &Value) -> Value {
    match (obj, key) {
        (Value::List(items), k) => as_index(k)
            .and_then(|i| items.get(i).cloned())
            .unwrap_or_else(|| match k {
                Value::Str(name) => member(obj, name),
                _ => Value::Null,
            }),
        (Value::Str(s), k) => match as_index(k) {
            Some(i) => s
                .chars()
                .nth(i)
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or_default(),
            None => match k {
                Value::Str(name) => member(obj, name),
                _ => Value::Null,
            },
        },
        (Value::Map(_), k) => member(obj, &k.to_string()),
        _ => Value::Null,
    }
}

fn as_index(key: &Value) -> Option<usize> {
    match key {
        Value::Int(i) if *i >= 0 => Some(*i as usize),
        Value::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as usize),
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}

/// 数值转换（JS `Number()` 的子集）
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        Value::Str(s) => {
            let t = s.trim();
            if t.is_empty() {
                0.0
            } else {
                t.parse().unwrap_or(f64::NAN)
            }
        }
        Value::List(_) | Value::Map(_) => f64::NAN,
    }
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

/// Loose equality: numbers compare across representations and against
/// numeric strings and booleans; `null` equals only `null`; lists and maps
/// compare structurally.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(_), _) | (Value::Map(_), _) | (_, Value::List(_)) | (_, Value::Map(_)) => {
            a == b
        }
        _ => to_number(a) == to_number(b),
    }
}

pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (x, y) if is_number(x) && is_number(y) => to_number(x) == to_number(y),
        _ => a == b,
    }
}

/// 比较：数值按数值，字符串按字典序，其余不可比较
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(_), _) | (Value::Map(_), _) | (_, Value::List(_)) | (_, Value::Map(_)) => {
            None
        }
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

/// `a + b`: string concatenation when either side is not numeric-like.
/// `null` concatenates as the empty string, matching how it renders.
pub fn add(a: &Value, b: &Value) -> Value {
    let numeric =
        |v: &Value| matches!(v, Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_));
    if !(numeric(a) && numeric(b)) {
        return Value::Str(format!("{}{}", a, b));
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(*y)
            .map(Value::Int)
            .unwrap_or(Value::Float(*x as f64 + *y as f64)),
        _ => Value::Float(to_number(a) + to_number(b)),
    }
}

pub fn negate(value: &Value) -> Value {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .unwrap_or(Value::Float(-(*i as f64))),
        other => Value::Float(-to_number(other)),
    }
}

pub fn not(value: &Value) -> Value {
    Value::Bool(!value.is_truthy())
}

pub fn json_stringify(value: &Value) -> Value {
    Value::Str(value.to_json())
}

pub fn string(value: &Value) -> Value {
    match value {
        Value::Null => Value::Str("null".into()),
        other => Value::Str(other.to_string()),
    }
}

/// Whitelisted method names, checked before evaluation.
pub const METHODS: &[&str] = &[
    "toUpperCase",
    "toLowerCase",
    "trim",
    "join",
    "includes",
    "toString",
];

/// 调用白名单方法；接收者类型不支持时返回 None
pub fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Option<Value> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    match (receiver, name) {
        (Value::Str(s), "toUpperCase") => Some(Value::Str(s.to_uppercase())),
        (Value::Str(s), "toLowerCase") => Some(Value::Str(s.to_lowercase())),
        (Value::Str(s), "trim") => Some(Value::Str(s.trim().to_string())),
        (Value::Str(s), "includes") => Some(Value::Bool(s.contains(&arg(0).to_string()))),
        (Value::List(items), "join") => {
            let sep = match arg(0) {
                Value::Null => ",".to_string(),
                other => other.to_string(),
            };
            let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
            Some(Value::Str(parts.join(&sep)))
        }
        (Value::List(items), "includes") => {
            let needle = arg(0);
            Some(Value::Bool(items.iter().any(|v| strict_eq(v, &needle))))
        }
        (Value::Map(_), "toString") => Some(Value::Str("[object Object]".into())),
        (Value::Null, _) => None,
        (other, "toString") => Some(Value::Str(other.to_string())),
        _ => None,
    }
}

// ---- attributes ----

/// One attribute with its evaluated value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub value: Value,
    pub escape: bool,
    /// literal value written in the template
    pub is_static: bool,
}

impl Attr {
    pub fn new(name: impl Into<String>, value: Value, escape: bool, is_static: bool) -> Self {
        Self {
            name: name.into(),
            value,
            escape,
            is_static,
        }
    }
}

/// 输出属性列表
///
/// `class` entries are merged into a single attribute placed where the first
/// one appeared: literal classes first, then computed ones (strings, arrays,
/// or maps of class name to condition). `&attributes` spreads are applied
/// after the regular attributes; any other repeated name keeps its first
/// position and takes the last value.
pub fn push_attrs(out: &mut String, attrs: &[Attr], spreads: &[Value], terse: bool) {
    let mut ordered: Vec<(String, Value, bool)> = Vec::new();
    let mut static_classes: Vec<String> = Vec::new();
    let mut dynamic_classes: Vec<String> = Vec::new();
    let mut has_class = false;

    fn place(ordered: &mut Vec<(String, Value, bool)>, name: &str, value: Value, escape: bool) {
        match ordered.iter_mut().find(|(n, _, _)| n == name) {
            Some(slot) => {
                slot.1 = value;
                slot.2 = escape;
            }
            None => ordered.push((name.to_string(), value, escape)),
        }
    }

    for attr in attrs {
        if attr.name == "class" {
            if !has_class {
                has_class = true;
                ordered.push(("class".into(), Value::Null, true));
            }
            let target = if attr.is_static {
                &mut static_classes
            } else {
                &mut dynamic_classes
            };
            class_tokens(&attr.value, target);
        } else {
            place(&mut ordered, &attr.name, attr.value.clone(), attr.escape);
        }
    }
    for spread in spreads {
        let Value::Map(entries) = spread else {
            continue;
        };
        for (name, value) in entries {
            if name == "class" {
                if !has_class {
                    has_class = true;
                    ordered.push(("class".into(), Value::Null, true));
                }
                class_tokens(value, &mut dynamic_classes);
            } else {
                place(&mut ordered, name, value.clone(), true);
            }
        }
    }

    for (name, value, escape) in ordered {
        if name == "class" {
            let mut classes = static_classes.clone();
            classes.extend(dynamic_classes.iter().cloned());
            if !classes.is_empty() {
                push_attr(out, "class", &Value::Str(classes.join(" ")), true, terse);
            }
        } else if name == "style" {
            push_attr(out, "style", &style_value(&value), escape, terse);
        } else {
            push_attr(out, &name, &value, escape, terse);
        }
    }
}

fn push_attr(out: &mut String, name: &str, value: &Value, escape: bool, terse: bool) {
    let text = match value {
        Value::Null | Value::Bool(false) => return,
        Value::Bool(true) => {
            out.push(' ');
            out.push_str(name);
            if !terse {
                out.push_str("=\"");
                out.push_str(name);
                out.push('"');
            }
            return;
        }
        Value::Str(s) => s.clone(),
        Value::List(_) | Value::Map(_) => value.to_json(),
        other => other.to_string(),
    };
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    if escape {
        push_escaped(out, &text);
    } else {
        out.push_str(&text);
    }
    out.push('"');
}

fn class_tokens(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null | Value::Bool(_) => {}
        Value::Str(s) => out.extend(s.split_whitespace().map(str::to_string)),
        Value::List(items) => {
            for item in items.iter().filter(|v| v.is_truthy()) {
                class_tokens(item, out);
            }
        }
        Value::Map(entries) => {
            for (name, on) in entries {
                if on.is_truthy() {
                    out.push(name.clone());
                }
            }
        }
        other => out.push(other.to_string()),
    }
}

/// `style` 支持对象写法：`{color: 'red'}` → `color:red;`
fn style_value(value: &Value) -> Value {
    match value {
        Value::Map(entries) => {
            let mut css = String::new();
            for (k, v) in entries {
                if matches!(v, Value::Null | Value::Bool(false)) {
                    continue;
                }
                css.push_str(k);
                css.push(':');
                css.push_str(&v.to_string());
                css.push(';');
            }
            Value::Str(css)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> Value {
        entries.iter().cloned().collect()
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape_html("<b>\"x\" & y</b>"), "&lt;b&gt;&quot;x&quot; &amp; y&lt;/b&gt;");
    }

    #[test]
    fn test_loose_equality() {
        assert!(loose_eq(&Value::Int(1), &Value::Float(1.0)));
        assert!(loose_eq(&Value::Int(2), &Value::Str("2".into())));
        assert!(!loose_eq(&Value::Null, &Value::Int(0)));
        assert!(!strict_eq(&Value::Int(2), &Value::Str("2".into())));
    }

    #[test]
    fn test_add_and_compare() {
        assert_eq!(add(&Value::Int(1), &Value::Int(2)), Value::Int(3));
        assert_eq!(
            add(&Value::Str("n=".into()), &Value::Int(2)),
            Value::Str("n=2".into())
        );
        assert_eq!(compare(&Value::Str("a".into()), &Value::Str("b".into())), Some(Ordering::Less));
        assert_eq!(compare(&Value::Int(3), &Value::Float(2.5)), Some(Ordering::Greater));
        assert_eq!(compare(&Value::List(vec![]), &Value::Int(1)), None);
    }

    #[test]
    fn test_member_length_and_index() {
        let list = Value::from(vec!["a", "b"]);
        assert_eq!(member(&list, "length"), Value::Int(2));
        assert_eq!(index(&list, &Value::Int(1)), Value::from("b"));
        assert_eq!(member(&Value::from("héllo"), "length"), Value::Int(5));
        assert_eq!(index(&Value::Null, &Value::Int(0)), Value::Null);
    }

    #[test]
    fn test_methods() {
        let s = Value::from(" Hi ");
        assert_eq!(call_method(&s, "trim", &[]), Some(Value::from("Hi")));
        assert_eq!(call_method(&s, "toUpperCase", &[]), Some(Value::from(" HI ")));
        let list = Value::from(vec!["a", "b"]);
        assert_eq!(
            call_method(&list, "join", &[Value::from("-")]),
            Some(Value::from("a-b"))
        );
        assert_eq!(
            call_method(&list, "includes", &[Value::from("b")]),
            Some(Value::Bool(true))
        );
        assert_eq!(call_method(&Value::Null, "trim", &[]), None);
        assert_eq!(call_method(&Value::Int(1), "trim", &[]), None);
    }

    #[test]
    fn test_class_merge_static_first() {
        let mut out = String::new();
        push_attrs(
            &mut out,
            &[
                Attr::new("class", map(&[("b", Value::Bool(true)), ("c", Value::Bool(false))]), true, false),
                Attr::new("class", Value::from("a"), true, true),
            ],
            &[],
            true,
        );
        assert_eq!(out, " class=\"a b\"");
    }

    #[test]
    fn test_boolean_attributes() {
        let attrs = [
            Attr::new("checked", Value::Bool(true), true, true),
            Attr::new("disabled", Value::Bool(false), true, true),
            Attr::new("title", Value::Null, true, false),
        ];
        let mut terse = String::new();
        push_attrs(&mut terse, &attrs, &[], true);
        assert_eq!(terse, " checked");
        let mut full = String::new();
        push_attrs(&mut full, &attrs, &[], false);
        assert_eq!(full, " checked=\"checked\"");
    }

    #[test]
    fn test_spread_and_style() {
        let mut out = String::new();
        push_attrs(
            &mut out,
            &[
                Attr::new("id", Value::from("x"), true, true),
                Attr::new("style", map(&[("color", Value::from("red"))]), true, false),
            ],
            &[map(&[("class", Value::from("big")), ("id", Value::from("y")), ("data-n", Value::Int(3))])],
            true,
        );
        assert_eq!(out, " id=\"y\" style=\"color:red;\" class=\"big\" data-n=\"3\"");
    }

    #[test]
    fn test_doctypes() {
        assert_eq!(doctype_markup("html"), "<!DOCTYPE html>");
        assert!(doctype_markup("xml").starts_with("<?xml"));
        assert_eq!(doctype_markup("custom thing"), "<!DOCTYPE custom thing>");
        assert!(is_terse_doctype("html"));
        assert!(!is_terse_doctype("strict"));
    }
}
