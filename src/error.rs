use thiserror::Error;

/// 词法分析错误，携带出错位置（行列均从 1 开始）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (line {line}, column {col})")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub line: usize,
    pub col: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexErrorKind {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid indentation: {0}")]
    InvalidIndentation(String),
    #[error("unexpected character {0:?}")]
    UnexpectedCharacter(char),
    #[error("unterminated interpolation")]
    UnterminatedInterpolation,
    #[error("unterminated attribute list")]
    UnterminatedAttributes,
    #[error("malformed `{0}` statement")]
    MalformedStatement(&'static str),
}

/// 语法分析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (line {line}, column {col})")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub col: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("unclosed block: {0}")]
    UnclosedBlock(String),
    #[error("invalid mixin signature: {0}")]
    InvalidMixinSignature(String),
    #[error("invalid attribute list: {0}")]
    InvalidAttributeList(String),
    #[error("`extends` must be the first statement of a template")]
    ExtendsNotFirst,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalkError {
    #[error("a {kind} node cannot be replaced by zero or many nodes here")]
    ArrayReplaceNotAllowed { kind: &'static str },
}

/// Errors raised by the template loader collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("template not found: {path}")]
    NotFound { path: String },
    #[error("path escapes the views root: {path}")]
    PathEscapesRoot { path: String },
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
}

/// extends / include 解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InheritanceError {
    #[error("template not found: {path}")]
    FileNotFound { path: String },
    #[error("cyclic extends: {}", chain.join(" -> "))]
    CyclicExtends { chain: Vec<String> },
    #[error("cyclic include: {}", chain.join(" -> "))]
    CyclicInclude { chain: Vec<String> },
    #[error("`extends` must be the first statement in {path} (line {line})")]
    ExtendsNotFirst { path: String, line: usize },
    #[error("path escapes the views root: {path}")]
    PathEscapesRoot { path: String },
    #[error("included template {path} cannot use `extends`")]
    ExtendsInInclude { path: String },
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
}

impl From<LoadError> for InheritanceError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::NotFound { path } => InheritanceError::FileNotFound { path },
            LoadError::PathEscapesRoot { path } => InheritanceError::PathEscapesRoot { path },
            LoadError::Io { path, message } => InheritanceError::Io { path, message },
        }
    }
}

/// 表达式求值错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unsupported expression `{expr}`: {reason}")]
    UnsupportedExpression { expr: String, reason: String },
    #[error("missing context value `{path}`")]
    MissingValue { path: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("missing context value `{path}` (line {line})")]
    MissingContextValue { path: String, line: usize },
    #[error("evaluation failed at line {line}: {source}")]
    EvaluationError {
        line: usize,
        #[source]
        source: EvalError,
    },
    #[error("loop at line {line} exceeded {limit} iterations")]
    IterationLimit { line: usize, limit: usize },
    #[error("unresolved `{directive}` at line {line}")]
    UnresolvedDirective { directive: &'static str, line: usize },
}

/// 预编译（AOT）错误：编译期即失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("`{construct}` is not supported by the compiler (line {line})")]
    UnsupportedConstruct { construct: &'static str, line: usize },
    #[error("unsupported expression at line {line}: {source}")]
    UnsupportedExpression {
        line: usize,
        #[source]
        source: EvalError,
    },
    #[error("invalid render function name: {0}")]
    InvalidName(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("{0}")]
    Custom(String),
}

impl serde::ser::Error for ValueError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        ValueError::Custom(msg.to_string())
    }
}

/// Umbrella error returned by the view engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    Inheritance(#[from] InheritanceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("context serialization failed: {0}")]
    Value(#[from] ValueError),
    #[error("{path}: {source}")]
    InFile {
        path: String,
        #[source]
        source: Box<TemplateError>,
    },
}

impl TemplateError {
    pub(crate) fn in_file(self, path: &str) -> Self {
        match self {
            // 已带文件信息的错误不再重复包装
            e @ TemplateError::InFile { .. } => e,
            e @ TemplateError::Inheritance(_) => e,
            e => TemplateError::InFile {
                path: path.to_string(),
                source: Box::new(e),
            },
        }
    }
}

impl From<LoadError> for TemplateError {
    fn from(e: LoadError) -> Self {
        TemplateError::Inheritance(e.into())
    }
}
