//! 模板语法树
//!
//! A closed set of node kinds; every pass (walker, mixin expansion,
//! inheritance, renderer, compiler) matches over [`Node`] exhaustively.
//! Child blocks are owned, and any subtree reused in several places is
//! deep-cloned, never shared.

/// An ordered sequence of sibling nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
    pub line: usize,
}

impl Block {
    pub fn new(line: usize) -> Self {
        Self {
            nodes: Vec::new(),
            line,
        }
    }

    pub fn with_nodes(nodes: Vec<Node>, line: usize) -> Self {
        Self { nodes, line }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 节点总数（含自身），用作缓存权重
    pub fn weight(&self) -> usize {
        1 + self.nodes.iter().map(Node::weight).sum::<usize>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedBlock {
    pub name: String,
    pub mode: BlockMode,
    pub nodes: Vec<Node>,
    pub line: usize,
}

/// 属性：值为表达式源码，`class="a"` 的值即字符串字面量 `"a"`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub val: String,
    pub escape: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, val: impl Into<String>, escape: bool) -> Self {
        Self {
            name: name.into(),
            val: val.into(),
            escape,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub attrs: Vec<Attribute>,
    /// `&attributes(expr)` spreads, in source order
    pub attribute_blocks: Vec<String>,
    pub block: Block,
    pub self_closing: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedTag {
    pub expr: String,
    pub attrs: Vec<Attribute>,
    pub attribute_blocks: Vec<String>,
    pub block: Block,
    pub self_closing: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub val: String,
    pub line: usize,
}

/// `= expr`, `!= expr`, `- code` and `#{}` / `!{}` interpolations
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub val: String,
    pub buffer: bool,
    pub escape: bool,
    pub block: Option<Block>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub test: String,
    pub consequent: Block,
    pub alternate: Option<Block>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Each {
    pub val: String,
    pub key: Option<String>,
    pub obj: String,
    pub block: Block,
    pub alternate: Option<Block>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EachOf {
    pub value: String,
    pub obj: String,
    pub block: Block,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct While {
    pub test: String,
    pub block: Block,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub expr: String,
    /// When 节点，按源码顺序
    pub block: Block,
    pub line: usize,
}

pub const DEFAULT_WHEN: &str = "default";

#[derive(Debug, Clone, PartialEq)]
pub struct When {
    /// `default` for the fallback branch
    pub expr: String,
    pub block: Option<Block>,
    pub line: usize,
}

impl When {
    pub fn is_default(&self) -> bool {
        self.expr == DEFAULT_WHEN
    }
}

/// Mixin 定义（`call == false`）或调用（`call == true`）
#[derive(Debug, Clone, PartialEq)]
pub struct Mixin {
    pub name: String,
    pub args: Option<String>,
    pub block: Option<Block>,
    pub call: bool,
    pub attrs: Vec<Attribute>,
    pub attribute_blocks: Vec<String>,
    pub line: usize,
}

/// 展开后 mixin 调用的一个形参绑定
#[derive(Debug, Clone, PartialEq)]
pub struct MixinArg {
    pub name: String,
    /// 实参（或默认值）表达式源码
    pub value: String,
    /// default values are evaluated inside the mixin, after earlier parameters
    pub default: bool,
}

/// 展开后的 mixin 调用
///
/// Arguments are evaluated in the caller's scope and bound in a fresh frame
/// for `body`. Locals assigned in that frame never reach the caller, and the
/// body sees none of the caller's locals other than template-level ones.
#[derive(Debug, Clone, PartialEq)]
pub struct MixinCall {
    pub name: String,
    pub args: Vec<MixinArg>,
    pub body: Block,
    pub line: usize,
}

/// 文件引用，不作为子节点遍历
#[derive(Debug, Clone, PartialEq)]
pub struct FileReference {
    pub path: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub file: FileReference,
    /// Content substituted at the included file's `yield`.
    pub block: Block,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawInclude {
    pub file: FileReference,
    /// [`Node::IncludeFilter`] nodes
    pub filters: Vec<Node>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extends {
    pub file: FileReference,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub val: String,
    pub buffer: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockComment {
    pub val: String,
    pub block: Block,
    pub buffer: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Doctype {
    pub val: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeFilter {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeHint {
    pub val: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Block(Block),
    NamedBlock(NamedBlock),
    Tag(Tag),
    InterpolatedTag(InterpolatedTag),
    Text(Text),
    Code(Code),
    Conditional(Conditional),
    Each(Each),
    EachOf(EachOf),
    While(While),
    Case(Case),
    When(When),
    Mixin(Mixin),
    MixinBlock { line: usize },
    MixinCall(MixinCall),
    /// content a call passed for `block`, rendered in the caller's frame
    CallerBlock(Block),
    Include(Include),
    RawInclude(RawInclude),
    Extends(Extends),
    Comment(Comment),
    BlockComment(BlockComment),
    Doctype(Doctype),
    IncludeFilter(IncludeFilter),
    TypeHint(TypeHint),
    YieldBlock { line: usize },
}

/// 节点类型标签，供 walker 的父节点栈使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Block,
    NamedBlock,
    Tag,
    InterpolatedTag,
    Text,
    Code,
    Conditional,
    Each,
    EachOf,
    While,
    Case,
    When,
    Mixin,
    MixinBlock,
    MixinCall,
    CallerBlock,
    Include,
    RawInclude,
    Extends,
    Comment,
    BlockComment,
    Doctype,
    IncludeFilter,
    TypeHint,
    YieldBlock,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Block => "Block",
            NodeKind::NamedBlock => "NamedBlock",
            NodeKind::Tag => "Tag",
            NodeKind::InterpolatedTag => "InterpolatedTag",
            NodeKind::Text => "Text",
            NodeKind::Code => "Code",
            NodeKind::Conditional => "Conditional",
            NodeKind::Each => "Each",
            NodeKind::EachOf => "EachOf",
            NodeKind::While => "While",
            NodeKind::Case => "Case",
            NodeKind::When => "When",
            NodeKind::Mixin => "Mixin",
            NodeKind::MixinBlock => "MixinBlock",
            NodeKind::MixinCall => "MixinCall",
            NodeKind::CallerBlock => "CallerBlock",
            NodeKind::Include => "Include",
            NodeKind::RawInclude => "RawInclude",
            NodeKind::Extends => "Extends",
            NodeKind::Comment => "Comment",
            NodeKind::BlockComment => "BlockComment",
            NodeKind::Doctype => "Doctype",
            NodeKind::IncludeFilter => "IncludeFilter",
            NodeKind::TypeHint => "TypeHint",
            NodeKind::YieldBlock => "YieldBlock",
        }
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Block(_) => NodeKind::Block,
            Node::NamedBlock(_) => NodeKind::NamedBlock,
            Node::Tag(_) => NodeKind::Tag,
            Node::InterpolatedTag(_) => NodeKind::InterpolatedTag,
            Node::Text(_) => NodeKind::Text,
            Node::Code(_) => NodeKind::Code,
            Node::Conditional(_) => NodeKind::Conditional,
            Node::Each(_) => NodeKind::Each,
            Node::EachOf(_) => NodeKind::EachOf,
            Node::While(_) => NodeKind::While,
            Node::Case(_) => NodeKind::Case,
            Node::When(_) => NodeKind::When,
            Node::Mixin(_) => NodeKind::Mixin,
            Node::MixinBlock { .. } => NodeKind::MixinBlock,
            Node::MixinCall(_) => NodeKind::MixinCall,
            Node::CallerBlock(_) => NodeKind::CallerBlock,
            Node::Include(_) => NodeKind::Include,
            Node::RawInclude(_) => NodeKind::RawInclude,
            Node::Extends(_) => NodeKind::Extends,
            Node::Comment(_) => NodeKind::Comment,
            Node::BlockComment(_) => NodeKind::BlockComment,
            Node::Doctype(_) => NodeKind::Doctype,
            Node::IncludeFilter(_) => NodeKind::IncludeFilter,
            Node::TypeHint(_) => NodeKind::TypeHint,
            Node::YieldBlock { .. } => NodeKind::YieldBlock,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Node::Block(n) => n.line,
            Node::NamedBlock(n) => n.line,
            Node::Tag(n) => n.line,
            Node::InterpolatedTag(n) => n.line,
            Node::Text(n) => n.line,
            Node::Code(n) => n.line,
            Node::Conditional(n) => n.line,
            Node::Each(n) => n.line,
            Node::EachOf(n) => n.line,
            Node::While(n) => n.line,
            Node::Case(n) => n.line,
            Node::When(n) => n.line,
            Node::Mixin(n) => n.line,
            Node::MixinBlock { line } => *line,
            Node::MixinCall(n) => n.line,
            Node::CallerBlock(n) => n.line,
            Node::Include(n) => n.line,
            Node::RawInclude(n) => n.line,
            Node::Extends(n) => n.line,
            Node::Comment(n) => n.line,
            Node::BlockComment(n) => n.line,
            Node::Doctype(n) => n.line,
            Node::IncludeFilter(n) => n.line,
            Node::TypeHint(n) => n.line,
            Node::YieldBlock { line } => *line,
        }
    }

    pub fn text(val: impl Into<String>, line: usize) -> Node {
        Node::Text(Text {
            val: val.into(),
            line,
        })
    }

    /// 可见的 HTML 注释标记，用于软失败（如 mixin 未定义）
    pub fn marker(message: impl AsRef<str>, line: usize) -> Node {
        Node::Comment(Comment {
            val: format!(" {} ", message.as_ref()),
            buffer: true,
            line,
        })
    }

    fn weight(&self) -> usize {
        let children = match self {
            Node::Block(b) => b.weight(),
            Node::NamedBlock(b) => b.nodes.iter().map(Node::weight).sum(),
            Node::Tag(t) => t.block.weight(),
            Node::InterpolatedTag(t) => t.block.weight(),
            Node::Code(c) => c.block.as_ref().map_or(0, Block::weight),
            Node::Conditional(c) => {
                c.consequent.weight() + c.alternate.as_ref().map_or(0, Block::weight)
            }
            Node::Each(e) => e.block.weight() + e.alternate.as_ref().map_or(0, Block::weight),
            Node::EachOf(e) => e.block.weight(),
            Node::While(w) => w.block.weight(),
            Node::Case(c) => c.block.weight(),
            Node::When(w) => w.block.as_ref().map_or(0, Block::weight),
            Node::Mixin(m) => m.block.as_ref().map_or(0, Block::weight),
            Node::MixinCall(m) => m.body.weight(),
            Node::CallerBlock(b) => b.weight(),
            Node::Include(i) => i.block.weight(),
            Node::RawInclude(r) => r.filters.len(),
            Node::BlockComment(c) => c.block.weight(),
            _ => 0,
        };
        1 + children
    }
}
