use crate::value::Value;

/// 渲染作用域：根数据 + 局部变量栈
///
/// Locals are owned so loop variables and assignments can outlive the
/// expression that produced them; lookups walk the stack from the top so
/// inner bindings shadow outer ones and the root data.
///
/// Every local belongs to a frame. Frame 0 is the template itself; each
/// mixin call opens a new frame that sees its own locals and those of frame
/// 0, but not the locals of whoever called it. Content passed to a mixin
/// (`block`) re-enters the caller's frame while it renders.
pub struct Context<'a> {
    root: &'a Value,
    locals: Vec<Local>,
    scopes: Vec<usize>,
    /// active frame chain, innermost last
    frames: Vec<usize>,
    /// `callers[id]` is the frame that opened frame `id`
    callers: Vec<usize>,
    strict: bool,
}

struct Local {
    key: String,
    value: Value,
    frame: usize,
}

impl<'a> Context<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            locals: Vec::new(),
            scopes: Vec::new(),
            frames: vec![0],
            callers: vec![0],
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn root(&self) -> &Value {
        self.root
    }

    fn frame(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    fn visible(&self, local: &Local) -> bool {
        local.frame == 0 || local.frame == self.frame()
    }

    pub fn push(&mut self, key: &str, value: Value) {
        let frame = self.frame();
        self.locals.push(Local {
            key: key.to_string(),
            value,
            frame,
        });
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(self.locals.len());
    }

    /// Drops every binding made since the matching `enter_scope`.
    pub fn exit_scope(&mut self) {
        if let Some(mark) = self.scopes.pop() {
            self.locals.truncate(mark);
        }
    }

    /// 进入新的 mixin 调用帧
    pub fn enter_frame(&mut self) {
        let id = self.callers.len();
        self.callers.push(self.frame());
        self.frames.push(id);
        self.enter_scope();
    }

    /// 回到当前帧的调用方帧，渲染调用方传入的内容
    pub fn enter_caller(&mut self) {
        let caller = self.callers.get(self.frame()).copied().unwrap_or(0);
        self.frames.push(caller);
        self.enter_scope();
    }

    /// Leaves a frame opened by `enter_frame` or `enter_caller`.
    pub fn exit_frame(&mut self) {
        self.exit_scope();
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// 赋值：更新当前帧内最近的同名局部变量，否则在当前作用域新建
    pub fn assign(&mut self, key: &str, value: Value) {
        let frame = self.frame();
        match self
            .locals
            .iter_mut()
            .rev()
            .find(|l| l.frame == frame && l.key == key)
        {
            Some(slot) => slot.value = value,
            None => self.push(key, value),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Value> {
        // 局部变量优先（从后往前以支持遮蔽）
        if let Some(local) = self
            .locals
            .iter()
            .rev()
            .find(|l| l.key == key && self.visible(l))
        {
            return Some(&local.value);
        }
        self.root.get(key)
    }
}
