#![allow(dead_code)]

use pugview::error::LoadError;
use pugview::{MemoryLoader, TemplateLoader};
use std::sync::atomic::{AtomicUsize, Ordering};

/// 统计 `load` 调用次数的内存加载器
#[derive(Default)]
pub struct CountingLoader {
    pub inner: MemoryLoader,
    loads: AtomicUsize,
}

impl CountingLoader {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            inner: MemoryLoader::from_assets(files),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl TemplateLoader for CountingLoader {
    fn load(&self, path: &str) -> Result<String, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(path)
    }

    fn modified(&self, path: &str) -> Option<u64> {
        self.inner.modified(path)
    }

    fn list(&self) -> Vec<String> {
        self.inner.list()
    }
}

/// 去掉标签之间的空白，用于比较 pretty 与紧凑输出
pub fn strip_inter_tag_whitespace(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut pending = String::new();
    let mut after_tag = false;
    for c in html.chars() {
        if c.is_whitespace() && (after_tag || out.is_empty()) {
            pending.push(c);
            continue;
        }
        if c != '<' {
            out.push_str(&pending);
        }
        pending.clear();
        out.push(c);
        after_tag = c == '>';
    }
    out
}
