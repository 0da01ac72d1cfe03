use crate::error::LoadError;
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// 模板文件来源
///
/// Paths handed to a loader are already normalized (see [`normalize`]):
/// `/`-separated, relative to the views root, without `.` or `..`
/// segments. `modified` returns an opaque stamp that changes whenever the
/// source changes; the cache compares stamps for equality only.
pub trait TemplateLoader: Send + Sync {
    fn load(&self, path: &str) -> Result<String, LoadError>;

    fn modified(&self, path: &str) -> Option<u64>;

    /// 所有可加载的文件（规范化路径）
    fn list(&self) -> Vec<String>;
}

/// 规范化模板路径：去掉前导 `/`，折叠 `.` 与 `..`
///
/// A `..` that would climb above the root fails with `PathEscapesRoot`.
pub fn normalize(path: &str) -> Result<String, LoadError> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(LoadError::PathEscapesRoot {
                        path: path.to_string(),
                    });
                }
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(LoadError::NotFound {
            path: path.to_string(),
        });
    }
    Ok(parts.join("/"))
}

/// 解析 include / extends 目标：`/` 开头相对根目录，否则相对当前文件所在目录；
/// 没有扩展名时补上默认扩展名
pub fn resolve_path(from: &str, target: &str, extension: &str) -> Result<String, LoadError> {
    let target = target.trim();
    let joined = if target.starts_with('/') {
        target.to_string()
    } else {
        match from.rfind('/') {
            Some(pos) => format!("{}/{}", &from[..pos], target),
            None => target.to_string(),
        }
    };
    let normalized = normalize(&joined)?;
    Ok(with_extension(normalized, extension))
}

pub(crate) fn with_extension(path: String, extension: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(&path);
    if extension.is_empty() || file_name.contains('.') {
        path
    } else {
        format!("{}.{}", path, extension)
    }
}

/// 文件扩展名（不含点）
pub(crate) fn extension_of(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    file_name.rfind('.').map(|pos| &file_name[pos + 1..])
}

/// 从文件系统加载模板，禁止访问根目录以外的文件
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, path: &str) -> Result<PathBuf, LoadError> {
        let normalized = normalize(path)?;
        let full = self.root.join(&normalized);
        // 符号链接可能指向根目录之外
        if let (Ok(root), Ok(real)) = (self.root.canonicalize(), full.canonicalize()) {
            if !real.starts_with(&root) {
                return Err(LoadError::PathEscapesRoot {
                    path: path.to_string(),
                });
            }
        }
        Ok(full)
    }
}

impl TemplateLoader for FsLoader {
    fn load(&self, path: &str) -> Result<String, LoadError> {
        let full = self.locate(path)?;
        if !full.is_file() {
            return Err(LoadError::NotFound {
                path: path.to_string(),
            });
        }
        tracing::debug!("loading template {}", full.display());
        fs::read_to_string(&full).map_err(|e| LoadError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    fn modified(&self, path: &str) -> Option<u64> {
        let full = self.locate(path).ok()?;
        let modified = fs::metadata(full).ok()?.modified().ok()?;
        let since = modified.duration_since(UNIX_EPOCH).ok()?;
        Some(since.as_nanos() as u64)
    }

    /// 递归列出根目录及其子目录下的所有文件
    fn list(&self) -> Vec<String> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
        files.sort();
        files
    }
}

/// 内存中的模板集合，修改时间用递增的修订号表示
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: DashMap<String, (String, u64)>,
    revision: AtomicU64,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由 `(路径, 源码)` 列表构建，`embedded_views!` 生成的代码调用它
    pub fn from_assets(assets: &[(&str, &str)]) -> Self {
        let loader = Self::new();
        for (path, source) in assets {
            loader.insert(path, *source);
        }
        loader
    }

    /// 新增或替换模板，并推进其修订号
    pub fn insert(&self, path: &str, source: impl Into<String>) {
        let key = normalize(path).unwrap_or_else(|_| path.to_string());
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.files.insert(key, (source.into(), revision));
    }

    pub fn remove(&self, path: &str) -> bool {
        let key = normalize(path).unwrap_or_else(|_| path.to_string());
        self.files.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl TemplateLoader for MemoryLoader {
    fn load(&self, path: &str) -> Result<String, LoadError> {
        let key = normalize(path)?;
        self.files
            .get(&key)
            .map(|entry| entry.value().0.clone())
            .ok_or(LoadError::NotFound {
                path: path.to_string(),
            })
    }

    fn modified(&self, path: &str) -> Option<u64> {
        let key = normalize(path).ok()?;
        self.files.get(&key).map(|entry| entry.value().1)
    }

    fn list(&self) -> Vec<String> {
        let mut files: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/./b/../c.pug").unwrap(), "a/c.pug");
        assert_eq!(normalize("a\\b.pug").unwrap(), "a/b.pug");
        assert!(matches!(
            normalize("../secret"),
            Err(LoadError::PathEscapesRoot { .. })
        ));
        assert!(matches!(normalize("/"), Err(LoadError::NotFound { .. })));
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            resolve_path("pages/home.pug", "../layout", "pug").unwrap(),
            "layout.pug"
        );
        assert_eq!(
            resolve_path("pages/home.pug", "partials/nav", "pug").unwrap(),
            "pages/partials/nav.pug"
        );
        assert_eq!(
            resolve_path("pages/home.pug", "/style.css", "pug").unwrap(),
            "style.css"
        );
        assert!(matches!(
            resolve_path("home.pug", "../../etc/passwd", "pug"),
            Err(LoadError::PathEscapesRoot { .. })
        ));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b.css"), Some("css"));
        assert_eq!(extension_of("a.d/b"), None);
    }

    #[test]
    fn test_memory_loader_revisions() {
        let loader = MemoryLoader::from_assets(&[("index.pug", "p hi")]);
        let first = loader.modified("index.pug").unwrap();
        assert_eq!(loader.load("/index.pug").unwrap(), "p hi");

        loader.insert("index.pug", "p bye");
        assert_ne!(loader.modified("index.pug"), Some(first));
        assert_eq!(loader.load("index.pug").unwrap(), "p bye");

        assert!(matches!(
            loader.load("missing.pug"),
            Err(LoadError::NotFound { .. })
        ));
        assert_eq!(loader.list(), vec!["index.pug".to_string()]);
    }

    #[test]
    fn test_fs_loader() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("partials")).unwrap();
        fs::write(dir.path().join("index.pug"), "p root").unwrap();
        fs::write(dir.path().join("partials/nav.pug"), "nav").unwrap();

        let loader = FsLoader::new(dir.path());
        assert_eq!(loader.load("index.pug").unwrap(), "p root");
        assert!(loader.modified("partials/nav.pug").is_some());
        assert_eq!(
            loader.list(),
            vec!["index.pug".to_string(), "partials/nav.pug".to_string()]
        );
        assert!(matches!(
            loader.load("nope.pug"),
            Err(LoadError::NotFound { .. })
        ));
        assert!(matches!(
            loader.load("../outside.pug"),
            Err(LoadError::PathEscapesRoot { .. })
        ));
    }
}
