use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// 视图引擎配置
///
/// Deserializable from any serde format; `cache_ttl` is given in seconds
/// there. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewOptions {
    pub views_root: PathBuf,
    /// 模板扩展名（不含点）
    pub extension: String,
    pub pretty: bool,
    pub strict: bool,
    pub doctype: Option<String>,
    /// 最多缓存的模板数，0 表示不缓存
    pub cache_capacity: usize,
    /// 缓存有效期，0 表示不过期
    #[serde(deserialize_with = "duration_secs")]
    pub cache_ttl: Duration,
    /// 每次命中都检查依赖文件的修改时间
    pub check_modified: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            views_root: PathBuf::from("views"),
            extension: "pug".to_string(),
            pretty: false,
            strict: false,
            doctype: None,
            cache_capacity: 128,
            cache_ttl: Duration::from_secs(300),
            check_modified: true,
        }
    }
}

fn duration_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl ViewOptions {
    pub fn new(views_root: impl Into<PathBuf>) -> Self {
        Self {
            views_root: views_root.into(),
            ..Self::default()
        }
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn doctype(mut self, doctype: impl Into<String>) -> Self {
        self.doctype = Some(doctype.into());
        self
    }

    pub fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }

    pub fn check_modified(mut self, check_modified: bool) -> Self {
        self.check_modified = check_modified;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let options = ViewOptions::new("templates")
            .extension(".jade")
            .pretty(true)
            .cache_capacity(4)
            .cache_ttl(Duration::from_millis(50));
        assert_eq!(options.views_root, PathBuf::from("templates"));
        assert_eq!(options.extension, "jade");
        assert!(options.pretty);
        assert!(!options.strict);
        assert_eq!(options.cache_capacity, 4);
        assert_eq!(options.cache_ttl, Duration::from_millis(50));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let options: ViewOptions =
            serde_json::from_str(r#"{"views_root": "site", "cache_ttl": 10, "doctype": "html"}"#)
                .unwrap();
        assert_eq!(options.views_root, PathBuf::from("site"));
        assert_eq!(options.cache_ttl, Duration::from_secs(10));
        assert_eq!(options.doctype.as_deref(), Some("html"));
        assert_eq!(options.extension, "pug");
        assert_eq!(options.cache_capacity, 128);
        assert!(options.check_modified);
    }
}
