use crate::error::TemplateError;
use crate::loader::{FsLoader, TemplateLoader, extension_of, normalize, with_extension};
use crate::options::ViewOptions;
use crate::tpl::cache::{CacheStats, Loaded, Template, TemplateCache};
use crate::tpl::inherit::{Dependency, Resolver};
use crate::tpl::mixin::expand_template;
use crate::tpl::parser::parse_template;
use crate::tpl::render::{RenderOptions, render};
use crate::value::{Value, to_value};
use serde::Serialize;
use std::sync::Arc;

/// 视图引擎：按名称加载、解析、缓存并渲染模板
///
/// Each engine owns its loader and cache, so independently configured
/// engines can live side by side. The engine is `Send + Sync`; share it
/// between request handlers behind an `Arc`.
pub struct ViewEngine {
    options: ViewOptions,
    loader: Arc<dyn TemplateLoader>,
    cache: TemplateCache,
}

impl ViewEngine {
    /// 使用以 `views_root` 为根目录的文件系统加载器
    pub fn new(options: ViewOptions) -> Self {
        let loader = Arc::new(FsLoader::new(options.views_root.clone()));
        Self::with_loader(options, loader)
    }

    pub fn with_loader(options: ViewOptions, loader: Arc<dyn TemplateLoader>) -> Self {
        tracing::debug!(
            "view engine ready: root={}, extension={}, capacity={}, ttl={:?}",
            options.views_root.display(),
            options.extension,
            options.cache_capacity,
            options.cache_ttl
        );
        let cache = TemplateCache::new(options.cache_capacity, options.cache_ttl);
        Self {
            options,
            loader,
            cache,
        }
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    pub fn loader(&self) -> &Arc<dyn TemplateLoader> {
        &self.loader
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            pretty: self.options.pretty,
            strict: self.options.strict,
            doctype: self.options.doctype.clone(),
        }
    }

    /// 模板名到缓存键：规范化路径并补全扩展名
    fn key(&self, name: &str) -> Result<String, TemplateError> {
        let normalized = normalize(name)?;
        Ok(with_extension(normalized, &self.options.extension))
    }

    /// 取得完成解析的模板（缓存命中或加载）
    pub fn template(&self, name: &str) -> Result<Arc<Template>, TemplateError> {
        let key = self.key(name)?;
        let loader = self.loader.as_ref();
        let check_modified = self.options.check_modified;
        let is_fresh = |deps: &[Dependency]| {
            !check_modified || deps.iter().all(|d| loader.modified(&d.path) == d.modified)
        };
        self.cache.get_or_load(&key, is_fresh, || self.load(&key))
    }

    fn load(&self, key: &str) -> Loaded {
        let mut resolver = Resolver::new(self.loader.as_ref(), &self.options.extension);
        let result = resolver
            .load(key)
            .and_then(|ast| resolver.resolve(key, ast))
            .and_then(|ast| expand_template(ast).map_err(|e| TemplateError::from(e).in_file(key)));
        let dependencies = resolver.into_dependencies();
        if let Err(e) = &result {
            tracing::debug!("failed to load {}: {}", key, e);
        }
        Loaded {
            result: result.map(|ast| {
                Arc::new(Template {
                    path: key.to_string(),
                    ast,
                    dependencies: dependencies.clone(),
                })
            }),
            dependencies,
        }
    }

    pub fn render<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> Result<String, TemplateError> {
        let data = to_value(data)?;
        self.render_value(name, &data)
    }

    pub fn render_value(&self, name: &str, data: &Value) -> Result<String, TemplateError> {
        let template = self.template(name)?;
        render(&template.ast, data, &self.render_options())
            .map_err(|e| TemplateError::from(e).in_file(&template.path))
    }

    /// 渲染一段源码，不经过加载器和缓存；`include` / `extends` 无法解析
    pub fn render_inline<T: Serialize + ?Sized>(
        &self,
        source: &str,
        data: &T,
    ) -> Result<String, TemplateError> {
        let data = to_value(data)?;
        let ast = expand_template(parse_template(source)?)?;
        Ok(render(&ast, &data, &self.render_options())?)
    }

    /// 预加载加载器中的全部模板，返回数量
    pub fn warm(&self) -> Result<usize, TemplateError> {
        let mut count = 0;
        for path in self.loader.list() {
            if extension_of(&path) != Some(self.options.extension.as_str()) {
                continue;
            }
            self.template(&path)?;
            count += 1;
        }
        tracing::debug!("warmed {} templates", count);
        Ok(count)
    }

    pub fn invalidate(&self, name: &str) -> bool {
        match self.key(name) {
            Ok(key) => self.cache.invalidate(&key),
            Err(_) => false,
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// 释放全部缓存
    pub fn shutdown(self) {
        let stats = self.cache.stats();
        self.cache.clear();
        tracing::debug!(
            "view engine shut down: released {} templates ({} hits, {} misses)",
            stats.entries,
            stats.hits,
            stats.misses
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InheritanceError, RenderError};
    use crate::loader::MemoryLoader;
    use serde::Serialize;

    fn engine(files: &[(&str, &str)]) -> (Arc<MemoryLoader>, ViewEngine) {
        let loader = Arc::new(MemoryLoader::from_assets(files));
        let engine = ViewEngine::with_loader(ViewOptions::default(), loader.clone());
        (loader, engine)
    }

    #[derive(Serialize)]
    struct Page<'a> {
        title: &'a str,
        items: Vec<&'a str>,
    }

    #[test]
    fn test_render_serialize() {
        let (_, engine) = engine(&[("list.pug", "h1= title\nul\n  each item in items\n    li= item")]);
        let page = Page {
            title: "Fruit",
            items: vec!["apple", "pear"],
        };
        assert_eq!(
            engine.render("list", &page).unwrap(),
            "<h1>Fruit</h1><ul><li>apple</li><li>pear</li></ul>"
        );
    }

    #[test]
    fn test_cache_reuse_and_revision_reload() {
        let (loader, engine) = engine(&[("a.pug", "p one")]);
        let first = engine.template("a").unwrap();
        let second = engine.template("a.pug").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        loader.insert("a.pug", "p two");
        assert_eq!(engine.render_value("a", &Value::Null).unwrap(), "<p>two</p>");
        let stats = engine.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn test_dependency_change_reloads_parent() {
        let (loader, engine) = engine(&[
            ("layout.pug", "body\n  block main"),
            ("page.pug", "extends layout\nblock main\n  p page"),
        ]);
        assert_eq!(engine.render("page", &()).unwrap(), "<body><p>page</p></body>");
        loader.insert("layout.pug", "main\n  block main");
        assert_eq!(engine.render("page", &()).unwrap(), "<main><p>page</p></main>");
    }

    #[test]
    fn test_errors_carry_file() {
        let (_, engine) = engine(&[("bad.pug", "p= missing")]);
        assert!(matches!(
            engine.render("missing", &()),
            Err(TemplateError::Inheritance(InheritanceError::FileNotFound { .. }))
        ));

        let strict = ViewEngine::with_loader(
            ViewOptions::default().strict(true),
            Arc::new(MemoryLoader::from_assets(&[("bad.pug", "p= missing")])),
        );
        match strict.render("bad", &()).unwrap_err() {
            TemplateError::InFile { path, source } => {
                assert_eq!(path, "bad.pug");
                assert!(matches!(
                    *source,
                    TemplateError::Render(RenderError::MissingContextValue { .. })
                ));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.render("bad", &()).unwrap(), "<p></p>");
    }

    #[test]
    fn test_render_inline() {
        let (_, engine) = engine(&[]);
        let html = engine
            .render_inline("p Hello #{name}", &serde_json::json!({"name": "<Ada>"}))
            .unwrap();
        assert_eq!(html, "<p>Hello &lt;Ada&gt;</p>");
        assert_eq!(engine.cache_stats().entries, 0);
    }

    #[test]
    fn test_warm_invalidate_clear() {
        let (_, engine) = engine(&[("a.pug", "p a"), ("b.pug", "p b"), ("robots.txt", "x")]);
        assert_eq!(engine.warm().unwrap(), 2);
        assert_eq!(engine.cache_stats().entries, 2);
        assert!(engine.invalidate("a"));
        assert!(!engine.invalidate("a"));
        engine.clear();
        assert_eq!(engine.cache_stats().entries, 0);
        engine.shutdown();
    }

    #[test]
    fn test_pretty_option() {
        let loader = Arc::new(MemoryLoader::from_assets(&[("p.pug", "ul\n  li a\n  li b")]));
        let engine = ViewEngine::with_loader(ViewOptions::default().pretty(true), loader);
        assert_eq!(
            engine.render("p", &()).unwrap(),
            "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>"
        );
    }
}
