mod common;

use common::{CountingLoader, strip_inter_tag_whitespace};
use pugview::error::{InheritanceError, TemplateError};
use pugview::{TemplateLoader, Value, ViewEngine, ViewOptions};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn write(root: &Path, name: &str, source: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, source).unwrap();
}

#[test]
fn test_three_file_chain_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "base.pug", "section\n  block content\n    p A");
    write(dir.path(), "middle.pug", "extends base\nblock append content\n  p B");
    write(dir.path(), "leaf.pug", "extends middle\nblock prepend content\n  p C");

    let engine = ViewEngine::new(ViewOptions::new(dir.path()));
    assert_eq!(
        engine.render("leaf", &()).unwrap(),
        "<section><p>C</p><p>A</p><p>B</p></section>"
    );
}

#[test]
fn test_mixin_card_with_default() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "cards.pug",
        "mixin card(title, body = 'Nothing here')\n  .card\n    h2= title\n    p= body\n\
         +card(\"Hi\", \"World\")\n+card(\"Empty\")\n+missing(1)",
    );
    let engine = ViewEngine::new(ViewOptions::new(dir.path()));
    assert_eq!(
        engine.render("cards", &()).unwrap(),
        "<div class=\"card\"><h2>Hi</h2><p>World</p></div>\
         <div class=\"card\"><h2>Empty</h2><p>Nothing here</p></div>\
         <!-- mixin not found: missing -->"
    );
}

#[test]
fn test_modified_file_is_reparsed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "page.pug", "p first");
    let engine = ViewEngine::new(ViewOptions::new(dir.path()));
    assert_eq!(engine.render("page", &()).unwrap(), "<p>first</p>");

    write(dir.path(), "page.pug", "p second");
    let file = fs::File::options()
        .write(true)
        .open(dir.path().join("page.pug"))
        .unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(10))
        .unwrap();
    assert_eq!(engine.render("page", &()).unwrap(), "<p>second</p>");
}

#[test]
fn test_ttl_controls_reloading() {
    let loader = Arc::new(CountingLoader::new(&[("a.pug", "p a")]));
    let options = ViewOptions::default()
        .cache_ttl(Duration::from_millis(50))
        .check_modified(false);
    let engine = ViewEngine::with_loader(options, loader.clone());

    let first = engine.template("a").unwrap();
    let second = engine.template("a").unwrap();
    assert_eq!(first, second);
    assert_eq!(loader.loads(), 1);

    std::thread::sleep(Duration::from_millis(80));
    let third = engine.template("a").unwrap();
    assert_eq!(loader.loads(), 2);
    assert_eq!(first.ast, third.ast);
}

#[test]
fn test_changed_include_reloads_page() {
    let loader = Arc::new(CountingLoader::new(&[
        ("page.pug", "include part"),
        ("part.pug", "p old"),
    ]));
    let engine = ViewEngine::with_loader(ViewOptions::default(), loader.clone());
    assert_eq!(engine.render("page", &()).unwrap(), "<p>old</p>");
    assert_eq!(engine.render("page", &()).unwrap(), "<p>old</p>");
    assert_eq!(loader.loads(), 2);

    loader.inner.insert("part.pug", "p new");
    assert_eq!(engine.render("page", &()).unwrap(), "<p>new</p>");
    assert_eq!(loader.loads(), 4);
}

#[test]
fn test_lru_capacity() {
    let loader = Arc::new(CountingLoader::new(&[
        ("a.pug", "p a"),
        ("b.pug", "p b"),
        ("c.pug", "p c"),
    ]));
    let engine = ViewEngine::with_loader(ViewOptions::default().cache_capacity(2), loader.clone());
    for name in ["a", "b", "a", "c", "a"] {
        engine.template(name).unwrap();
    }
    assert_eq!(loader.loads(), 3);
    let stats = engine.cache_stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.evictions, 1);

    engine.template("b").unwrap();
    assert_eq!(loader.loads(), 4);
}

#[test]
fn test_escaping_and_attributes() {
    let engine = ViewEngine::with_loader(
        ViewOptions::default(),
        Arc::new(CountingLoader::new(&[(
            "x.pug",
            "p #{s} !{s}\na.a(class={b: true, c: false} href=url data-n=n)\ninput(disabled=off)",
        )])),
    );
    let data: Value = [
        ("s", Value::from("<b>")),
        ("url", Value::from("/?a=1&b=\"2\"")),
        ("n", Value::Int(3)),
        ("off", Value::Bool(false)),
    ]
    .into_iter()
    .collect();
    assert_eq!(
        engine.render_value("x", &data).unwrap(),
        "<p>&lt;b&gt; <b></p>\
         <a class=\"a b\" href=\"/?a=1&amp;b=&quot;2&quot;\" data-n=\"3\"></a>\
         <input/>"
    );
}

#[derive(Serialize)]
struct Article {
    title: String,
    body: String,
    tags: Vec<&'static str>,
}

#[test]
fn test_pretty_and_compact_agree() {
    let files = [(
        "article.pug",
        "article\n  h1= title\n  p.body= body\n  ul\n    each tag in tags\n      li= tag\n  pre\n    code  keep   spaces",
    )];
    let article = Article {
        title: "Tom & Jerry".into(),
        body: "Line  with  spaces <and> tags".into(),
        tags: vec!["a", "b"],
    };

    let compact = ViewEngine::with_loader(ViewOptions::default(), Arc::new(CountingLoader::new(&files)));
    let pretty = ViewEngine::with_loader(
        ViewOptions::default().pretty(true),
        Arc::new(CountingLoader::new(&files)),
    );
    let a = compact.render("article", &article).unwrap();
    let b = pretty.render("article", &article).unwrap();
    assert_ne!(a, b);
    assert!(b.contains("\n  <h1>"));
    assert!(a.contains("<p class=\"body\">Line  with  spaces &lt;and&gt; tags</p>"));
    assert!(b.contains("<p class=\"body\">Line  with  spaces &lt;and&gt; tags</p>"));
    assert_eq!(strip_inter_tag_whitespace(&a), strip_inter_tag_whitespace(&b));

    // 相同输入重复渲染结果一致
    assert_eq!(compact.render("article", &article).unwrap(), a);
}

#[test]
fn test_structural_errors() {
    let engine = ViewEngine::with_loader(
        ViewOptions::default(),
        Arc::new(CountingLoader::new(&[
            ("a.pug", "extends b"),
            ("b.pug", "extends a"),
            ("bad.pug", "div\n   p\n  p"),
        ])),
    );
    assert!(matches!(
        engine.render("a", &()),
        Err(TemplateError::Inheritance(InheritanceError::CyclicExtends { .. }))
    ));
    assert!(matches!(
        engine.render("../etc/passwd", &()),
        Err(TemplateError::Inheritance(InheritanceError::PathEscapesRoot { .. }))
    ));
    match engine.render("bad", &()) {
        Err(TemplateError::InFile { path, source }) => {
            assert_eq!(path, "bad.pug");
            assert!(matches!(*source, TemplateError::Lex(_)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_warm_lists_templates() {
    let loader = Arc::new(CountingLoader::new(&[
        ("a.pug", "p a"),
        ("nested/b.pug", "p b"),
        ("notes.txt", "not a template"),
    ]));
    assert_eq!(loader.list().len(), 3);
    let engine = ViewEngine::with_loader(ViewOptions::default(), loader.clone());
    assert_eq!(engine.warm().unwrap(), 2);
    assert_eq!(engine.render("nested/b", &()).unwrap(), "<p>b</p>");
    assert_eq!(loader.loads(), 2);
}
