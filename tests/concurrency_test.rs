mod common;

use common::CountingLoader;
use pugview::{Value, ViewEngine, ViewOptions};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renders_share_one_load() {
    let loader = Arc::new(CountingLoader::new(&[
        ("layout.pug", "main\n  block body"),
        ("page.pug", "extends layout\nblock body\n  p= 'Hello ' + name"),
    ]));
    let engine = Arc::new(ViewEngine::with_loader(ViewOptions::default(), loader.clone()));

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let data: Value = [("name", Value::from(format!("user{}", i)))]
                .into_iter()
                .collect();
            (i, engine.render_value("page", &data))
        }));
    }
    for handle in handles {
        let (i, html) = handle.await.unwrap();
        assert_eq!(html.unwrap(), format!("<main><p>Hello user{}</p></main>", i));
    }

    // page.pug 与 layout.pug 各读取一次
    assert_eq!(loader.loads(), 2);
    let stats = engine.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 31);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_engines() {
    let a = ViewEngine::with_loader(
        ViewOptions::default(),
        Arc::new(CountingLoader::new(&[("x.pug", "p a")])),
    );
    let b = ViewEngine::with_loader(
        ViewOptions::default().pretty(true),
        Arc::new(CountingLoader::new(&[("x.pug", "div\n  p b")])),
    );
    let (ra, rb) = tokio::join!(
        tokio::task::spawn_blocking(move || a.render("x", &()).map(|html| (html, a))),
        tokio::task::spawn_blocking(move || b.render("x", &()))
    );
    let (html, a) = ra.unwrap().unwrap();
    assert_eq!(html, "<p>a</p>");
    assert_eq!(rb.unwrap().unwrap(), "<div>\n  <p>b</p>\n</div>");
    a.shutdown();
}
