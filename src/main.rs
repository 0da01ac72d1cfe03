use pugview::{ViewEngine, ViewOptions};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Serialize)]
struct Post {
    title: String,
    author: String,
    tags: Vec<String>,
}

#[derive(Serialize)]
struct Page<'a> {
    title: &'a str,
    user: Option<&'a str>,
    posts: Vec<Post>,
}

fn posts() -> Vec<Post> {
    vec![
        Post {
            title: "Indentation is syntax".into(),
            author: "ada".into(),
            tags: vec!["pug".into(), "parsing".into()],
        },
        Post {
            title: "Caching templates".into(),
            author: "grace".into(),
            tags: vec![],
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let root = std::env::args().nth(1).unwrap_or_else(|| "demos/views".to_string());
    let engine = Arc::new(ViewEngine::new(ViewOptions::new(root).pretty(true)));
    let warmed = engine.warm()?;
    tracing::info!("{} templates loaded", warmed);

    // 模拟并发请求
    let mut handles = Vec::new();
    for user in [Some("ada"), None] {
        let engine = engine.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let page = Page {
                title: "Blog",
                user,
                posts: posts(),
            };
            engine.render("index", &page)
        }));
    }
    for handle in handles {
        println!("{}\n", handle.await??);
    }

    let stats = engine.cache_stats();
    tracing::info!(
        "cache: {} entries, {} hits, {} misses",
        stats.entries,
        stats.hits,
        stats.misses
    );
    if let Ok(engine) = Arc::try_unwrap(engine) {
        engine.shutdown();
    }
    Ok(())
}
