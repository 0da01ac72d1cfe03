use pugview::loader::TemplateLoader;
use pugview::{Value, ViewEngine, ViewOptions};
use pugview_macros::{compile_template, embedded_views};
use std::sync::Arc;

compile_template!(render_card, "tests/views/card.pug");
compile_template!(render_greeting, "tests/views/partials/greeting.pug", doctype = "html");

fn context(admin: bool) -> Value {
    [
        ("id", Value::Int(7)),
        ("title", Value::from("<Cards>")),
        ("name", Value::from("Ada")),
        ("admin", Value::Bool(admin)),
    ]
    .into_iter()
    .collect()
}

#[test]
fn test_embedded_views() {
    let loader = embedded_views!("tests/views/**/*.pug");
    assert_eq!(
        loader.list(),
        vec![
            "card.pug".to_string(),
            "index.pug".to_string(),
            "layout.pug".to_string(),
            "partials/greeting.pug".to_string(),
        ]
    );

    let engine = ViewEngine::with_loader(ViewOptions::default(), Arc::new(loader));
    let data: Value = [
        ("title", Value::from("Home")),
        ("name", Value::from("Ada")),
        ("items", Value::from(vec!["a", "b"])),
    ]
    .into_iter()
    .collect();
    assert_eq!(
        engine.render_value("index", &data).unwrap(),
        "<!DOCTYPE html><html><head><title>Home</title></head><body>\
         <h1>Hello Ada</h1><ul><li>a</li><li>b</li></ul></body></html>"
    );
}

#[test]
fn test_compiled_card() {
    let mut out = String::new();
    render_card(&context(true), &mut out);
    assert_eq!(
        out,
        "<!DOCTYPE html><div class=\"card\" data-id=\"7\"><h2 class=\"title\">&lt;Cards&gt;</h2>\
         <p class=\"badge\">Admin</p><input type=\"checkbox\" checked><!-- rendered comment--></div>"
    );
}

#[test]
fn test_compiled_matches_interpreter() {
    let loader = embedded_views!("tests/views/card.pug");
    let engine = ViewEngine::with_loader(ViewOptions::default(), Arc::new(loader));
    for admin in [true, false] {
        let ctx = context(admin);
        let mut compiled = String::new();
        render_card(&ctx, &mut compiled);
        assert_eq!(compiled, engine.render_value("card", &ctx).unwrap());
    }
}

#[test]
fn test_compiled_missing_fields_render_empty() {
    let mut out = String::new();
    render_greeting(&Value::Null, &mut out);
    assert_eq!(out, "<h1>Hello </h1>");
}
