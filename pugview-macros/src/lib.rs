use proc_macro::TokenStream;

mod assets;
mod compile;

/// 编译期嵌入模板文件，生成 `pugview::loader::MemoryLoader`
///
/// ```ignore
/// let loader = embedded_views!("views/**/*.pug");
/// let engine = ViewEngine::with_loader(ViewOptions::default(), Arc::new(loader));
/// ```
///
/// The glob is resolved against `CARGO_MANIFEST_DIR`; templates are named by
/// their path relative to the pattern's leading literal directory.
#[proc_macro]
pub fn embedded_views(input: TokenStream) -> TokenStream {
    assets::embedded_views_impl(input)
}

/// 预编译模板为渲染函数
///
/// ```ignore
/// compile_template!(render_home, "views/home.pug");
/// compile_template!(render_page, "views/page.pug", doctype = "html");
///
/// let mut out = String::new();
/// render_home(&ctx, &mut out);
/// ```
///
/// Constructs outside the compiled subset are reported as compile errors.
#[proc_macro]
pub fn compile_template(input: TokenStream) -> TokenStream {
    compile::compile_template_impl(input)
}
