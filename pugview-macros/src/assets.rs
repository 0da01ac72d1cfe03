use glob::glob;
use proc_macro::TokenStream;
use quote::quote;
use std::env;
use std::path::{Component, Path, PathBuf};
use syn::{LitStr, parse_macro_input};

/// 模式中第一个通配符之前的目录
fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        base.push(component);
    }
    // 模式本身指向单个文件时，以其所在目录为基准
    if base.as_os_str() == pattern && base.parent().is_some() {
        base.pop();
    }
    base
}

fn relative_name(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

pub fn embedded_views_impl(input: TokenStream) -> TokenStream {
    let pattern = parse_macro_input!(input as LitStr);
    let pattern_str = pattern.value();

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => dir,
        Err(_) => {
            return syn::Error::new(pattern.span(), "CARGO_MANIFEST_DIR is not set")
                .to_compile_error()
                .into();
        }
    };
    let root = PathBuf::from(manifest_dir);
    let base = root.join(glob_base(&pattern_str));
    let full_pattern = root.join(&pattern_str);

    let paths = match glob(&full_pattern.to_string_lossy()) {
        Ok(paths) => paths,
        Err(e) => {
            return syn::Error::new(pattern.span(), format!("无效的 glob 模式: {}", e))
                .to_compile_error()
                .into();
        }
    };

    let mut files: Vec<(String, String)> = paths
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let name = relative_name(&path, &base)?;
            Some((name, path.to_string_lossy().into_owned()))
        })
        .collect();
    files.sort();

    // include_str! 让文件变化触发重新编译
    let assets = files.iter().map(|(name, file)| {
        quote! { (#name, include_str!(#file)) }
    });

    quote! {
        ::pugview::loader::MemoryLoader::from_assets(&[#(#assets),*])
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("views/**/*.pug"), PathBuf::from("views"));
        assert_eq!(glob_base("a/b/*.pug"), PathBuf::from("a/b"));
        assert_eq!(glob_base("*.pug"), PathBuf::new());
        assert_eq!(glob_base("views/index.pug"), PathBuf::from("views"));
    }

    #[test]
    fn test_relative_name() {
        let base = Path::new("/app/views");
        assert_eq!(
            relative_name(Path::new("/app/views/partials/nav.pug"), base),
            Some("partials/nav.pug".to_string())
        );
        assert_eq!(relative_name(Path::new("/other/x.pug"), base), None);
    }
}
