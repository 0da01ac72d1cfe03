use proc_macro::TokenStream;
use pugview::tpl::compiler::{CompileOptions, compile_source};
use quote::quote;
use std::env;
use std::fs;
use std::path::PathBuf;
use syn::parse::{Parse, ParseStream};
use syn::{Ident, LitStr, Token, parse_macro_input};

/// `name, "path" [, doctype = "html"]`
struct CompileInput {
    name: Ident,
    path: LitStr,
    doctype: Option<LitStr>,
}

impl Parse for CompileInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Ident = input.parse()?;
        input.parse::<Token![,]>()?;
        let path: LitStr = input.parse()?;
        let mut doctype = None;
        while input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                break;
            }
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;
            let value: LitStr = input.parse()?;
            match key.to_string().as_str() {
                "doctype" => doctype = Some(value),
                other => {
                    return Err(syn::Error::new(
                        key.span(),
                        format!("unknown option `{}`", other),
                    ));
                }
            }
        }
        Ok(Self {
            name,
            path,
            doctype,
        })
    }
}

pub fn compile_template_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as CompileInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &CompileInput) -> syn::Result<proc_macro2::TokenStream> {
    let span = input.path.span();
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")
        .map_err(|_| syn::Error::new(span, "CARGO_MANIFEST_DIR is not set"))?;
    let file = PathBuf::from(manifest_dir).join(input.path.value());
    let source = fs::read_to_string(&file)
        .map_err(|e| syn::Error::new(span, format!("读取文件失败: {}: {}", file.display(), e)))?;

    let options = CompileOptions {
        doctype: input.doctype.as_ref().map(LitStr::value),
    };
    let compiled = compile_source(&input.name.to_string(), &source, &options)
        .map_err(|e| syn::Error::new(span, format!("{}: {}", input.path.value(), e)))?;

    let file = file.to_string_lossy().into_owned();
    let tokens = compiled.tokens;
    Ok(quote! {
        #tokens
        const _: &str = include_str!(#file);
    })
}
