//! `#[tap_test]` for lora-link-esp32.
//!
//! Registers a function with the crate's TAP harness so it runs from the
//! `device-tests` binary, on the host or on the board.

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType, Token};

/// Mark a function as a TAP test.
///
/// The function body is kept as written and registered with the harness.
/// A test either returns nothing (a panic is a failure) or returns
/// `Result<(), E>` (an `Err` is a failure).
///
/// # Attributes
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]` / `#[tap_test(should_panic = "message")]`
/// - `#[tap_test(ignore)]` / `#[tap_test(ignore = "reason")]`: reported as a
///   TAP `# SKIP` without running
///
/// # Example
///
/// ```ignore
/// use lora_link_esp32_macros::tap_test;
///
/// #[tap_test(should_panic = "spreading factor")]
/// fn invalid_config_panics() {
///     RadioConfig { spreading_factor: 13, ..RadioConfig::default() }.validate().unwrap();
/// }
///
/// #[tap_test(ignore = "needs a second board on air")]
/// fn hears_remote_transmitter() {}
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);
    let mode = match Mode::parse(attr) {
        Ok(mode) => mode,
        Err(e) => return e.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let name = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    if returns_result && matches!(mode, Mode::ShouldPanic(_)) {
        return syn::Error::new_spanned(
            &input_fn.sig.output,
            "tap_test: should_panic tests must not return a value",
        )
        .to_compile_error()
        .into();
    }

    let register = match mode {
        Mode::Run if returns_result => quote! { runner.run(#name, #fn_name); },
        Mode::Run => quote! { runner.run_assert(#name, #fn_name); },
        Mode::ShouldPanic(None) => quote! { runner.run_should_panic(#name, #fn_name, None); },
        Mode::ShouldPanic(Some(msg)) => {
            quote! { runner.run_should_panic(#name, #fn_name, Some(#msg)); }
        }
        Mode::Ignore(reason) => {
            let reason = reason.unwrap_or_default();
            quote! {
                let _ = #fn_name;
                runner.skip(#name, #reason);
            }
        }
    };

    let expanded = quote! {
        #input_fn

        ::inventory::submit! {
            ::lora_link_esp32::testing::TapTestEntry::new(
                #name,
                |runner: &mut ::lora_link_esp32::testing::TestRunner| {
                    #register
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum Mode {
    Run,
    ShouldPanic(Option<String>),
    Ignore(Option<String>),
}

impl Mode {
    fn parse(attr: TokenStream) -> syn::Result<Self> {
        let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;
        let mut mode = Mode::Run;
        for meta in metas {
            if !matches!(mode, Mode::Run) {
                return Err(syn::Error::new_spanned(
                    meta,
                    "tap_test: only one of should_panic / ignore may be given",
                ));
            }
            mode = match &meta {
                Meta::Path(p) if p.is_ident("should_panic") => Mode::ShouldPanic(None),
                Meta::Path(p) if p.is_ident("ignore") => Mode::Ignore(None),
                Meta::NameValue(nv) if nv.path.is_ident("should_panic") => {
                    Mode::ShouldPanic(Some(string_value(&nv.value)?))
                }
                Meta::NameValue(nv) if nv.path.is_ident("ignore") => {
                    Mode::Ignore(Some(string_value(&nv.value)?))
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "tap_test: unknown attribute. Supported: should_panic, \
                         should_panic = \"message\", ignore, ignore = \"reason\"",
                    ))
                }
            };
        }
        Ok(mode)
    }
}

fn string_value(expr: &Expr) -> syn::Result<String> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(
            other,
            "tap_test: expected a string literal, e.g. should_panic = \"message\"",
        )),
    }
}
