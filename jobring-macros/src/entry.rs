use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::parse::Parser;

use crate::parse::*;

// syn::AttributeArgs does not implement syn::Parse
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

const KNOWN_ARGS: &str = "`flavor`, `worker_threads`";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Flavor {
    Inline,
    Multi,
}

impl Flavor {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "inline" => Ok(Flavor::Inline),
            "multi" => Ok(Flavor::Multi),
            _ => Err(format!(
                "unknown runtime flavor `{s}`, expected `inline` or `multi`"
            )),
        }
    }

    fn builder(self, span: Span) -> TokenStream {
        match self {
            Flavor::Inline => quote_spanned! {span=> jobring::runtime::Builder::new_inline() },
            Flavor::Multi => quote_spanned! {span=> jobring::runtime::Builder::new_multi() },
        }
    }
}

#[derive(Clone, Copy)]
enum Entry {
    Main,
    Test,
}

impl Entry {
    fn name(self) -> &'static str {
        match self {
            Entry::Main => "jobring::main",
            Entry::Test => "jobring::test",
        }
    }

    /// `main` wants all cores by default, tests want determinism.
    fn default_flavor(self) -> Flavor {
        match self {
            Entry::Main => Flavor::Multi,
            Entry::Test => Flavor::Inline,
        }
    }
}

struct Config {
    flavor: Flavor,
    worker_threads: Option<usize>,
}

impl Config {
    fn fallback(entry: Entry) -> Self {
        Config {
            flavor: entry.default_flavor(),
            worker_threads: None,
        }
    }

    fn parse(entry: Entry, input: &EntryFn, args: AttributeArgs) -> syn::Result<Self> {
        if input.sig.asyncness.is_none() {
            return Err(syn::Error::new_spanned(
                input.sig.fn_token,
                "the `async` keyword is missing from the function declaration",
            ));
        }

        let mut flavor: Option<Flavor> = None;
        let mut worker_threads: Option<(usize, Span)> = None;

        for arg in args {
            let namevalue = match arg {
                syn::Meta::NameValue(nv) => nv,
                syn::Meta::Path(path) => {
                    let name = path
                        .get_ident()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    let msg = match name.as_str() {
                        "flavor" | "worker_threads" => {
                            format!("`{name}` requires a value")
                        }
                        "inline" | "multi" => {
                            format!("use #[{}(flavor = \"{name}\")]", entry.name())
                        }
                        _ => format!("unknown argument `{name}`, expected one of {KNOWN_ARGS}"),
                    };
                    return Err(syn::Error::new_spanned(path, msg));
                }
                other => {
                    return Err(syn::Error::new_spanned(other, "unsupported argument form"));
                }
            };

            let ident = namevalue
                .path
                .get_ident()
                .ok_or_else(|| syn::Error::new_spanned(&namevalue.path, "expected an identifier"))?
                .to_string();
            let lit = match &namevalue.value {
                syn::Expr::Lit(syn::ExprLit { lit, .. }) => lit.clone(),
                expr => return Err(syn::Error::new_spanned(expr, "expected a literal")),
            };
            let span = lit.span();

            match ident.as_str() {
                "flavor" => {
                    if flavor.is_some() {
                        return Err(syn::Error::new(span, "`flavor` set more than once"));
                    }
                    let s = lit_str(&lit, "flavor")?;
                    flavor = Some(Flavor::parse(&s).map_err(|e| syn::Error::new(span, e))?);
                }
                "worker_threads" => {
                    if worker_threads.is_some() {
                        return Err(syn::Error::new(span, "`worker_threads` set more than once"));
                    }
                    let n = lit_usize(&lit, "worker_threads")?;
                    if n == 0 {
                        return Err(syn::Error::new(span, "`worker_threads` may not be 0"));
                    }
                    worker_threads = Some((n, span));
                }
                name => {
                    let msg = format!("unknown argument `{name}`, expected one of {KNOWN_ARGS}");
                    return Err(syn::Error::new_spanned(namevalue, msg));
                }
            }
        }

        let flavor = flavor.unwrap_or(entry.default_flavor());
        let worker_threads = match (flavor, worker_threads) {
            (Flavor::Inline, Some((_, span))) => {
                let msg = format!(
                    "`worker_threads` requires the multi flavor, use #[{}(flavor = \"multi\")]",
                    entry.name()
                );
                return Err(syn::Error::new(span, msg));
            }
            (_, n) => n.map(|(n, _)| n),
        };

        Ok(Config {
            flavor,
            worker_threads,
        })
    }
}

/// Expands
///
/// ```ignore
/// #[jobring::main(flavor = "multi", worker_threads = 2)]
/// async fn main() -> u32 { 7 }
/// ```
///
/// into a synchronous `fn main() -> u32` that builds the runtime and hands
/// the original body to `Runtime::block_on`.
pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(Entry::Main, args, item)
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(Entry::Test, args, item)
}

fn expand(entry: Entry, args: TokenStream, item: TokenStream) -> TokenStream {
    // On error still emit something shaped like the output so IDE tooling
    // keeps resolving the item.
    let input: EntryFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return with_error(item, e),
    };

    let config = match entry {
        Entry::Main if !input.sig.inputs.is_empty() => Err(syn::Error::new_spanned(
            &input.sig.inputs,
            "the main function cannot accept arguments",
        )),
        Entry::Test if input.attrs().any(is_test_attribute) => Err(syn::Error::new_spanned(
            &input.sig.ident,
            "a second test attribute is supplied, remove it or place it before this one",
        )),
        _ => AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| Config::parse(entry, &input, args)),
    };

    match config {
        Ok(config) => generate(entry, input, config),
        Err(e) => with_error(generate(entry, input, Config::fallback(entry)), e),
    }
}

fn generate(entry: Entry, mut input: EntryFn, config: Config) -> TokenStream {
    input.sig.asyncness = None;

    // Type mismatches are reported against the last statement, so span the
    // generated call over it.
    let (start, end) = {
        let mut last = input.stmts.last().cloned().unwrap_or_default().into_iter();
        let start = last.next().map_or_else(Span::call_site, |t| t.span());
        let end = last.last().map_or(start, |t| t.span());
        (start, end)
    };

    let mut rt = config.flavor.builder(start);
    if let Some(n) = config.worker_threads {
        rt = quote_spanned! {start=> #rt.worker_threads(#n) };
    }

    let generated_attrs = match entry {
        Entry::Test => quote! { #[::core::prelude::v1::test] },
        Entry::Main => quote! {},
    };

    let body = input.body();
    let body = quote! {
        let body = async move #body;
    };

    let last_block = quote_spanned! {end=>
        #[allow(clippy::expect_used, clippy::needless_return)]
        {
            return #rt
                .try_build()
                .expect("failed to build the jobring runtime")
                .block_on(body);
        }
    };

    input.into_tokens(generated_attrs, body, last_block)
}
