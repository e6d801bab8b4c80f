use proc_macro2::{TokenStream, TokenTree};
use quote::quote;
use std::mem;
use syn::parse::{Parse, ParseStream};
use syn::{Attribute, Lit, Signature, Visibility, braced};

pub(crate) fn lit_str(lit: &Lit, key: &str) -> syn::Result<String> {
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(
            other,
            format!("`{key}` expects a string literal"),
        )),
    }
}

pub(crate) fn lit_usize(lit: &Lit, key: &str) -> syn::Result<usize> {
    let Lit::Int(int) = lit else {
        return Err(syn::Error::new_spanned(
            lit,
            format!("`{key}` expects an integer literal"),
        ));
    };

    int.base10_parse().map_err(|e| {
        syn::Error::new_spanned(int, format!("`{key}` is not a valid count: {e}"))
    })
}

/// Matches `#[test]` and the prelude paths it may be spelled with, such as
/// `#[::core::prelude::v1::test]`.
pub(crate) fn is_test_attribute(attr: &Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };
    if path.segments.iter().any(|s| !s.arguments.is_none()) {
        return false;
    }

    let names = path
        .segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>();

    match names.as_slice() {
        [test] => path.leading_colon.is_none() && test == "test",
        [krate, prelude, _, test] => {
            (krate == "core" || krate == "std") && prelude == "prelude" && test == "test"
        }
        _ => false,
    }
}

/// Appends `error` to `tokens`, so the item still expands next to the
/// diagnostic.
pub(crate) fn with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}

/// An annotated `fn`. The body is not parsed as Rust: statements stay token
/// streams split at top-level semicolons, which is all the rewrite needs.
pub(crate) struct EntryFn {
    attrs: Vec<Attribute>,
    inner_attrs: Vec<Attribute>,
    vis: Visibility,
    pub(crate) sig: Signature,
    brace: syn::token::Brace,
    pub(crate) stmts: Vec<TokenStream>,
}

impl EntryFn {
    pub(crate) fn attrs(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter().chain(&self.inner_attrs)
    }

    /// The original body, braces included.
    pub(crate) fn body(&self) -> TokenStream {
        let mut block = TokenStream::new();
        self.brace
            .surround(&mut block, |inner| inner.extend(self.stmts.iter().cloned()));
        block
    }

    /// Re-emits the function with a new body made of `body` then `tail`.
    /// `generated_attrs` go after the user's so later macros see them.
    pub(crate) fn into_tokens(
        self,
        generated_attrs: TokenStream,
        body: TokenStream,
        tail: TokenStream,
    ) -> TokenStream {
        let EntryFn {
            attrs,
            inner_attrs,
            vis,
            sig,
            brace,
            ..
        } = self;

        // `#![...]` cannot stay in the rewritten body, it moves onto the fn.
        let lifted = inner_attrs
            .into_iter()
            .map(|mut attr| {
                attr.style = syn::AttrStyle::Outer;
                attr
            })
            .collect::<Vec<_>>();

        let mut tokens = quote! {
            #(#attrs)*
            #(#lifted)*
            #generated_attrs
            #vis #sig
        };
        brace.surround(&mut tokens, |inner| {
            inner.extend(body);
            inner.extend(tail);
        });
        tokens
    }
}

impl Parse for EntryFn {
    fn parse(input: ParseStream<'_>) -> syn::Result<Self> {
        let attrs = input.call(Attribute::parse_outer)?;
        let vis = input.parse()?;
        let sig = input.parse()?;

        let content;
        let brace = braced!(content in input);
        let inner_attrs = content.call(Attribute::parse_inner)?;

        let mut stmts = Vec::new();
        let mut current = TokenStream::new();
        for tt in content.parse::<TokenStream>()? {
            let ends_stmt = matches!(&tt, TokenTree::Punct(p) if p.as_char() == ';');
            current.extend([tt]);
            if ends_stmt {
                stmts.push(mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            stmts.push(current);
        }

        Ok(EntryFn {
            attrs,
            inner_attrs,
            vis,
            sig,
            brace,
            stmts,
        })
    }
}
