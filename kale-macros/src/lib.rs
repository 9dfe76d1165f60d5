//! Procedural macros for the kale project.
//!
//! `#[derive(Model)]` implements `kale::model::Model` from a `#[model(...)]`
//! attribute:
//!
//! ```ignore
//! #[derive(Model)]
//! #[model(collection = "users", database = app::db, members = ["full_name"])]
//! struct User;
//! ```
//!
//! - `collection` names the backing collection.
//! - `database` is a path to a `fn() -> Database`.
//! - `members` lists extra attribute names that resolve to the model.
//!
//! Every key is optional; a model missing `collection` or `database` fails
//! with a configuration error when it is instantiated.

use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, Expr, ExprArray, ExprLit, Lit, LitStr, Path, parse_macro_input};

#[derive(Default)]
struct ModelAttrs {
    collection: Option<LitStr>,
    database: Option<Path>,
    members: Vec<LitStr>,
}

fn parse_members(array: ExprArray) -> syn::Result<Vec<LitStr>> {
    array
        .elems
        .into_iter()
        .map(|elem| match elem {
            Expr::Lit(ExprLit { lit: Lit::Str(name), .. }) => Ok(name),
            other => Err(syn::Error::new_spanned(other, "expected a string literal")),
        })
        .collect()
}

fn parse_attrs(input: &DeriveInput) -> syn::Result<ModelAttrs> {
    let mut attrs = ModelAttrs::default();

    for attr in input
        .attrs
        .iter()
        .filter(|attr| attr.path().is_ident("model"))
    {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                attrs.collection = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("database") {
                attrs.database = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("members") {
                attrs.members = parse_members(meta.value()?.parse()?)?;
                Ok(())
            } else {
                Err(meta.error("expected `collection`, `database` or `members`"))
            }
        })?;
    }

    Ok(attrs)
}

#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let attrs = match parse_attrs(&input) {
        Ok(attrs) => attrs,
        Err(err) => return err.to_compile_error().into(),
    };

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let database = attrs.database.map(|path| {
        quote! {
            fn database() -> ::core::option::Option<::kale::database::Database> {
                ::core::option::Option::Some(#path())
            }
        }
    });
    let collection = attrs.collection.map(|name| {
        quote! {
            fn collection_name() -> ::core::option::Option<&'static str> {
                ::core::option::Option::Some(#name)
            }
        }
    });
    let members = (!attrs.members.is_empty()).then(|| {
        let members = &attrs.members;
        quote! {
            fn members() -> &'static [&'static str] {
                &[#(#members),*]
            }
        }
    });

    quote! {
        impl #impl_generics ::kale::model::Model for #name #ty_generics #where_clause {
            #database
            #collection
            #members
        }
    }
    .into()
}
