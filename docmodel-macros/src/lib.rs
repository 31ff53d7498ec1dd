//! Procedural macros for the docmodel project.
//!
//! `#[derive(Record)]` and `#[derive(Model)]` generate the reflection impls the mapper uses
//! to walk a struct: a static member list with tags, plus positional member access.
//!
//! Member attributes:
//!
//! - `#[docmodel(tag = "name,omitempty,serverTimestamp,ref:collection")]`
//! - `#[docmodel(embed)]` promotes the member's own fields into the enclosing record.

#[allow(unused_extern_crates)]
extern crate self as docmodel_macros;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Fields, GenericParam, LitStr, Path, Type, Visibility, parse_macro_input,
    parse_quote,
};

/// Derives the reflection impls for a plain record.
#[proc_macro_derive(Record, attributes(docmodel))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand(input, false)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derives the reflection impls plus `Model` for a record embedding `ModelMeta`.
#[proc_macro_derive(Model, attributes(docmodel))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand(input, true)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct MemberAttrs {
    tag: Option<String>,
    embed: bool,
}

fn member_attrs(field: &syn::Field) -> syn::Result<MemberAttrs> {
    let mut attrs = MemberAttrs { tag: None, embed: false };

    for attr in field
        .attrs
        .iter()
        .filter(|a| a.path().is_ident("docmodel"))
    {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("tag") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.tag = Some(value.value());
                Ok(())
            } else if meta.path.is_ident("embed") {
                attrs.embed = true;
                Ok(())
            } else {
                Err(meta.error("expected `tag = \"...\"` or `embed`"))
            }
        })?;
    }

    Ok(attrs)
}

fn is_model_meta(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "ModelMeta"),
        _ => false,
    }
}

/// Workspace crates that reach the core directly; everyone else goes through the facade.
const INTERNAL_CRATES: &[&str] = &["docmodel-core", "docmodel-memory", "docmodel-mongodb"];

/// The path generated code uses to reach `docmodel_core`.
///
/// `DOCMODEL_CORE_CRATE` overrides the choice, for crates that depend on `docmodel-core` without
/// the `docmodel` facade.
fn crate_path() -> TokenStream2 {
    let package = std::env::var("CARGO_PKG_NAME").unwrap_or_default();
    let configured = std::env::var("DOCMODEL_CORE_CRATE").ok();

    resolve_crate_path(&package, configured.as_deref())
}

fn resolve_crate_path(package: &str, configured: Option<&str>) -> TokenStream2 {
    if let Some(path) = configured.and_then(|value| syn::parse_str::<Path>(value.trim()).ok()) {
        return quote!(#path);
    }

    if INTERNAL_CRATES.contains(&package) {
        quote!(::docmodel_core)
    } else {
        quote!(::docmodel::core)
    }
}

fn expand(mut input: DeriveInput, is_model: bool) -> syn::Result<TokenStream2> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "docmodel derives only support structs",
        ));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "docmodel derives require named fields",
        ));
    };

    let krate = crate_path();
    let mut members = Vec::new();
    let mut getters = Vec::new();
    let mut setters = Vec::new();
    let mut meta_field = None;
    let mut first_embed = None;

    for (position, field) in named.named.iter().enumerate() {
        let attrs = member_attrs(field)?;
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "unnamed field"))?;
        let ty = &field.ty;
        let name = ident.to_string();
        let exported = matches!(field.vis, Visibility::Public(_));
        let embedded = attrs.embed;
        let tag = match &attrs.tag {
            Some(tag) => quote!(::core::option::Option::Some(#tag)),
            None => quote!(::core::option::Option::None),
        };

        if embedded {
            if meta_field.is_none() && is_model_meta(ty) {
                meta_field = Some(ident.clone());
            }
            if first_embed.is_none() {
                first_embed = Some(ident.clone());
            }
        }

        members.push(quote! {
            #krate::reflect::Member {
                name: #name,
                tag: #tag,
                exported: #exported,
                embedded: #embedded,
                shape: <#ty as #krate::reflect::Reflect>::shape,
            }
        });
        getters.push(quote! {
            #position => ::core::option::Option::Some(&self.#ident as &dyn #krate::reflect::Reflect),
        });
        setters.push(quote! {
            #position => ::core::option::Option::Some(&mut self.#ident as &mut dyn #krate::reflect::Reflect),
        });
    }

    let meta_field = match (is_model, meta_field.or(first_embed)) {
        (false, _) => None,
        (true, Some(field)) => Some(field),
        (true, None) => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "derive(Model) requires a `#[docmodel(embed)]` member of type ModelMeta or another model",
            ));
        }
    };

    for param in input.generics.params.iter_mut() {
        if let GenericParam::Type(param) = param {
            param
                .bounds
                .push(parse_quote!(#krate::reflect::Reflect));
            param.bounds.push(parse_quote!(::core::default::Default));
        }
    }

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let model_accessors = match &meta_field {
        Some(field) => quote! {
            fn model_meta(&self) -> ::core::option::Option<&#krate::model::ModelMeta> {
                ::core::option::Option::Some(#krate::model::Model::meta(&self.#field))
            }

            fn model_meta_mut(&mut self) -> ::core::option::Option<&mut #krate::model::ModelMeta> {
                ::core::option::Option::Some(#krate::model::Model::meta_mut(&mut self.#field))
            }
        },
        None => quote!(),
    };

    let model_impl = match &meta_field {
        Some(field) => quote! {
            impl #impl_generics #krate::model::Model for #ident #ty_generics #where_clause {
                fn meta(&self) -> &#krate::model::ModelMeta {
                    #krate::model::Model::meta(&self.#field)
                }

                fn meta_mut(&mut self) -> &mut #krate::model::ModelMeta {
                    #krate::model::Model::meta_mut(&mut self.#field)
                }
            }
        },
        None => quote!(),
    };

    Ok(quote! {
        impl #impl_generics #krate::reflect::Reflect for #ident #ty_generics #where_clause {
            fn shape() -> #krate::reflect::Shape {
                #krate::reflect::Shape::of::<Self>(
                    #krate::reflect::ShapeKind::Struct {
                        members: || ::std::vec![#(#members),*],
                        is_model: #is_model,
                    },
                )
            }

            fn dyn_shape(&self) -> #krate::reflect::Shape {
                <Self as #krate::reflect::Reflect>::shape()
            }

            fn reflect(&self) -> #krate::reflect::ReflectRef<'_> {
                #krate::reflect::ReflectRef::Struct(self)
            }

            fn reflect_mut(&mut self) -> #krate::reflect::ReflectMut<'_> {
                #krate::reflect::ReflectMut::Struct(self)
            }
        }

        impl #impl_generics #krate::reflect::ReflectStruct for #ident #ty_generics #where_clause {
            fn field(&self, index: usize) -> ::core::option::Option<&dyn #krate::reflect::Reflect> {
                match index {
                    #(#getters)*
                    _ => ::core::option::Option::None,
                }
            }

            fn field_mut(&mut self, index: usize) -> ::core::option::Option<&mut dyn #krate::reflect::Reflect> {
                match index {
                    #(#setters)*
                    _ => ::core::option::Option::None,
                }
            }

            #model_accessors
        }

        #model_impl
    })
}
