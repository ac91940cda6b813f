use proc_macro2::{Ident, TokenStream};
use quote::{quote, quote_spanned};
use syn::parse::ParseStream;
use syn::{
    Data, DataStruct, Field, Fields, GenericArgument, Generics, PathArguments, Result, Token, Type,
};

pub(crate) fn derive_inject_impl(
    ident: Ident,
    data: Data,
    mut generics: Generics,
) -> Result<TokenStream> {
    let fields: Vec<Field> = match &data {
        Data::Struct(DataStruct { fields, .. }) => match fields {
            Fields::Named(named) => named.named.iter().cloned().collect(),
            Fields::Unit => Vec::new(),
            _ => {
                return Ok(quote_spanned! {
                    ident.span() => compile_error!("Inject can only be derived for structs with named fields or unit structs");
                });
            }
        },
        _ => {
            return Ok(quote_spanned! {
                ident.span() => compile_error!("Inject can only be derived for structs");
            });
        }
    };

    let mut dep_requests: Vec<TokenStream> = Vec::new();
    let mut field_inits: Vec<TokenStream> = Vec::new();

    for field in &fields {
        let name = field.ident.as_ref().expect("named field");
        let ty = &field.ty;
        match read_field_kind(field)? {
            FieldKind::Defaulted => {
                field_inits.push(quote!(#name: ::core::default::Default::default()));
            }
            FieldKind::DefaultedWith(func) => {
                field_inits.push(quote!(#name: #func()));
            }
            FieldKind::Provider(target) => {
                dep_requests
                    .push(quote!(graft::DepRequest::deferred(graft::type_id_of::<#target>())));
                field_inits.push(quote!(#name: storage.make_provider::<#target>()));
            }
            FieldKind::Injected => {
                dep_requests.push(quote!(graft::DepRequest::hard(graft::type_id_of::<#ty>())));
                field_inits.push(quote!(#name: storage.fetch_value::<#ty>(edges)));
            }
        }
    }

    // Every injected generic field must itself be a fetchable value.
    for param in generics.params.iter_mut() {
        use syn::{GenericParam, TypeParamBound};
        if let GenericParam::Type(type_param) = param {
            type_param
                .bounds
                .push(TypeParamBound::Trait(syn::parse_quote!(Clone)));
            type_param
                .bounds
                .push(TypeParamBound::Trait(syn::parse_quote!(Send)));
            type_param
                .bounds
                .push(TypeParamBound::Trait(syn::parse_quote!(Sync)));
            type_param
                .bounds
                .push(TypeParamBound::Lifetime(syn::parse_quote!('static)));
        }
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote!(
        #[automatically_derived]
        impl #impl_generics graft::inject::Inject for #ident #ty_generics #where_clause {
            fn dep_requests() -> ::std::vec::Vec<graft::DepRequest> {
                vec![#(#dep_requests),*]
            }

            unsafe fn create(
                storage: &graft::InjectorStorage,
                edges: &mut graft::EdgeCursor<'_>,
            ) -> Self {
                Self {
                    #(#field_inits),*
                }
            }
        }
    ))
}

enum FieldKind {
    Injected,
    Provider(Type),
    Defaulted,
    DefaultedWith(TokenStream),
}

fn read_field_kind(field: &Field) -> Result<FieldKind> {
    let mut kind: Option<FieldKind> = None;
    for attribute in &field.attrs {
        if !attribute.path().is_ident("inject") {
            continue;
        }
        if kind.is_some() {
            return Err(syn::Error::new_spanned(
                attribute,
                "multiple #[inject(...)] annotations on one field",
            ));
        }
        kind = Some(attribute.parse_args_with(|input: ParseStream| {
            if input.is_empty() {
                return Err(input.error("expected an argument after #[inject(...)]"));
            }
            let _default: Token![default] = input.parse()?;
            if input.peek(Token![=]) {
                input.parse::<Token![=]>()?;
                let func: syn::Path = input.parse()?;
                Ok(FieldKind::DefaultedWith(quote!(#func)))
            } else {
                Ok(FieldKind::Defaulted)
            }
        })?);
    }
    if let Some(kind) = kind {
        return Ok(kind);
    }
    if let Some(target) = provider_target(&field.ty) {
        return Ok(FieldKind::Provider(target));
    }
    Ok(FieldKind::Injected)
}

/// Recognizes `Provider<X>` (or `graft::Provider<X>`, etc.) field types by
/// the path's last segment.
fn provider_target(ty: &Type) -> Option<Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Provider" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    if args.args.len() != 1 {
        return None;
    }
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner.clone()),
        _ => None,
    }
}
