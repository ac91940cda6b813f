extern crate proc_macro;

mod derive_inject;

use syn::{parse_macro_input, DeriveInput, Error};

/// Derives `graft::Inject` for a struct with named fields (or a unit
/// struct). Every field becomes an injected dependency, fetched in
/// declaration order, with two exceptions:
///
/// - `Provider<X>` fields become deferred dependencies: `X` must still be
///   provided by the injector, but no construction-order edge is added.
/// - `#[inject(default)]` / `#[inject(default = func)]` fields are not
///   injected at all; they are filled from `Default::default()` or the
///   given function.
#[proc_macro_derive(Inject, attributes(inject))]
pub fn derive_inject(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let DeriveInput {
        ident,
        data,
        generics,
        ..
    } = parse_macro_input!(input);

    derive_inject::derive_inject_impl(ident, data, generics)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}
