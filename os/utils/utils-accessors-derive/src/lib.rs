//! # Accessor Derive
//!
//! `#[derive(Setters)]` generates builder-style accessors for configuration
//! structs, so their fields can stay private.

use proc_macro::TokenStream;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Field, Fields, parse_macro_input, spanned::Spanned};

/// For each named field `x: T` generate
///
/// - `const fn with_x(mut self, value: T) -> Self`
/// - `fn set_x(&mut self, value: T) -> &mut Self`
/// - with `#[setters(get)]`: `const fn x(&self) -> T` (`T` must be `Copy`)
///
/// The field's doc comment is copied to every generated method.
/// `#[setters(skip)]` leaves a field alone.
///
/// # Example
///
/// ```
/// use utils_accessors_derive::Setters;
///
/// #[derive(Default, Setters)]
/// struct Config {
///     /// Number of CPUs.
///     #[setters(get)]
///     cpus: usize,
///     #[setters(skip)]
///     secret: u8,
/// }
///
/// let mut c = Config::default().with_cpus(2);
/// c.set_cpus(3);
/// assert_eq!(c.cpus(), 3);
/// ```
#[proc_macro_derive(Setters, attributes(setters))]
pub fn derive_setters(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(|err| err.to_compile_error().into())
}

#[derive(Default, Clone, Copy)]
struct Options {
    skip: bool,
    get: bool,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            ident.span(),
            "Setters can only be derived for structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            data.fields.span(),
            "Setters only supports named fields",
        ));
    };

    let mut methods = Vec::new();
    for field in &fields.named {
        let options = options(&field.attrs)?;
        if !options.skip {
            methods.extend(accessors(field, options));
        }
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            #(#methods)*
        }
    }
    .into())
}

fn accessors(field: &Field, options: Options) -> Option<impl ToTokens> {
    let name = field.ident.as_ref()?;
    let ty = &field.ty;
    let docs: Vec<&Attribute> = field
        .attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .collect();
    let with_name = format_ident!("with_{}", name);
    let set_name = format_ident!("set_{}", name);

    let getter = options.get.then(|| {
        quote! {
            #(#docs)*
            #[inline]
            #[must_use]
            pub const fn #name(&self) -> #ty {
                self.#name
            }
        }
    });

    Some(quote! {
        #(#docs)*
        #[inline]
        #[must_use]
        pub const fn #with_name(mut self, value: #ty) -> Self {
            self.#name = value;
            self
        }

        #(#docs)*
        #[inline]
        pub fn #set_name(&mut self, value: #ty) -> &mut Self {
            self.#name = value;
            self
        }

        #getter
    })
}

/// Parse `#[setters(skip)]`, `#[setters(get)]` and combinations.
fn options(attrs: &[Attribute]) -> syn::Result<Options> {
    let mut options = Options::default();
    for attr in attrs.iter().filter(|a| a.path().is_ident("setters")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                options.skip = true;
                Ok(())
            } else if meta.path.is_ident("get") {
                options.get = true;
                Ok(())
            } else {
                Err(meta.error("expected `skip` or `get`"))
            }
        })?;
    }
    Ok(options)
}
