// These lints are triggered by darling's generated code for
// `#[darling(default)]`.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::needless_continue)]

use darling::{FromDeriveInput, FromField, FromMeta, FromVariant, ast, util::PathList};
use heck::ToUpperCamelCase;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, quote};
use syn::{DeriveInput, Ident, Path, parse_macro_input};

#[allow(clippy::doc_markdown, reason = "false positive")]
/// Build a PascalCase enum variant name from a type path, joining every
/// segment so `v1::Opened` and `v2::Opened` stay distinct.
fn variant_ident(path: &Path) -> Ident {
    let joined = path
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect::<Vec<_>>()
        .join("_")
        .to_upper_camel_case();
    let span = path
        .segments
        .last()
        .map_or_else(proc_macro2::Span::call_site, |segment| segment.ident.span());
    Ident::new(&joined, span)
}

/// Wrapper for `syn::Path` that parses from `key = Type` syntax.
#[derive(Debug, Clone)]
struct TypePath(Path);

impl FromMeta for TypePath {
    fn from_meta(item: &syn::Meta) -> darling::Result<Self> {
        let error = || darling::Error::unsupported_shape("expected `key = Type`");
        let syn::Meta::NameValue(nv) = item else {
            return Err(error());
        };
        match syn::parse2::<syn::Type>(nv.value.to_token_stream()) {
            Ok(syn::Type::Path(type_path)) if type_path.qself.is_none() => Ok(Self(type_path.path)),
            _ => Err(error()),
        }
    }
}

/// Configuration for the `#[aggregate(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(aggregate), supports(struct_any))]
struct AggregateArgs {
    ident: Ident,
    vis: syn::Visibility,
    error: TypePath,
    #[darling(default)]
    events: PathList,
    #[darling(default)]
    name: Option<String>,
    #[darling(default)]
    version: Option<String>,
    #[darling(default)]
    snapshot: Option<TypePath>,
    #[darling(default)]
    snapshot_interval: Option<u64>,
    #[darling(default)]
    event_enum: Option<String>,
    #[darling(default)]
    derives: Option<PathList>,
}

/// Configuration for the `#[payload(...)]` attribute.
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(payload), supports(struct_any, enum_any))]
struct PayloadArgs {
    ident: Ident,
    #[darling(default)]
    name: Option<String>,
}

#[derive(Debug, FromField)]
struct SetMember {
    ty: syn::Type,
}

#[derive(Debug, FromVariant)]
struct SetVariant {
    ident: Ident,
    fields: ast::Fields<SetMember>,
}

/// Input accepted by `#[derive(PayloadSet)]`: an enum of newtype variants.
#[derive(Debug, FromDeriveInput)]
#[darling(supports(enum_any))]
struct PayloadSetArgs {
    ident: Ident,
    data: ast::Data<SetVariant, ()>,
}

/// Parse derive input with darling and render errors as tokens.
fn parse_or_error<T, F>(input: &DeriveInput, f: F) -> TokenStream2
where
    T: FromDeriveInput,
    F: FnOnce(T) -> TokenStream2,
{
    match T::from_derive_input(input) {
        Ok(args) => f(args),
        Err(err) => err.write_errors(),
    }
}

/// `PayloadSet` impl for an enum whose variants each wrap one payload type.
fn payload_set_tokens(
    enum_name: &Ident,
    generics: &syn::Generics,
    variants: &[Ident],
    members: &[TokenStream2],
) -> TokenStream2 {
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    quote! {
        impl #impl_generics ::annals::payload::PayloadSet for #enum_name #ty_generics #where_clause {
            const TYPES: &'static [&'static str] =
                &[#(<#members as ::annals::payload::Payload>::TYPE),*];

            fn record_type(&self) -> &'static str {
                match self {
                    #(Self::#variants(_) => <#members as ::annals::payload::Payload>::TYPE),*
                }
            }

            fn encode(
                &self,
            ) -> ::core::result::Result<
                ::annals::__private::serde_json::Value,
                ::annals::__private::serde_json::Error,
            > {
                match self {
                    #(Self::#variants(inner) => ::annals::__private::serde_json::to_value(inner)),*
                }
            }

            fn decode(
                record_type: &str,
                data: ::annals::__private::serde_json::Value,
            ) -> ::core::result::Result<Self, ::annals::payload::DecodeError> {
                #(
                    if record_type == <#members as ::annals::payload::Payload>::TYPE {
                        return ::annals::__private::serde_json::from_value::<#members>(data)
                            .map(Self::#variants)
                            .map_err(::annals::payload::DecodeError::Data);
                    }
                )*
                ::core::result::Result::Err(::annals::payload::DecodeError::unknown::<Self>(record_type))
            }
        }

        #(
            impl #impl_generics ::core::convert::From<#members> for #enum_name #ty_generics #where_clause {
                fn from(payload: #members) -> Self {
                    Self::#variants(payload)
                }
            }
        )*
    }
}

/// Derives the `Aggregate` trait for a struct.
///
/// This macro generates:
/// - An event enum with one variant per listed event type
/// - A `PayloadSet` implementation for that enum, plus `From<E>` for each
///   event type
/// - An `Aggregate` implementation whose `apply` dispatches to your
///   `Apply<E>` implementations
///
/// Commands are handled via individual `Handle<C>` implementations.
///
/// # Attributes
///
/// ## Required
/// - `error = Type` - Error type for command handling
/// - `events(Type1, Type2, ...)` - Event types; each must implement
///   `Payload`, `Serialize` and `Deserialize`
///
/// ## Optional
/// - `name = "Name"` - Aggregate type stored on records (default: struct name)
/// - `version = "2"` - Replay logic tag used in projection fingerprints
/// - `snapshot = Type` - Snapshot payload; the struct must implement
///   `Checkpoint<Type>`
/// - `snapshot_interval = 100` - Events between snapshots (requires
///   `snapshot`)
/// - `event_enum = "Name"` - Generated enum name (default: `{Struct}Event`)
/// - `derives(Trait1, Trait2, ...)` - Additional derives for the generated
///   event enum, which always derives `Clone`
///
/// # Example
///
/// ```ignore
/// #[derive(Default, Aggregate)]
/// #[aggregate(
///     error = String,
///     events(StockReceived, StockShipped),
///     snapshot = InventorySnapshot,
///     snapshot_interval = 50,
///     derives(Debug, PartialEq)
/// )]
/// pub struct Inventory {
///     on_hand: i64,
/// }
/// ```
#[proc_macro_derive(Aggregate, attributes(aggregate))]
pub fn derive_aggregate(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_aggregate_impl(&input).into()
}

fn derive_aggregate_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<AggregateArgs, _>(input, |args| generate_aggregate_impl(args, input))
}

fn generate_aggregate_impl(args: AggregateArgs, input: &DeriveInput) -> TokenStream2 {
    let event_types: Vec<&Path> = args.events.iter().collect();
    if event_types.is_empty() {
        return darling::Error::custom("events(...) must contain at least one event type")
            .with_span(&input.ident)
            .write_errors();
    }
    if args.snapshot_interval.is_some() && args.snapshot.is_none() {
        return darling::Error::custom("snapshot_interval requires `snapshot = Type`")
            .with_span(&input.ident)
            .write_errors();
    }

    let struct_name = &args.ident;
    let struct_vis = &args.vis;
    let error_type = &args.error.0;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let name = args.name.unwrap_or_else(|| struct_name.to_string());
    let event_enum_name = args.event_enum.map_or_else(
        || Ident::new(&format!("{struct_name}Event"), struct_name.span()),
        |name| Ident::new(&name, struct_name.span()),
    );
    let variant_names: Vec<Ident> = event_types.iter().map(|path| variant_ident(path)).collect();
    let members: Vec<TokenStream2> = event_types.iter().map(|path| quote!(#path)).collect();

    let user_derives = args.derives.unwrap_or_default();
    let derives = quote! { #[derive(Clone, #(#user_derives),*)] };

    let version = args.version.map(|version| {
        quote! { const VERSION: &'static str = #version; }
    });
    let interval = args.snapshot_interval.map(|interval| {
        quote! { const SNAPSHOT_INTERVAL: u64 = #interval; }
    });

    let snapshot = if let Some(TypePath(snapshot)) = &args.snapshot {
        quote! {
            type Snapshot = #snapshot;

            fn snapshot(&self) -> #snapshot {
                <Self as ::annals::Checkpoint<#snapshot>>::checkpoint(self)
            }

            fn restore(&mut self, snapshot: #snapshot) {
                <Self as ::annals::Checkpoint<#snapshot>>::restore(self, snapshot);
            }
        }
    } else {
        quote! {
            type Snapshot = ::annals::payload::NoSnapshot;

            fn snapshot(&self) -> ::annals::payload::NoSnapshot {
                ::annals::payload::NoSnapshot
            }

            fn restore(&mut self, _snapshot: ::annals::payload::NoSnapshot) {}
        }
    };

    let payload_set = payload_set_tokens(
        &event_enum_name,
        &syn::Generics::default(),
        &variant_names,
        &members,
    );

    quote! {
        #[doc = concat!("Event type for the [`", stringify!(#struct_name), "`] aggregate.")]
        #derives
        #struct_vis enum #event_enum_name {
            #(
                #[doc = concat!("[`", stringify!(#event_types), "`]")]
                #variant_names(#event_types)
            ),*
        }

        #payload_set

        impl #impl_generics ::annals::Aggregate for #struct_name #ty_generics #where_clause {
            const TYPE: &'static str = #name;
            #version
            #interval

            type Event = #event_enum_name;
            type Error = #error_type;

            #snapshot

            fn apply(&mut self, event: &Self::Event) {
                match event {
                    #(#event_enum_name::#variant_names(e) => ::annals::Apply::apply(self, e)),*
                }
            }
        }
    }
}

/// Derives `Payload` for a struct or enum.
///
/// The stored discriminator defaults to the type's name. Pin it with
/// `#[payload(name = "...")]` before renaming the type, or to give a new
/// shape of an evolving record its own discriminator.
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Payload)]
/// #[payload(name = "StockReceived")]
/// pub struct Deposited {
///     amount: i64,
/// }
/// ```
#[proc_macro_derive(Payload, attributes(payload))]
pub fn derive_payload(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_payload_impl(&input).into()
}

fn derive_payload_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<PayloadArgs, _>(input, |args| {
        let ident = &args.ident;
        let name = args.name.unwrap_or_else(|| ident.to_string());
        let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
        quote! {
            impl #impl_generics ::annals::payload::Payload for #ident #ty_generics #where_clause {
                const TYPE: &'static str = #name;
            }
        }
    })
}

/// Derives `PayloadSet` for an enum of newtype variants.
///
/// Each variant wraps one `Payload` type; the enum encodes and decodes by the
/// wrapped type's discriminator. `From` is generated for every member.
///
/// ```ignore
/// #[derive(PayloadSet)]
/// pub enum AccountView {
///     Open(OpenAccount),
///     Closed(ClosedAccount),
/// }
/// ```
#[proc_macro_derive(PayloadSet)]
pub fn derive_payload_set(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    derive_payload_set_impl(&input).into()
}

fn derive_payload_set_impl(input: &DeriveInput) -> TokenStream2 {
    parse_or_error::<PayloadSetArgs, _>(input, |args| {
        let Some(variants) = args.data.take_enum() else {
            return darling::Error::unsupported_shape("expected an enum")
                .with_span(&input.ident)
                .write_errors();
        };
        if variants.is_empty() {
            return darling::Error::custom("PayloadSet requires at least one variant")
                .with_span(&input.ident)
                .write_errors();
        }

        let mut names = Vec::with_capacity(variants.len());
        let mut members = Vec::with_capacity(variants.len());
        for variant in variants {
            let fields = variant.fields;
            let member = match (fields.style, fields.fields.len()) {
                (ast::Style::Tuple, 1) => fields.fields.into_iter().next(),
                _ => None,
            };
            let Some(member) = member else {
                return darling::Error::custom(
                    "PayloadSet variants must wrap exactly one payload, as in `Variant(Payload)`",
                )
                .with_span(&variant.ident)
                .write_errors();
            };
            let ty = member.ty;
            members.push(quote!(#ty));
            names.push(variant.ident);
        }
        payload_set_tokens(&args.ident, &input.generics, &names, &members)
    })
}
