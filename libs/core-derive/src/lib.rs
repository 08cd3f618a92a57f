//! Attribute sugar for registering event bus handlers.
//!
//! ```rust,ignore
//! use courier_bus::{handler, HandlerResult, Message};
//!
//! #[handler(address = "orders.place", local_only)]
//! fn place_order(msg: Message) -> HandlerResult {
//!     msg.reply("accepted")?;
//!     Ok(())
//! }
//!
//! // Generated alongside the function:
//! // fn register_place_order(executor: &Executor) -> courier_bus::Result<HandlerId>
//! let id = register_place_order(&executor)?;
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Ident, ItemFn, LitStr, Token};

/// Generate a `register_<fn>` helper for a handler function.
///
/// # Attributes
///
/// - `address = "..."` - Required. The address to register on.
/// - `local_only` - Optional. Keep the handler off cluster advertisements.
///
/// The function must be a plain `fn(Message) -> HandlerResult`.
#[proc_macro_attribute]
pub fn handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr = parse_macro_input!(attr as HandlerAttr);
    let item = parse_macro_input!(item as ItemFn);

    match handler_impl(attr, item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn handler_impl(attr: HandlerAttr, item: ItemFn) -> syn::Result<proc_macro2::TokenStream> {
    let sig = &item.sig;
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "handlers run on an executor and cannot be async",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "handlers cannot be generic",
        ));
    }
    if sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &sig.inputs,
            "handlers take exactly one `Message` argument",
        ));
    }

    let vis = &item.vis;
    let name = &sig.ident;
    let register_name = format_ident!("register_{}", name);
    let address = &attr.address;
    let local_only = attr.local_only;
    let doc = format!(
        "Register [`{}`] on `{}` through `executor`.",
        name,
        address.value()
    );

    Ok(quote! {
        #item

        #[doc = #doc]
        #vis fn #register_name(
            executor: &::courier_bus::Executor,
        ) -> ::courier_bus::Result<::courier_bus::HandlerId> {
            executor.register_handler(#address, #local_only, #name)
        }
    })
}

/// Parsed handler attribute.
struct HandlerAttr {
    address: LitStr,
    local_only: bool,
}

impl syn::parse::Parse for HandlerAttr {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut address = None;
        let mut local_only = false;

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            if ident == "address" {
                let _eq: Token![=] = input.parse()?;
                let value: LitStr = input.parse()?;
                if value.value().is_empty() {
                    return Err(syn::Error::new_spanned(value, "address cannot be empty"));
                }
                address = Some(value);
            } else if ident == "local_only" {
                local_only = true;
            } else {
                return Err(syn::Error::new_spanned(
                    ident,
                    "expected `address` or `local_only` in handler attribute",
                ));
            }

            if !input.is_empty() {
                let _comma: Token![,] = input.parse()?;
            }
        }

        let address = address.ok_or_else(|| {
            syn::Error::new(input.span(), "missing `address = \"...\"` in handler attribute")
        })?;
        Ok(HandlerAttr {
            address,
            local_only,
        })
    }
}
