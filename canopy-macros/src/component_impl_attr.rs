use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{ImplItem, ItemImpl, parse_macro_input, parse_quote};

use crate::core_crate;

const HOOKS: &[(&str, &str)] = &[
    ("awake", "AWAKE"),
    ("start", "START"),
    ("update", "UPDATE"),
    ("on_enable", "ON_ENABLE"),
    ("on_disable", "ON_DISABLE"),
    ("on_destroy", "ON_DESTROY"),
];

pub fn expand_component_impl(args: TokenStream, input: TokenStream) -> TokenStream {
    if !args.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[component_impl] 不接受参数",
        )
        .to_compile_error()
        .into();
    }

    let mut item = parse_macro_input!(input as ItemImpl);

    let Some((_, trait_path, _)) = &item.trait_ else {
        return syn::Error::new_spanned(
            item.impl_token,
            "#[component_impl] 只能用于 `impl Component for T` 块",
        )
        .to_compile_error()
        .into();
    };
    if !trait_path
        .segments
        .last()
        .is_some_and(|segment| segment.ident == "Component")
    {
        return syn::Error::new_spanned(
            trait_path,
            "#[component_impl] 只能用于 `impl Component for T` 块",
        )
        .to_compile_error()
        .into();
    }

    let mut defines_hooks = false;
    let mut flags = Vec::new();
    for impl_item in &item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        let name = method.sig.ident.to_string();
        if name == "hooks" {
            defines_hooks = true;
            continue;
        }
        if let Some((_, flag)) = HOOKS.iter().find(|(hook, _)| *hook == name) {
            flags.push(format_ident!("{}", flag));
        }
    }

    if !defines_hooks {
        let core = core_crate();
        let hooks_ty = quote!(#core::game::component::Hooks);
        let hooks_fn: ImplItem = parse_quote! {
            fn hooks(&self) -> #hooks_ty {
                #hooks_ty::empty() #(.union(#hooks_ty::#flags))*
            }
        };
        item.items.push(hooks_fn);
    }

    TokenStream::from(quote!(#item))
}
