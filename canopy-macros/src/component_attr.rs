use proc_macro::TokenStream;
use quote::{ToTokens, quote};
use syn::{
    DeriveInput, Expr, Ident, Path, Token,
    parse::{Parse, ParseStream, Parser},
    parse_macro_input,
    punctuated::Punctuated,
};

use crate::core_crate;

enum ComponentArg {
    Require(Path),
    DisallowMultiple,
    Order(Expr),
}

impl Parse for ComponentArg {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(Ident) && input.peek2(Token![=]) {
            let key: Ident = input.parse()?;
            if key != "order" {
                return Err(syn::Error::new_spanned(
                    key,
                    "#[component] 只支持 `order = <expr>` 形式的键值参数",
                ));
            }
            input.parse::<Token![=]>()?;
            return Ok(Self::Order(input.parse()?));
        }

        let path: Path = input.parse()?;
        if path.is_ident("disallow_multiple") {
            return Ok(Self::DisallowMultiple);
        }
        Ok(Self::Require(path))
    }
}

pub fn expand_component(args: TokenStream, input: TokenStream) -> TokenStream {
    let args_stream = proc_macro2::TokenStream::from(args);
    let args: Vec<ComponentArg> = if args_stream.is_empty() {
        Vec::new()
    } else {
        match Punctuated::<ComponentArg, Token![,]>::parse_terminated.parse2(args_stream) {
            Ok(list) => list.into_iter().collect(),
            Err(err) => return err.to_compile_error().into(),
        }
    };

    let derive_input = parse_macro_input!(input as DeriveInput);

    if !derive_input.generics.params.is_empty() {
        let generics = derive_input.generics.to_token_stream().to_string();
        return syn::Error::new_spanned(
            &derive_input.generics,
            format!(
                "#[component] 目前不支持带泛型参数的组件类型，检测到泛型参数：{}",
                generics
            ),
        )
        .to_compile_error()
        .into();
    }

    if !matches!(derive_input.data, syn::Data::Struct(_)) {
        return syn::Error::new_spanned(&derive_input.ident, "#[component] 只能用于结构体")
            .to_compile_error()
            .into();
    }

    let mut required = Vec::new();
    let mut disallow_multiple = false;
    let mut order: Option<Expr> = None;
    for arg in args {
        match arg {
            ComponentArg::Require(path) => required.push(path),
            ComponentArg::DisallowMultiple => disallow_multiple = true,
            ComponentArg::Order(expr) => {
                if order.is_some() {
                    return syn::Error::new_spanned(expr, "#[component] 中 `order` 只能出现一次")
                        .to_compile_error()
                        .into();
                }
                order = Some(expr);
            }
        }
    }

    let core = core_crate();
    let struct_ident = &derive_input.ident;

    let required_const = if required.is_empty() {
        quote! {}
    } else {
        let types = required
            .iter()
            .map(|path| quote!(#core::game::component::ComponentType::of::<#path>()));
        quote! {
            const REQUIRED: &'static [#core::game::component::ComponentType] = &[#(#types),*];
        }
    };

    let disallow_const = if disallow_multiple {
        quote! { const DISALLOW_MULTIPLE: bool = true; }
    } else {
        quote! {}
    };

    let order_const = match order {
        Some(expr) => quote! { const EXECUTION_ORDER: i32 = #expr; },
        None => quote! {},
    };

    let expanded = quote! {
        #derive_input

        impl #core::game::component::ComponentKind for #struct_ident {
            #required_const
            #disallow_const
            #order_const
        }
    };

    TokenStream::from(expanded)
}
