//! `canopy-core` 的过程宏。
//!
//! - `#[component]`：为组件结构体实现 `ComponentKind`（依赖、唯一性、执行顺序）
//! - `#[component_impl]`：根据 `impl Component for T` 中实际写出的钩子生成 `hooks()`
//! - `scene!`：声明式构建对象树

use proc_macro::TokenStream;
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};

mod component_attr;
mod component_impl_attr;
mod scene_macro;

/// 为组件结构体实现 `ComponentKind`。
///
/// 参数（均可选，逗号分隔）：
/// - 组件类型路径：挂载前必须已存在的组件
/// - `disallow_multiple`：同一对象上只允许一个实例
/// - `order = <expr>`：更新执行顺序（`i32`，默认 0）
#[proc_macro_attribute]
pub fn component(args: TokenStream, input: TokenStream) -> TokenStream {
    component_attr::expand_component(args, input)
}

#[proc_macro_attribute]
pub fn component_impl(args: TokenStream, input: TokenStream) -> TokenStream {
    component_impl_attr::expand_component_impl(args, input)
}

#[proc_macro]
pub fn scene(input: TokenStream) -> TokenStream {
    scene_macro::expand_scene(input)
}

/// `canopy-core` 在调用方中的路径。
///
/// `canopy-core` 在 crate 根声明了 `extern crate self as canopy_core;`，
/// 因此即使在 crate 自身内部也可以用 `::canopy_core::...` 指向自己。
pub(crate) fn core_crate() -> proc_macro2::TokenStream {
    match crate_name("canopy-core") {
        Ok(FoundCrate::Itself) => quote!(::canopy_core),
        Ok(FoundCrate::Name(name)) => {
            let ident = format_ident!("{}", name);
            quote!(::#ident)
        }
        Err(_) => quote!(::canopy_core),
    }
}
