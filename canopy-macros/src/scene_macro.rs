use std::collections::HashSet;

use proc_macro::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    Block, Expr, ExprClosure, Ident, Token, braced, parenthesized,
    parse::{Parse, ParseStream},
    parse_macro_input,
    spanned::Spanned,
};

use crate::core_crate;

syn::custom_keyword!(node);
syn::custom_keyword!(with);
syn::custom_keyword!(active);

struct SceneInput {
    root: NodeDecl,
}

impl Parse for SceneInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Err(input.error("scene! 需要且仅需要一个根 node {...}"));
        }
        let root: NodeDecl = input.parse()?;
        if !input.is_empty() {
            return Err(input.error("scene! 顶层只允许一个根 node"));
        }
        Ok(Self { root })
    }
}

struct NodeDecl {
    name: Option<Expr>,
    bind: Option<Ident>,
    items: Vec<NodeItem>,
    span: proc_macro2::Span,
}

impl Parse for NodeDecl {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let node_kw: node = input.parse()?;
        let span = node_kw.span();

        let mut name = if input.peek(Token![as]) || input.peek(syn::token::Brace) {
            None
        } else {
            Some(Expr::parse_without_eager_brace(input)?)
        };

        // `node "name" as ident { ... }` 会被 syn 解析成 `ExprCast`，
        // 这里把它拆回 name = "name"，bind = ident。
        let mut bind_from_name: Option<Ident> = None;
        if let Some(Expr::Cast(expr_cast)) = &name
            && let syn::Type::Path(type_path) = &*expr_cast.ty
            && type_path.qself.is_none()
            && type_path.path.segments.len() == 1
        {
            bind_from_name = Some(type_path.path.segments[0].ident.clone());
            name = Some((*expr_cast.expr).clone());
        }

        let mut bind = if input.peek(Token![as]) {
            input.parse::<Token![as]>()?;
            Some(input.parse::<Ident>()?)
        } else {
            None
        };
        if bind.is_some() && bind_from_name.is_some() {
            return Err(syn::Error::new(
                span,
                "scene!: node 绑定重复：请只使用一次 `as ident`",
            ));
        }
        if bind.is_none() {
            bind = bind_from_name;
        }

        let content;
        braced!(content in input);
        let mut items = Vec::new();
        while !content.is_empty() {
            items.push(content.parse::<NodeItem>()?);
        }

        Ok(Self {
            name,
            bind,
            items,
            span,
        })
    }
}

enum NodeItem {
    Child(NodeDecl),
    With(WithItem),
    Component(ComponentItem),
    Active(Expr),
}

impl Parse for NodeItem {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        if input.peek(node) {
            return Ok(Self::Child(input.parse()?));
        }
        if input.peek(with) {
            return Ok(Self::With(input.parse()?));
        }
        if input.peek(Token![+]) {
            return Ok(Self::Component(input.parse()?));
        }
        if input.peek(active) {
            input.parse::<active>()?;
            let content;
            parenthesized!(content in input);
            let expr: Expr = content.parse()?;
            input.parse::<Token![;]>()?;
            return Ok(Self::Active(expr));
        }

        Err(input.error(
            "node 体内只允许：node ...、with(world) {...}、+ Component ...;、active(...);",
        ))
    }
}

/// `with(world) { ... }` 或 `with(world, entity) { ... }`。
struct WithItem {
    world: Ident,
    entity: Option<Ident>,
    block: Block,
}

impl Parse for WithItem {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        input.parse::<with>()?;
        let content;
        parenthesized!(content in input);
        let world: Ident = content.parse()?;
        let entity = if content.peek(Token![,]) {
            content.parse::<Token![,]>()?;
            if content.is_empty() {
                None
            } else {
                Some(content.parse::<Ident>()?)
            }
        } else {
            None
        };
        if !content.is_empty() {
            return Err(content.error("with(...) 只接受 world 与可选的 entity 两个标识符"));
        }
        let block: Block = input.parse()?;
        let _ = input.parse::<Token![;]>();
        Ok(Self {
            world,
            entity,
            block,
        })
    }
}

struct ComponentItem {
    expr: Expr,
    init: Option<ExprClosure>,
}

impl Parse for ComponentItem {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        input.parse::<Token![+]>()?;
        let expr: Expr = input.parse()?;
        let init = if input.peek(Token![=>]) {
            input.parse::<Token![=>]>()?;
            Some(input.parse::<ExprClosure>()?)
        } else {
            None
        };
        input.parse::<Token![;]>()?;
        Ok(Self { expr, init })
    }
}

struct Expander {
    core: proc_macro2::TokenStream,
    binds: Vec<Ident>,
    root_ref: Ident,
}

impl Expander {
    fn ref_ident(bind: &Ident) -> Ident {
        format_ident!("__canopy_ref_{}", bind)
    }

    /// 在回调中克隆所有引用，并在回调体开头把它们解析为 `Entity`。
    fn bind_prelude(&self) -> (proc_macro2::TokenStream, proc_macro2::TokenStream) {
        let core = &self.core;
        let refs: Vec<Ident> = self.binds.iter().map(Self::ref_ident).collect();
        let binds = &self.binds;
        let clones = quote! {
            #(let #refs = ::core::clone::Clone::clone(&#refs);)*
        };
        let lets = quote! {
            #(
                #[allow(unused_variables)]
                let #binds: #core::game::entity::Entity = #refs.require()?;
            )*
        };
        (clones, lets)
    }

    fn expand_node(&self, decl: &NodeDecl, is_root: bool) -> proc_macro2::TokenStream {
        let core = &self.core;
        let span = decl.span;
        let builder_ty = quote!(#core::game::builder::ObjectBuilder);
        let world_ty = quote!(#core::game::world::World);
        let entity_ty = quote!(#core::game::entity::Entity);

        let mut chain = match &decl.name {
            Some(name) => quote_spanned!(span=> #builder_ty::new(#name)),
            None => quote_spanned!(span=> #builder_ty::unnamed()),
        };

        let bind_ref = match (&decl.bind, is_root) {
            (Some(bind), _) => Some(Self::ref_ident(bind)),
            (None, true) => Some(self.root_ref.clone()),
            (None, false) => None,
        };
        if let Some(bind_ref) = bind_ref {
            chain = quote!(#chain.bind(&#bind_ref));
        }

        for item in &decl.items {
            chain = match item {
                NodeItem::Active(expr) => quote!(#chain.active(#expr)),
                NodeItem::Component(ComponentItem { expr, init: None }) => {
                    quote!(#chain.with_component(#expr))
                }
                NodeItem::Component(ComponentItem {
                    expr,
                    init: Some(init),
                }) => {
                    let (clones, lets) = self.bind_prelude();
                    quote_spanned! {init.span()=>
                        #chain.with_component_init(#expr, {
                            #clones
                            move |__canopy_component, __canopy_world: &mut #world_ty|
                                -> ::anyhow::Result<()> {
                                #lets
                                __canopy_apply(__canopy_component, __canopy_world, #init)
                            }
                        })
                    }
                }
                NodeItem::With(WithItem {
                    world,
                    entity,
                    block,
                }) => {
                    let (clones, lets) = self.bind_prelude();
                    let entity_let = entity.as_ref().map(|entity| {
                        quote!(let #entity: #entity_ty = __canopy_entity;)
                    });
                    quote! {
                        #chain.with_initializer({
                            #clones
                            move |__canopy_world: &mut #world_ty, __canopy_entity: #entity_ty|
                                -> ::anyhow::Result<()> {
                                #lets
                                #entity_let
                                let #world: &mut #world_ty = __canopy_world;
                                #block
                            }
                        })
                    }
                }
                NodeItem::Child(child) => {
                    let child = self.expand_node(child, false);
                    quote!(#chain.with_child(#child))
                }
            };
        }
        chain
    }
}

fn collect_binds(
    decl: &NodeDecl,
    seen: &mut HashSet<String>,
    out: &mut Vec<Ident>,
    is_root: bool,
) -> syn::Result<()> {
    if let Some(bind) = &decl.bind {
        let name = bind.to_string();
        if name == "root" && !is_root {
            return Err(syn::Error::new_spanned(
                bind,
                "scene!: `root` 是保留的绑定名，只能用于根 node",
            ));
        }
        if !seen.insert(name) {
            return Err(syn::Error::new_spanned(bind, "scene!: 绑定名重复"));
        }
        out.push(bind.clone());
    }
    for item in &decl.items {
        if let NodeItem::Child(child) = item {
            collect_binds(child, seen, out, false)?;
        }
    }
    Ok(())
}

fn expand(scene: SceneInput) -> syn::Result<proc_macro2::TokenStream> {
    let core = core_crate();
    let world_ty = quote!(#core::game::world::World);
    let entity_ty = quote!(#core::game::entity::Entity);
    let ref_ty = quote!(#core::game::builder::ObjectRef);

    let mut binds = Vec::new();
    collect_binds(&scene.root, &mut HashSet::new(), &mut binds, true)?;

    let root_ref = match &scene.root.bind {
        Some(bind) => Expander::ref_ident(bind),
        None => format_ident!("__canopy_ref_root"),
    };
    let mut all_refs: Vec<Ident> = binds.iter().map(Expander::ref_ident).collect();
    if scene.root.bind.is_none() {
        all_refs.push(root_ref.clone());
    }

    let expander = Expander {
        core: core.clone(),
        binds,
        root_ref: root_ref.clone(),
    };
    let builder = expander.expand_node(&scene.root, true);

    let fields: Vec<&Ident> = expander
        .binds
        .iter()
        .filter(|bind| bind.to_string() != "root")
        .collect();
    let field_refs = fields.iter().map(|bind| Expander::ref_ident(bind));

    Ok(quote! {{
        #[allow(non_camel_case_types)]
        pub struct SceneBindings {
            pub root: #entity_ty,
            #(pub #fields: #entity_ty,)*
        }

        #[allow(dead_code)]
        fn __canopy_apply<C, F>(
            component: &mut C,
            world: &mut #world_ty,
            init: F,
        ) -> ::anyhow::Result<()>
        where
            F: ::core::ops::FnOnce(&mut C, &mut #world_ty) -> ::anyhow::Result<()>,
        {
            init(component, world)
        }

        move |__canopy_world: &mut #world_ty,
              __canopy_parent: ::core::option::Option<#entity_ty>|
              -> ::anyhow::Result<SceneBindings> {
            #(let #all_refs = #ref_ty::new();)*
            #builder
                .build(__canopy_world)?
                .initialize(__canopy_world, __canopy_parent)?;
            ::core::result::Result::Ok(SceneBindings {
                root: #root_ref.require()?,
                #(#fields: #field_refs.require()?,)*
            })
        }
    }})
}

/// 展开为 `FnOnce(&mut World, Option<Entity>) -> anyhow::Result<SceneBindings>` 闭包。
///
/// 闭包内部先 `build` 整棵子树，再 `initialize` 到给定父对象（`None` 表示场景根）。
/// `SceneBindings` 含 `root` 以及每个 `as ident` 绑定的对象句柄。
pub fn expand_scene(input: TokenStream) -> TokenStream {
    let scene = parse_macro_input!(input as SceneInput);
    match expand(scene) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
