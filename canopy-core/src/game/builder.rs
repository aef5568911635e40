//! 两阶段构建对象子树。
//!
//! [`ObjectBuilder::build`] 只做结构性工作：创建对象、挂载组件、校验组件约束、连接子节点、
//! 填充按引用输出（[`ObjectRef`] / [`ComponentRef`]），不调用任何用户钩子。
//! 构建出的子树尚未挂到任何激活的父节点下，因此处于未激活状态。
//!
//! [`BuiltObject::initialize`] 依次执行所有延迟初始化回调、对子树中所有组件调用 `awake`，
//! 最后把子树根挂到目标父节点下，触发 `on_enable` 与启动/更新排队。
//! 因为初始化回调在整个子树构建完成后才执行，回调里可以读取声明在后面的兄弟节点的引用。
//!
//! 未经 `initialize` 就被丢弃的 [`BuiltObject`] 会把子树根登记到运行时，
//! 下一次 [`World::begin_frame`] 时整棵游离子树被销毁（其组件从未 `awake`，不触发钩子）。

use std::{
    cell::{Cell, RefCell},
    fmt, mem,
    rc::Rc,
};

use anyhow::anyhow;
use tracing::warn;

use super::{
    component::{ComponentHandle, ComponentId, ComponentKey, ComponentKind, ComponentMeta, ComponentType},
    entity::{Entity, ObjectKey},
    world::World,
};

type Initializer = Box<dyn FnOnce(&mut World) -> anyhow::Result<()>>;
type ObjectInitializer = Box<dyn FnOnce(&mut World, Entity) -> anyhow::Result<()>>;
type AttachFn = Box<dyn FnOnce(&mut World, ObjectKey) -> Attached>;

/// 按引用输出的对象句柄，构建期间被填充。
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<Cell<Option<Entity>>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Entity> {
        self.0.get()
    }

    /// 取得已填充的句柄，尚未构建时返回错误。
    pub fn require(&self) -> anyhow::Result<Entity> {
        self.get().ok_or_else(|| anyhow!("对象引用尚未被构建填充"))
    }

    pub(crate) fn set(&self, entity: Option<Entity>) {
        self.0.set(entity);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectRef").field(&self.get()).finish()
    }
}

/// 按引用输出的组件句柄。组件因约束校验被移除时会被清空。
pub struct ComponentRef<C>(Rc<Cell<Option<ComponentHandle<C>>>>);

impl<C> ComponentRef<C> {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(None)))
    }

    pub fn get(&self) -> Option<ComponentHandle<C>> {
        self.0.get()
    }

    pub fn require(&self) -> anyhow::Result<ComponentHandle<C>> {
        self.get()
            .ok_or_else(|| anyhow!("组件引用尚未被构建填充或组件已被移除"))
    }

    fn set(&self, handle: Option<ComponentHandle<C>>) {
        self.0.set(handle);
    }
}

impl<C> Clone for ComponentRef<C> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<C> Default for ComponentRef<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ComponentRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentRef").field(&self.get()).finish()
    }
}

struct PendingComponent {
    ty: ComponentType,
    disallow_multiple: bool,
    attach: AttachFn,
}

struct Attached {
    key: ComponentKey,
    initializer: Option<Initializer>,
    release: Option<Box<dyn FnOnce()>>,
}

/// 声明式的对象构建器。
pub struct ObjectBuilder {
    name: Option<String>,
    active: bool,
    bind: Option<ObjectRef>,
    components: Vec<PendingComponent>,
    initializers: Vec<ObjectInitializer>,
    children: Vec<ObjectBuilder>,
}

impl ObjectBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::unnamed()
        }
    }

    /// 使用默认名称 `object`。
    pub fn unnamed() -> Self {
        Self {
            name: None,
            active: true,
            bind: None,
            components: Vec::new(),
            initializers: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_component<C: ComponentKind>(self, component: C) -> Self {
        self.push_component(component, None, None)
    }

    /// 挂载组件并注册初始化回调，回调在 `initialize` 阶段、`awake` 之前执行。
    pub fn with_component_init<C, F>(self, component: C, init: F) -> Self
    where
        C: ComponentKind,
        F: FnOnce(&mut C, &mut World) -> anyhow::Result<()> + 'static,
    {
        self.push_component(component, Some(Box::new(init)), None)
    }

    /// 挂载组件并在构建时把句柄写入 `out`。
    pub fn with_component_ref<C: ComponentKind>(self, component: C, out: &ComponentRef<C>) -> Self {
        self.push_component(component, None, Some(out.clone()))
    }

    /// 对象级初始化回调，在该对象的组件初始化回调之后执行。
    pub fn with_initializer<F>(mut self, init: F) -> Self
    where
        F: FnOnce(&mut World, Entity) -> anyhow::Result<()> + 'static,
    {
        self.initializers.push(Box::new(init));
        self
    }

    pub fn with_child(mut self, child: ObjectBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// 构建时把对象句柄写入 `out`。
    pub fn bind(mut self, out: &ObjectRef) -> Self {
        self.bind = Some(out.clone());
        self
    }

    fn push_component<C: ComponentKind>(
        mut self,
        component: C,
        init: Option<Box<dyn FnOnce(&mut C, &mut World) -> anyhow::Result<()>>>,
        out: Option<ComponentRef<C>>,
    ) -> Self {
        let attach: AttachFn = Box::new(move |world: &mut World, object: ObjectKey| {
            let key = world.attach_component(object, Box::new(component), ComponentMeta::of::<C>());
            let handle = ComponentHandle::<C>::new(ComponentId::new(world.id(), key));
            if let Some(out) = &out {
                out.set(Some(handle));
            }
            let initializer = init.map(|init| -> Initializer {
                Box::new(move |world: &mut World| match world.with_component(handle, init) {
                    Some(outcome) => outcome?,
                    None => Ok(()),
                })
            });
            let release = out.map(|out| -> Box<dyn FnOnce()> { Box::new(move || out.set(None)) });
            Attached {
                key,
                initializer,
                release,
            }
        });
        self.components.push(PendingComponent {
            ty: ComponentType::of::<C>(),
            disallow_multiple: C::DISALLOW_MULTIPLE,
            attach,
        });
        self
    }

    /// 结构性构建：不调用任何用户钩子，结果处于未激活状态。
    pub fn build(self, world: &mut World) -> anyhow::Result<BuiltObject> {
        let mut output = BuildOutput::default();
        let root = match self.build_into(world, None, &mut output) {
            Ok(root) => root,
            Err(err) => {
                // 失败前已创建的游离节点随之销毁。
                if let Some(&root) = output.objects.first() {
                    let root = world.entity(root);
                    if let Err(cleanup) = world.destroy_object(root) {
                        warn!(target: "canopy-core", entity = %root, error = %cleanup, "failed to clean up partially built object");
                    }
                }
                return Err(err);
            }
        };
        Ok(BuiltObject {
            root: world.entity(root),
            objects: output.objects,
            initializers: output.initializers,
            abandoned: Some(world.abandoned_builds()),
        })
    }

    fn build_into(
        self,
        world: &mut World,
        parent: Option<ObjectKey>,
        output: &mut BuildOutput,
    ) -> anyhow::Result<ObjectKey> {
        let name = self.name.unwrap_or_else(|| String::from("object"));
        let key = world.spawn_detached(name, self.active, parent)?;
        let entity = world.entity(key);
        output.objects.push(key);
        if let Some(bind) = &self.bind {
            bind.set(Some(entity));
        }

        let mut attached = Vec::with_capacity(self.components.len());
        for pending in self.components {
            if pending.disallow_multiple && world.has_component_type(key, pending.ty.type_id()) {
                warn!(
                    target: "canopy-core",
                    entity = %entity,
                    component = %pending.ty,
                    "component disallows multiple instances on one object, skipped"
                );
                continue;
            }
            attached.push((pending.attach)(world, key));
        }

        Self::validate_requirements(world, key, entity);

        for component in attached {
            if world.components.contains_key(component.key) {
                output.initializers.extend(component.initializer);
            } else if let Some(release) = component.release {
                release();
            }
        }
        for init in self.initializers {
            output
                .initializers
                .push(Box::new(move |world: &mut World| init(world, entity)));
        }

        for child in self.children {
            child.build_into(world, Some(key), output)?;
        }
        Ok(key)
    }

    /// 反复移除缺少依赖的组件，直到对象上的组件集合稳定。
    fn validate_requirements(world: &mut World, object: ObjectKey, entity: Entity) {
        loop {
            let components = world
                .objects
                .get(object)
                .map(|node| node.components.clone())
                .unwrap_or_default();
            let violation = components.into_iter().find_map(|key| {
                let meta = world.components.get(key)?.meta;
                world
                    .missing_requirement(object, &meta)
                    .map(|missing| (key, meta.ty, missing))
            });
            let Some((key, ty, missing)) = violation else {
                return;
            };
            warn!(
                target: "canopy-core",
                entity = %entity,
                component = %ty,
                required = %missing,
                "required component missing, component removed"
            );
            world.discard_component(key);
        }
    }
}

impl fmt::Debug for ObjectBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBuilder")
            .field("name", &self.name)
            .field("active", &self.active)
            .field(
                "components",
                &self.components.iter().map(|c| c.ty).collect::<Vec<_>>(),
            )
            .field("children", &self.children)
            .finish()
    }
}

#[derive(Default)]
struct BuildOutput {
    objects: Vec<ObjectKey>,
    initializers: Vec<Initializer>,
}

/// 构建完成、尚未初始化的对象子树。
#[must_use = "BuiltObject 需要调用 initialize 才会挂到场景树并触发生命周期"]
pub struct BuiltObject {
    root: Entity,
    objects: Vec<ObjectKey>,
    initializers: Vec<Initializer>,
    /// 未初始化即被丢弃时登记子树根的队列，`initialize` 后为 `None`。
    abandoned: Option<Rc<RefCell<Vec<Entity>>>>,
}

impl BuiltObject {
    /// 子树根对象。
    pub fn entity(&self) -> Entity {
        self.root
    }

    /// 执行初始化回调 → 对子树所有组件调用 `awake`（前序）→ 挂到 `parent`（默认根对象）下。
    ///
    /// 任一步骤失败时销毁整个游离子树并返回错误。
    pub fn initialize(mut self, world: &mut World, parent: Option<Entity>) -> anyhow::Result<Entity> {
        self.abandoned = None;
        let root = self.root;
        let objects = mem::take(&mut self.objects);
        let initializers = mem::take(&mut self.initializers);
        match Self::run_initialize(world, root, objects, initializers, parent) {
            Ok(()) => Ok(root),
            Err(err) => {
                if let Err(cleanup) = world.destroy_object(root) {
                    warn!(target: "canopy-core", entity = %root, error = %cleanup, "failed to clean up partially initialized object");
                }
                Err(err)
            }
        }
    }

    fn run_initialize(
        world: &mut World,
        root: Entity,
        objects: Vec<ObjectKey>,
        initializers: Vec<Initializer>,
        parent: Option<Entity>,
    ) -> anyhow::Result<()> {
        for init in initializers {
            init(world)?;
        }
        for object in objects {
            let components = world
                .objects
                .get(object)
                .map(|node| node.components.clone())
                .unwrap_or_default();
            for component in components {
                world.try_call_awake(component)?;
            }
        }
        world.change_parent(root, parent)
    }
}

impl Drop for BuiltObject {
    fn drop(&mut self) {
        if let Some(abandoned) = self.abandoned.take() {
            abandoned.borrow_mut().push(self.root);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, time::Duration};

    use super::*;
    use crate::game::{
        component::{Component, component, component_impl},
        context::Context,
        testing::{Log, Recorder},
    };

    #[component]
    struct Target;

    #[component_impl]
    impl Component for Target {}

    /// 依赖 `Target`。
    #[component(Target)]
    struct NeedsTarget;

    #[component_impl]
    impl Component for NeedsTarget {}

    /// 依赖 `NeedsTarget`，用于验证传递移除。
    #[component(NeedsTarget)]
    struct NeedsNeedsTarget;

    #[component_impl]
    impl Component for NeedsNeedsTarget {}

    #[component(disallow_multiple)]
    struct Unique;

    #[component_impl]
    impl Component for Unique {}

    #[component]
    struct Follower {
        target: Option<Entity>,
        seen_in_awake: Rc<RefCell<Option<Entity>>>,
    }

    #[component_impl]
    impl Component for Follower {
        fn awake(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
            *self.seen_in_awake.borrow_mut() = self.target;
            Ok(())
        }
    }

    #[test]
    fn initializer_reads_reference_declared_later() -> anyhow::Result<()> {
        let mut world = World::new();
        let sibling = ObjectRef::new();
        let seen = Rc::new(RefCell::new(None));

        let initializer_ref = sibling.clone();
        let builder = ObjectBuilder::new("p")
            .with_child(ObjectBuilder::new("q").with_component_init(
                Follower {
                    target: None,
                    seen_in_awake: seen.clone(),
                },
                move |follower, _world| {
                    follower.target = Some(initializer_ref.require()?);
                    Ok(())
                },
            ))
            .with_child(ObjectBuilder::new("r").bind(&sibling));

        let built = builder.build(&mut world)?;
        assert!(sibling.get().is_some(), "build 阶段填充引用");
        assert!(seen.borrow().is_none(), "build 阶段不调用钩子");
        assert!(!world.is_active_in_hierarchy(built.entity()));

        let p = built.initialize(&mut world, None)?;
        assert_eq!(*seen.borrow(), sibling.get(), "awake 之前已解析引用");
        assert!(world.is_active_in_hierarchy(p));
        assert_eq!(world.path(sibling.require()?)?, "root/p/r");
        Ok(())
    }

    #[test]
    fn missing_requirement_removes_component_transitively() -> anyhow::Result<()> {
        let mut world = World::new();
        let needs = ComponentRef::<NeedsTarget>::new();
        let entity = world.instantiate(
            ObjectBuilder::new("object")
                .with_component_ref(NeedsTarget, &needs)
                .with_component(NeedsNeedsTarget)
                .with_component(Unique),
            None,
        )?;

        assert!(needs.get().is_none(), "被移除组件的引用应被清空");
        assert!(world.get_component::<NeedsTarget>(entity).is_none());
        assert!(world.get_component::<NeedsNeedsTarget>(entity).is_none());
        assert_eq!(world.components(entity).len(), 1);
        assert!(world.get_component::<Unique>(entity).is_some());
        Ok(())
    }

    #[test]
    fn satisfied_requirement_keeps_component() -> anyhow::Result<()> {
        let mut world = World::new();
        let entity = world.instantiate(
            ObjectBuilder::new("object")
                .with_component(Target)
                .with_component(NeedsTarget)
                .with_component(Unique)
                .with_component(Unique),
            None,
        )?;
        assert!(world.get_component::<NeedsTarget>(entity).is_some());
        assert_eq!(world.get_components::<Unique>(entity).len(), 1, "重复的唯一组件被跳过");
        Ok(())
    }

    #[test]
    fn awake_runs_for_whole_subtree_before_any_enable() -> anyhow::Result<()> {
        let mut world = World::new();
        let log = Log::default();
        world.instantiate(
            ObjectBuilder::new("parent")
                .with_component(Recorder::new("parent", &log))
                .with_child(ObjectBuilder::new("child").with_component(Recorder::new("child", &log))),
            None,
        )?;

        assert_eq!(
            log.take(),
            vec![
                "parent:awake",
                "child:awake",
                "parent:on_enable",
                "child:on_enable",
            ]
        );

        world.begin_frame(Duration::from_millis(16));
        world.update()?;
        assert_eq!(
            log.take(),
            vec![
                "parent:start",
                "child:start",
                "parent:update",
                "child:update",
            ]
        );
        Ok(())
    }

    #[test]
    fn inactive_builder_awakes_without_enabling() -> anyhow::Result<()> {
        let mut world = World::new();
        let log = Log::default();
        let entity = world.instantiate(
            ObjectBuilder::new("hidden")
                .active(false)
                .with_component(Recorder::new("hidden", &log)),
            None,
        )?;
        assert_eq!(log.take(), vec!["hidden:awake"]);
        assert!(!world.is_active_in_hierarchy(entity));

        world.set_self_active(entity, true)?;
        assert_eq!(log.take(), vec!["hidden:on_enable"]);
        Ok(())
    }

    #[test]
    fn failing_initializer_destroys_orphan_subtree() -> anyhow::Result<()> {
        let mut world = World::new();
        let bound = ObjectRef::new();
        let err = world
            .instantiate(
                ObjectBuilder::new("broken")
                    .bind(&bound)
                    .with_initializer(|_world, _entity| Err(anyhow!("init failed"))),
                None,
            )
            .expect_err("初始化失败应返回错误");
        assert_eq!(err.to_string(), "init failed");
        assert!(!world.contains(bound.require()?));
        assert!(world.children(world.root()).is_empty());
        Ok(())
    }

    #[test]
    fn dropped_built_object_is_reclaimed_next_frame() -> anyhow::Result<()> {
        let mut world = World::new();
        let log = Log::default();
        let bound = ObjectRef::new();
        let kept = ObjectRef::new();

        let built = ObjectBuilder::new("abandoned")
            .bind(&bound)
            .with_component(Recorder::new("abandoned", &log))
            .with_child(ObjectBuilder::new("inner"))
            .build(&mut world)?;
        let entity = built.entity();
        drop(built);

        // 已初始化的子树不受影响。
        world.instantiate(ObjectBuilder::new("kept").bind(&kept), None)?;

        assert!(world.contains(entity), "丢弃后到下一帧前仍存在");
        world.begin_frame(Duration::from_millis(16));
        assert!(!world.contains(bound.require()?));
        assert!(world.contains(kept.require()?));
        assert_eq!(world.objects.len(), 2, "只剩根对象与 kept");
        assert!(log.take().is_empty(), "从未 awake 的组件不触发任何钩子");
        Ok(())
    }

    #[test]
    fn failed_build_removes_partial_subtree() {
        let mut world = World::new();
        let bound = ObjectRef::new();
        let result = ObjectBuilder::new("partial")
            .bind(&bound)
            .with_child(ObjectBuilder::new("bad name"))
            .build(&mut world);

        assert!(result.is_err());
        let partial = bound.get().expect("根节点在失败前已创建");
        assert!(!world.contains(partial));
        assert_eq!(world.objects.len(), 1);
    }
}
