use std::{
    any::{Any, TypeId, type_name},
    collections::VecDeque,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
};

use bitflags::bitflags;
use slotmap::new_key_type;
use thiserror::Error;

use super::{
    context::Context,
    entity::{ObjectKey, WorldId},
    system::coroutine::CoroutineKey,
};

pub use canopy_macros::{component, component_impl};

new_key_type! {
    /// 组件在运行时组件表中的键。
    pub struct ComponentKey;
}

bitflags! {
    /// 组件实际实现了哪些生命周期钩子。
    ///
    /// 注册组件时读取一次并缓存；调度器只会调用集合内的钩子，
    /// 只有包含 [`Hooks::UPDATE`] 的组件才会进入每帧更新队列。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Hooks: u8 {
        const AWAKE = 1 << 0;
        const START = 1 << 1;
        const UPDATE = 1 << 2;
        const ON_ENABLE = 1 << 3;
        const ON_DISABLE = 1 << 4;
        const ON_DESTROY = 1 << 5;
    }
}

impl Hooks {
    /// 手写 `impl Component` 时的默认能力集：除 `UPDATE` 外的全部钩子。
    pub const LIFECYCLE: Self = Self::AWAKE
        .union(Self::START)
        .union(Self::ON_ENABLE)
        .union(Self::ON_DISABLE)
        .union(Self::ON_DESTROY);
}

/// 组件行为。
///
/// 所有钩子均可选，默认什么也不做。钩子通过 [`Context`] 访问所属对象与整个运行时；
/// 返回的错误不会被调度器吞掉，而是沿当前帧阶段向上传播。
///
/// 推荐配合 `#[component_impl]` 使用：宏会根据 impl 块中实际写出的钩子生成 [`hooks`](Self::hooks)。
/// 手写实现时默认能力集为 [`Hooks::LIFECYCLE`]，需要每帧更新时必须自行覆盖 `hooks`。
pub trait Component: Any {
    fn hooks(&self) -> Hooks {
        Hooks::LIFECYCLE
    }

    fn awake(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn update(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_enable(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_disable(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_destroy(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 组件类型的静态元数据，通常由 `#[component(...)]` 生成。
pub trait ComponentKind: Component + Sized {
    /// 挂载前必须已存在于同一对象上的组件类型。
    const REQUIRED: &'static [ComponentType] = &[];
    /// 同一对象上是否只允许一个该类型组件。
    const DISALLOW_MULTIPLE: bool = false;
    /// 更新顺序键，升序执行，相同值按加入顺序。
    const EXECUTION_ORDER: i32 = 0;
}

/// 运行期可比较的组件类型描述。
#[derive(Clone, Copy)]
pub struct ComponentType {
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
}

impl ComponentType {
    pub const fn of<C: Component>() -> Self {
        Self {
            type_id: TypeId::of::<C>,
            type_name: type_name::<C>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    pub fn name(&self) -> &'static str {
        (self.type_name)()
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id() == other.type_id()
    }
}

impl Eq for ComponentType {}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ComponentMeta {
    pub(crate) ty: ComponentType,
    pub(crate) required: &'static [ComponentType],
    pub(crate) disallow_multiple: bool,
    pub(crate) execution_order: i32,
}

impl ComponentMeta {
    pub(crate) fn of<C: ComponentKind>() -> Self {
        Self {
            ty: ComponentType::of::<C>(),
            required: C::REQUIRED,
            disallow_multiple: C::DISALLOW_MULTIPLE,
            execution_order: C::EXECUTION_ORDER,
        }
    }
}

/// 无类型的组件句柄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId {
    world: WorldId,
    key: ComponentKey,
}

impl ComponentId {
    pub(crate) fn new(world: WorldId, key: ComponentKey) -> Self {
        Self { world, key }
    }

    pub fn world_id(&self) -> WorldId {
        self.world
    }

    pub(crate) fn key(&self) -> ComponentKey {
        self.key
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.key)
    }
}

/// 带类型的组件句柄，可通过 [`World::component`](super::World::component) 取得组件引用。
pub struct ComponentHandle<C> {
    id: ComponentId,
    _marker: PhantomData<fn() -> C>,
}

impl<C> ComponentHandle<C> {
    pub(crate) fn new(id: ComponentId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }
}

impl<C> Clone for ComponentHandle<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ComponentHandle<C> {}

impl<C> PartialEq for ComponentHandle<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<C> Eq for ComponentHandle<C> {}

impl<C> Hash for ComponentHandle<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<C> fmt::Debug for ComponentHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentHandle")
            .field(&type_name::<C>())
            .field(&self.id)
            .finish()
    }
}

impl<C> From<ComponentHandle<C>> for ComponentId {
    fn from(handle: ComponentHandle<C>) -> Self {
        handle.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("组件 {0} 已被销毁")]
    Destroyed(ComponentId),
    #[error("组件 {id} 不属于运行时 {world}")]
    ForeignWorld { id: ComponentId, world: WorldId },
}

/// 单个生命周期钩子。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hook {
    Awake,
    Start,
    Update,
    OnEnable,
    OnDisable,
    OnDestroy,
}

impl Hook {
    pub(crate) fn flag(self) -> Hooks {
        match self {
            Hook::Awake => Hooks::AWAKE,
            Hook::Start => Hooks::START,
            Hook::Update => Hooks::UPDATE,
            Hook::OnEnable => Hooks::ON_ENABLE,
            Hook::OnDisable => Hooks::ON_DISABLE,
            Hook::OnDestroy => Hooks::ON_DESTROY,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Hook::Awake => "awake",
            Hook::Start => "start",
            Hook::Update => "update",
            Hook::OnEnable => "on_enable",
            Hook::OnDisable => "on_disable",
            Hook::OnDestroy => "on_destroy",
        }
    }

    pub(crate) fn call(
        self,
        component: &mut dyn Component,
        cx: &mut Context<'_>,
    ) -> anyhow::Result<()> {
        match self {
            Hook::Awake => component.awake(cx),
            Hook::Start => component.start(cx),
            Hook::Update => component.update(cx),
            Hook::OnEnable => component.on_enable(cx),
            Hook::OnDisable => component.on_disable(cx),
            Hook::OnDestroy => component.on_destroy(cx),
        }
    }
}

/// 组件的生命周期状态。各轴相互独立。
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LifecycleState {
    pub(crate) enabled: bool,
    pub(crate) awakening: bool,
    pub(crate) awakened: bool,
    pub(crate) starting: bool,
    pub(crate) started: bool,
    /// 已送达 `on_enable` 且尚未送达对应的 `on_disable`。
    pub(crate) active: bool,
    pub(crate) destroyed: bool,
}

pub(crate) struct ComponentSlot {
    pub(crate) object: ObjectKey,
    pub(crate) meta: ComponentMeta,
    pub(crate) hooks: Hooks,
    pub(crate) state: LifecycleState,
    /// 钩子执行期间被取出，执行完毕后放回。
    pub(crate) behaviour: Option<Box<dyn Component>>,
    /// 组件被取出期间针对它的重入钩子，放回前按顺序补发。
    pub(crate) deferred: VecDeque<Hook>,
    pub(crate) coroutines: Vec<CoroutineKey>,
    /// 销毁流程结束；放回时直接释放槽位。
    pub(crate) retired: bool,
}

impl ComponentSlot {
    pub(crate) fn new(object: ObjectKey, behaviour: Box<dyn Component>, meta: ComponentMeta) -> Self {
        let hooks = behaviour.hooks();
        Self {
            object,
            meta,
            hooks,
            state: LifecycleState {
                enabled: true,
                ..LifecycleState::default()
            },
            behaviour: Some(behaviour),
            deferred: VecDeque::new(),
            coroutines: Vec::new(),
            retired: false,
        }
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.meta.ty.type_id()
    }

    pub(crate) fn downcast_ref<C: Component>(&self) -> Option<&C> {
        let behaviour: &dyn Any = self.behaviour.as_deref()?;
        behaviour.downcast_ref::<C>()
    }

    pub(crate) fn downcast_mut<C: Component>(&mut self) -> Option<&mut C> {
        let behaviour: &mut dyn Any = self.behaviour.as_deref_mut()?;
        behaviour.downcast_mut::<C>()
    }
}
