use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use super::{
    component::{Component, ComponentHandle, ComponentId},
    entity::Entity,
    system::coroutine::{CoroutineHandle, Routine},
    world::{Time, World},
};

/// 钩子与协程体的执行上下文。
///
/// 上下文绑定到“当前组件”，并通过 `Deref` 暴露整个 [`World`]。
/// 当前组件在钩子执行期间处于取出状态：通过 `World` 查询它自身会得到 `None`，
/// 对它发起的生命周期操作会在钩子返回后补发。
pub struct Context<'w> {
    world: &'w mut World,
    this: ComponentId,
    entity: Entity,
}

impl<'w> Context<'w> {
    pub(crate) fn new(world: &'w mut World, this: ComponentId, entity: Entity) -> Self {
        Self {
            world,
            this,
            entity,
        }
    }

    /// 当前组件。
    pub fn this(&self) -> ComponentId {
        self.this
    }

    /// 当前组件所属对象。
    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn time(&self) -> &Time {
        self.world.time()
    }

    pub fn delta_time(&self) -> Duration {
        self.world.time().delta
    }

    pub fn is_enabled(&self) -> bool {
        self.world.is_enabled(self.this).unwrap_or(false)
    }

    pub fn is_active_and_enabled(&self) -> bool {
        self.world.is_active_and_enabled(self.this)
    }

    pub fn set_enabled(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.world.set_enabled(self.this, enabled)
    }

    /// 销毁当前组件。钩子返回后补发 `on_disable` / `on_destroy`。
    pub fn destroy(&mut self) -> anyhow::Result<()> {
        self.world.destroy_component(self.this)
    }

    pub fn start_coroutine<R>(&mut self, routine: R) -> anyhow::Result<CoroutineHandle>
    where
        R: Routine + 'static,
    {
        self.world.start_coroutine(self.this, routine)
    }

    pub fn stop_coroutine(&mut self, handle: CoroutineHandle) -> anyhow::Result<()> {
        self.world.stop_coroutine(self.this, handle)
    }

    pub fn stop_all_coroutines(&mut self) -> anyhow::Result<()> {
        self.world.stop_all_coroutines(self.this)
    }

    /// 查找同一对象上的第一个 `C` 类型组件。
    pub fn sibling<C: Component>(&self) -> Option<ComponentHandle<C>> {
        self.world.get_component::<C>(self.entity)
    }
}

impl Deref for Context<'_> {
    type Target = World;

    fn deref(&self) -> &Self::Target {
        self.world
    }
}

impl DerefMut for Context<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.world
    }
}
