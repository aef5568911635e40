use std::any::Any;

use tracing::{trace, warn};

use super::World;
use crate::game::{
    component::{Component, ComponentHandle, ComponentId, ComponentKey, Hook},
    context::Context,
    entity::Entity,
};

impl World {
    /// 调用钩子；组件已销毁时不做任何事。
    pub(crate) fn invoke(&mut self, key: ComponentKey, hook: Hook) -> anyhow::Result<()> {
        match self.components.get(key) {
            Some(slot) if !slot.state.destroyed => self.dispatch(key, hook),
            _ => Ok(()),
        }
    }

    /// 取出组件、执行钩子并放回。
    ///
    /// 组件已被取出（即它自己的某个钩子仍在执行）时，钩子排入该组件的补发队列，
    /// 由外层调用在放回前按顺序执行。
    pub(crate) fn dispatch(&mut self, key: ComponentKey, hook: Hook) -> anyhow::Result<()> {
        let world = self.id();
        let Some(slot) = self.components.get_mut(key) else {
            return Ok(());
        };
        if !slot.hooks.contains(hook.flag()) {
            return Ok(());
        }
        let object = slot.object;
        let Some(mut behaviour) = slot.behaviour.take() else {
            trace!(target: "canopy-core", component = ?key, hook = hook.label(), "hook deferred");
            slot.deferred.push_back(hook);
            return Ok(());
        };

        let this = ComponentId::new(world, key);
        let entity = Entity::new(world, object);
        let mut result = self.call_hook(&mut *behaviour, hook, this, entity);
        self.drain_deferred(key, &mut *behaviour, this, entity, &mut result);
        self.check_in(key, behaviour);
        result
    }

    /// 取出组件后以 `&mut C` 与 `&mut World` 同时访问。组件已销毁或正在执行钩子时返回 `None`。
    ///
    /// `f` 执行期间对该组件发起的钩子在放回前补发；补发钩子的第一个错误作为 `Err` 返回。
    pub fn with_component<C, R>(
        &mut self,
        handle: ComponentHandle<C>,
        f: impl FnOnce(&mut C, &mut World) -> R,
    ) -> Option<anyhow::Result<R>>
    where
        C: Component,
    {
        let key = self.component_key(handle.id()).ok()?;
        let object = self.components.get(key)?.object;
        let mut behaviour = self.components.get_mut(key)?.behaviour.take()?;

        let output = {
            let component: &mut dyn Any = &mut *behaviour;
            component.downcast_mut::<C>().map(|component| f(component, self))
        };

        let this = handle.id();
        let entity = Entity::new(self.id(), object);
        let mut result = Ok(());
        self.drain_deferred(key, &mut *behaviour, this, entity, &mut result);
        self.check_in(key, behaviour);
        let output = output?;
        Some(result.map(|()| output))
    }

    fn call_hook(
        &mut self,
        behaviour: &mut dyn Component,
        hook: Hook,
        this: ComponentId,
        entity: Entity,
    ) -> anyhow::Result<()> {
        trace!(target: "canopy-core", component = %this, entity = %entity, hook = hook.label(), "dispatch hook");
        let mut cx = Context::new(self, this, entity);
        hook.call(behaviour, &mut cx)
    }

    fn drain_deferred(
        &mut self,
        key: ComponentKey,
        behaviour: &mut dyn Component,
        this: ComponentId,
        entity: Entity,
        result: &mut anyhow::Result<()>,
    ) {
        while let Some(hook) = self
            .components
            .get_mut(key)
            .and_then(|slot| slot.deferred.pop_front())
        {
            if let Err(err) = self.call_hook(behaviour, hook, this, entity) {
                if result.is_ok() {
                    *result = Err(err);
                } else {
                    warn!(target: "canopy-core", component = %this, hook = hook.label(), error = %err, "deferred hook failed");
                }
            }
        }
    }

    /// 放回组件；销毁流程已结束时直接释放槽位。
    fn check_in(&mut self, key: ComponentKey, behaviour: Box<dyn Component>) {
        let Some(slot) = self.components.get_mut(key) else {
            return;
        };
        if slot.retired {
            self.components.remove(key);
            return;
        }
        slot.behaviour = Some(behaviour);
    }
}
