use std::any::TypeId;

use tracing::{debug, warn};

use super::World;
use crate::game::{
    component::{
        Component, ComponentError, ComponentHandle, ComponentId, ComponentKey, ComponentKind,
        ComponentMeta, ComponentSlot, ComponentType, Hook, Hooks,
    },
    entity::{Entity, ObjectKey},
    system::coroutine::{CoroutineError, CoroutineHandle, CoroutineKey, Routine},
};

impl World {
    /// 向对象添加组件，随即调用 `awake`，对象处于激活状态时继续级联 `on_enable`。
    ///
    /// 违反组件约束（重复添加 `DISALLOW_MULTIPLE` 组件、缺少 `REQUIRED` 组件）时记录警告并返回 `Ok(None)`。
    pub fn add_component<C: ComponentKind>(
        &mut self,
        entity: Entity,
        component: C,
    ) -> anyhow::Result<Option<ComponentHandle<C>>> {
        let object = self.object_key(entity)?;
        self.ensure_not_destroying(object)?;

        let meta = ComponentMeta::of::<C>();
        if meta.disallow_multiple && self.has_component_type(object, meta.ty.type_id()) {
            warn!(
                target: "canopy-core",
                entity = %entity,
                component = %meta.ty,
                "component disallows multiple instances on one object, skipped"
            );
            return Ok(None);
        }
        if let Some(missing) = self.missing_requirement(object, &meta) {
            warn!(
                target: "canopy-core",
                entity = %entity,
                component = %meta.ty,
                required = %missing,
                "required component missing, skipped"
            );
            return Ok(None);
        }

        let key = self.attach_component(object, Box::new(component), meta);
        self.try_call_awake(key)?;
        self.sync_component(key)?;
        Ok(Some(ComponentHandle::new(ComponentId::new(self.id(), key))))
    }

    /// 启用或禁用组件。值未变化时是空操作；组件尚未 `awake` 时只记录意图。
    pub fn set_enabled(&mut self, component: ComponentId, enabled: bool) -> anyhow::Result<()> {
        let key = self.component_key(component)?;
        let Some(slot) = self.components.get_mut(key) else {
            return Ok(());
        };
        if slot.state.enabled == enabled {
            return Ok(());
        }
        slot.state.enabled = enabled;
        self.sync_component(key)
    }

    /// 销毁组件。处于激活状态时先补发 `on_disable`，再调用 `on_destroy`。
    ///
    /// 对已销毁的组件是空操作。
    pub fn destroy_component(&mut self, component: ComponentId) -> anyhow::Result<()> {
        if component.world_id() != self.id() {
            return Err(ComponentError::ForeignWorld {
                id: component,
                world: self.id(),
            }
            .into());
        }
        self.destroy_component_key(component.key())
    }

    /// 以 `owner` 的名义启动协程；协程在下一次常规阶段取得第一条指令。
    pub fn start_coroutine<R>(
        &mut self,
        owner: ComponentId,
        routine: R,
    ) -> anyhow::Result<CoroutineHandle>
    where
        R: Routine + 'static,
    {
        let key = self.component_key(owner)?;
        let Some(slot) = self.components.get(key) else {
            return Err(CoroutineError::InactiveOwner(owner).into());
        };
        if !slot.state.active {
            return Err(CoroutineError::InactiveOwner(owner).into());
        }

        let coroutine = self.coroutines.spawn(key, Box::new(routine));
        if let Some(slot) = self.components.get_mut(key) {
            slot.coroutines.push(coroutine);
        }
        Ok(CoroutineHandle::new(self.id(), coroutine, key))
    }

    /// 停止 `caller` 启动的协程。协程已结束时是空操作。
    pub fn stop_coroutine(
        &mut self,
        caller: ComponentId,
        handle: CoroutineHandle,
    ) -> anyhow::Result<()> {
        let caller_key = self.component_key(caller)?;
        if handle.world_id() != self.id() || handle.owner().key() != caller_key {
            return Err(CoroutineError::NotOwner {
                owner: handle.owner(),
                caller,
            }
            .into());
        }
        self.finish_coroutine(handle.key());
        Ok(())
    }

    pub fn stop_all_coroutines(&mut self, caller: ComponentId) -> anyhow::Result<()> {
        let key = self.component_key(caller)?;
        self.stop_coroutines_of(key);
        Ok(())
    }

    pub(crate) fn attach_component(
        &mut self,
        object: ObjectKey,
        behaviour: Box<dyn Component>,
        meta: ComponentMeta,
    ) -> ComponentKey {
        let key = self
            .components
            .insert(ComponentSlot::new(object, behaviour, meta));
        if let Some(node) = self.objects.get_mut(object) {
            node.components.push(key);
        }
        key
    }

    /// 丢弃尚未 `awake` 的组件，不调用任何钩子。
    pub(crate) fn discard_component(&mut self, key: ComponentKey) {
        let Some(slot) = self.components.remove(key) else {
            return;
        };
        if let Some(node) = self.objects.get_mut(slot.object) {
            node.components.retain(|component| *component != key);
        }
        self.scheduler.dequeue_start(key);
        self.scheduler.dequeue_update(key);
    }

    pub(crate) fn has_component_type(&self, object: ObjectKey, type_id: TypeId) -> bool {
        self.objects.get(object).is_some_and(|node| {
            node.components.iter().any(|key| {
                self.components
                    .get(*key)
                    .is_some_and(|slot| slot.type_id() == type_id)
            })
        })
    }

    pub(crate) fn missing_requirement(
        &self,
        object: ObjectKey,
        meta: &ComponentMeta,
    ) -> Option<ComponentType> {
        meta.required
            .iter()
            .copied()
            .find(|required| !self.has_component_type(object, required.type_id()))
    }

    pub(crate) fn try_call_awake(&mut self, key: ComponentKey) -> anyhow::Result<()> {
        let Some(slot) = self.components.get_mut(key) else {
            return Ok(());
        };
        if slot.state.destroyed || slot.state.awakened || slot.state.awakening {
            return Ok(());
        }
        slot.state.awakening = true;
        let result = self.invoke(key, Hook::Awake);
        if let Some(slot) = self.components.get_mut(key) {
            slot.state.awakening = false;
            slot.state.awakened = true;
        }
        result
    }

    pub(crate) fn try_call_start(&mut self, key: ComponentKey) -> anyhow::Result<()> {
        let Some(slot) = self.components.get_mut(key) else {
            return Ok(());
        };
        let state = slot.state;
        if state.destroyed || state.started || state.starting || !state.active {
            return Ok(());
        }
        slot.state.starting = true;
        let result = self.invoke(key, Hook::Start);
        if let Some(slot) = self.components.get_mut(key) {
            slot.state.starting = false;
            slot.state.started = true;
        }
        result
    }

    /// 让组件的激活状态与“已启用 && 已 awake && 对象激活”保持一致。
    pub(crate) fn sync_component(&mut self, key: ComponentKey) -> anyhow::Result<()> {
        let Some(slot) = self.components.get(key) else {
            return Ok(());
        };
        let state = slot.state;
        let object_active = self
            .objects
            .get(slot.object)
            .is_some_and(|node| node.active_in_hierarchy);
        let desired = !state.destroyed && state.enabled && state.awakened && object_active;

        match (state.active, desired) {
            (false, true) => self.activate_component(key),
            (true, false) => self.deactivate_component(key),
            _ => Ok(()),
        }
    }

    fn activate_component(&mut self, key: ComponentKey) -> anyhow::Result<()> {
        if let Some(slot) = self.components.get_mut(key) {
            slot.state.active = true;
        }
        self.invoke(key, Hook::OnEnable)?;

        // `on_enable` 可能已禁用或销毁该组件。
        let Some(slot) = self.components.get(key) else {
            return Ok(());
        };
        let state = slot.state;
        if state.destroyed || !state.active {
            return Ok(());
        }
        let updatable = slot.hooks.contains(Hooks::UPDATE);
        let order = slot.meta.execution_order;
        if !state.started && !state.starting {
            self.scheduler.enqueue_start(key);
        }
        if updatable {
            self.scheduler.enqueue_update(key, order);
        }
        Ok(())
    }

    fn deactivate_component(&mut self, key: ComponentKey) -> anyhow::Result<()> {
        if let Some(slot) = self.components.get_mut(key) {
            slot.state.active = false;
        }
        let result = self.invoke(key, Hook::OnDisable);
        self.scheduler.dequeue_update(key);
        self.scheduler.dequeue_start(key);
        self.stop_coroutines_of(key);
        result
    }

    pub(crate) fn destroy_component_key(&mut self, key: ComponentKey) -> anyhow::Result<()> {
        let Some(slot) = self.components.get_mut(key) else {
            return Ok(());
        };
        if slot.state.destroyed {
            return Ok(());
        }
        slot.state.destroyed = true;
        let was_active = slot.state.active;
        let awakened = slot.state.awakened || slot.state.awakening;
        let object = slot.object;
        let ty = slot.meta.ty;
        slot.state.active = false;

        if let Some(node) = self.objects.get_mut(object) {
            node.components.retain(|component| *component != key);
        }
        self.scheduler.dequeue_update(key);
        self.scheduler.dequeue_start(key);
        self.stop_coroutines_of(key);

        let mut result = Ok(());
        if was_active {
            result = self.dispatch(key, Hook::OnDisable);
        }
        if awakened {
            let destroyed = self.dispatch(key, Hook::OnDestroy);
            if result.is_ok() {
                result = destroyed;
            }
        }

        // 钩子仍在执行时由放回流程释放槽位。
        let checked_out = self
            .components
            .get(key)
            .map(|slot| slot.behaviour.is_none());
        match checked_out {
            Some(false) => {
                self.components.remove(key);
            }
            Some(true) => {
                if let Some(slot) = self.components.get_mut(key) {
                    slot.retired = true;
                }
            }
            None => {}
        }
        debug!(
            target: "canopy-core",
            entity = %self.entity(object),
            component = %ty,
            "component destroyed"
        );
        result
    }

    pub(crate) fn stop_coroutines_of(&mut self, key: ComponentKey) {
        let Some(slot) = self.components.get_mut(key) else {
            return;
        };
        for coroutine in std::mem::take(&mut slot.coroutines) {
            self.coroutines.remove(coroutine);
        }
    }

    pub(crate) fn finish_coroutine(&mut self, coroutine: CoroutineKey) {
        let Some(owner) = self.coroutines.remove(coroutine) else {
            return;
        };
        if let Some(slot) = self.components.get_mut(owner) {
            slot.coroutines.retain(|key| *key != coroutine);
        }
    }
}
