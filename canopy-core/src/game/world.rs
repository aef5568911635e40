mod dispatch;
mod lifecycle;
mod node;

#[cfg(test)]
mod tests;

use std::{any::TypeId, cell::RefCell, rc::Rc, time::Duration};

use slotmap::SlotMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    builder::ObjectBuilder,
    component::{
        Component, ComponentError, ComponentHandle, ComponentId, ComponentKey, ComponentSlot,
    },
    entity::{Entity, HierarchyError, ObjectKey, ObjectNode, WorldId, validate_name},
    system::{
        coroutine::{CoroutineProcessor, Phase},
        scheduler::SceneProcessor,
    },
};
use crate::config::WorldConfig;

/// 帧时间。由 [`World::begin_frame`] 在每帧开始时记录。
#[derive(Debug, Clone, Copy, Default)]
pub struct Time {
    /// 上一帧到本帧的间隔。
    pub delta: Duration,
    /// 自运行时创建以来累计的帧间隔。
    pub elapsed: Duration,
    /// 已开始的帧数。
    pub frame: u64,
}

/// 帧内的三个遍历阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePass {
    /// 启动/更新调度（[`World::update`]）。
    Update,
    /// 协程常规阶段（[`World::update_after_process`]）。
    Coroutines,
    /// 协程帧末阶段（[`World::end_frame_after_process`]）。
    EndOfFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("帧阶段 {requested:?} 不能在 {running:?} 执行期间重入")]
    Reentrant {
        running: FramePass,
        requested: FramePass,
    },
}

/// 一个运行时实例：对象树、组件、调度器与协程的唯一所有者。
///
/// 每帧的固定顺序为：
/// [`update`](Self::update) → [`update_after_process`](Self::update_after_process) →
/// 外部渲染 → [`end_frame_after_process`](Self::end_frame_after_process)。
///
/// 根对象在创建时生成且永远处于激活状态；未挂到根下的子树（例如构建中的对象）视为未激活。
pub struct World {
    id: WorldId,
    config: WorldConfig,
    pub(crate) objects: SlotMap<ObjectKey, ObjectNode>,
    pub(crate) components: SlotMap<ComponentKey, ComponentSlot>,
    root: ObjectKey,
    pub(crate) scheduler: SceneProcessor,
    pub(crate) coroutines: CoroutineProcessor,
    time: Time,
    pass: Option<FramePass>,
    /// 未经初始化就被丢弃的构建子树根，下一帧开始时销毁。
    abandoned: Rc<RefCell<Vec<Entity>>>,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(mut config: WorldConfig) -> Self {
        if let Err(err) = validate_name(&config.root_name) {
            warn!(target: "canopy-core", error = %err, name = %config.root_name, "invalid root name, falling back to default");
            config.root_name = WorldConfig::default().root_name;
        }

        let mut objects = SlotMap::with_key();
        let mut root_node = ObjectNode::new(config.root_name.clone(), true);
        root_node.active_in_hierarchy = true;
        let root = objects.insert(root_node);

        let id = WorldId::new();
        Self {
            id,
            scheduler: SceneProcessor::new(config.compaction_threshold),
            coroutines: CoroutineProcessor::new(id, config.compaction_threshold),
            config,
            objects,
            components: SlotMap::with_key(),
            root,
            time: Time::default(),
            pass: None,
            abandoned: Rc::default(),
        }
    }

    pub fn id(&self) -> WorldId {
        self.id
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn time(&self) -> &Time {
        &self.time
    }

    pub fn scheduler(&self) -> &SceneProcessor {
        &self.scheduler
    }

    pub fn coroutines(&self) -> &CoroutineProcessor {
        &self.coroutines
    }

    /// 记录本帧时间，应在每帧的其他入口之前调用。
    pub fn begin_frame(&mut self, delta: Duration) {
        self.reclaim_abandoned_builds();
        self.time.delta = delta;
        self.time.elapsed = self.time.elapsed.saturating_add(delta);
        self.time.frame += 1;
    }

    /// 启动/更新调度：先处理启动队列，再按执行顺序调用 `update`。
    ///
    /// 三个阶段入口互斥：在任一阶段执行期间（例如从钩子或协程体内）再次调用任何入口，
    /// 都会返回 [`FrameError::Reentrant`]。
    pub fn update(&mut self) -> anyhow::Result<()> {
        self.run_frame_pass(FramePass::Update, SceneProcessor::run)
    }

    /// 协程常规阶段。
    pub fn update_after_process(&mut self) -> anyhow::Result<()> {
        self.run_frame_pass(FramePass::Coroutines, |world| {
            CoroutineProcessor::run_pass(world, Phase::Regular)
        })
    }

    /// 协程帧末阶段，只推进等待帧末的协程。
    pub fn end_frame_after_process(&mut self) -> anyhow::Result<()> {
        self.run_frame_pass(FramePass::EndOfFrame, |world| {
            CoroutineProcessor::run_pass(world, Phase::EndOfFrame)
        })
    }

    /// 正在执行的帧阶段。
    pub fn running_pass(&self) -> Option<FramePass> {
        self.pass
    }

    fn run_frame_pass(
        &mut self,
        pass: FramePass,
        run: impl FnOnce(&mut World) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        if let Some(running) = self.pass {
            return Err(FrameError::Reentrant {
                running,
                requested: pass,
            }
            .into());
        }
        self.pass = Some(pass);
        let result = run(self);
        self.pass = None;
        result
    }

    /// 构建并初始化 `builder` 描述的子树，挂到 `parent`（默认根对象）下。
    pub fn instantiate(
        &mut self,
        builder: ObjectBuilder,
        parent: Option<Entity>,
    ) -> anyhow::Result<Entity> {
        builder.build(self)?.initialize(self, parent)
    }

    pub fn root(&self) -> Entity {
        self.entity(self.root)
    }

    /// 句柄是否属于本运行时且对象仍存在。
    pub fn contains(&self, entity: Entity) -> bool {
        entity.world_id() == self.id && self.objects.contains_key(entity.key())
    }

    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.node(entity).map(|node| node.name.as_str())
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.node(entity)?.parent.map(|key| self.entity(key))
    }

    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.node(entity)
            .map(|node| node.children.iter().map(|key| self.entity(*key)).collect())
            .unwrap_or_default()
    }

    pub fn is_self_active(&self, entity: Entity) -> bool {
        self.node(entity).is_some_and(|node| node.self_active)
    }

    pub fn is_active_in_hierarchy(&self, entity: Entity) -> bool {
        self.node(entity).is_some_and(|node| node.active_in_hierarchy)
    }

    /// 对象上挂载的组件，按挂载顺序。
    pub fn components(&self, entity: Entity) -> Vec<ComponentId> {
        self.node(entity)
            .map(|node| {
                node.components
                    .iter()
                    .map(|key| ComponentId::new(self.id, *key))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 对象上第一个 `C` 类型组件。
    pub fn get_component<C: Component>(&self, entity: Entity) -> Option<ComponentHandle<C>> {
        self.get_components::<C>(entity).into_iter().next()
    }

    pub fn get_components<C: Component>(&self, entity: Entity) -> Vec<ComponentHandle<C>> {
        let Some(node) = self.node(entity) else {
            return Vec::new();
        };
        node.components
            .iter()
            .filter(|key| {
                self.components
                    .get(**key)
                    .is_some_and(|slot| slot.type_id() == TypeId::of::<C>())
            })
            .map(|key| ComponentHandle::new(ComponentId::new(self.id, *key)))
            .collect()
    }

    /// 读取组件。组件已销毁或正在执行自身钩子时返回 `None`。
    pub fn component<C: Component>(&self, handle: ComponentHandle<C>) -> Option<&C> {
        self.live_slot(handle.id())?.downcast_ref::<C>()
    }

    pub fn component_mut<C: Component>(&mut self, handle: ComponentHandle<C>) -> Option<&mut C> {
        let key = self.component_key(handle.id()).ok()?;
        self.components.get_mut(key)?.downcast_mut::<C>()
    }

    /// 组件所属对象。
    pub fn owner(&self, component: ComponentId) -> Option<Entity> {
        self.live_slot(component).map(|slot| self.entity(slot.object))
    }

    pub fn is_enabled(&self, component: ComponentId) -> Result<bool, ComponentError> {
        self.live_slot(component)
            .map(|slot| slot.state.enabled)
            .ok_or(ComponentError::Destroyed(component))
    }

    /// 组件已送达 `on_enable` 且尚未送达对应的 `on_disable`。
    pub fn is_active_and_enabled(&self, component: ComponentId) -> bool {
        self.live_slot(component).is_some_and(|slot| slot.state.active)
    }

    pub fn is_awakened(&self, component: ComponentId) -> bool {
        self.live_slot(component).is_some_and(|slot| slot.state.awakened)
    }

    pub fn is_started(&self, component: ComponentId) -> bool {
        self.live_slot(component).is_some_and(|slot| slot.state.started)
    }

    pub fn is_destroyed(&self, component: ComponentId) -> bool {
        self.live_slot(component).is_none()
    }

    pub(crate) fn entity(&self, key: ObjectKey) -> Entity {
        Entity::new(self.id, key)
    }

    pub(crate) fn abandoned_builds(&self) -> Rc<RefCell<Vec<Entity>>> {
        Rc::clone(&self.abandoned)
    }

    /// 销毁未初始化即被丢弃、且仍处于游离状态的子树。
    fn reclaim_abandoned_builds(&mut self) {
        let abandoned = std::mem::take(&mut *self.abandoned.borrow_mut());
        for root in abandoned {
            if !self.contains(root) || self.parent(root).is_some() {
                continue;
            }
            debug!(target: "canopy-core", entity = %root, "reclaiming abandoned built object");
            if let Err(err) = self.destroy_object(root) {
                warn!(target: "canopy-core", entity = %root, error = %err, "failed to reclaim abandoned built object");
            }
        }
    }

    pub(crate) fn root_key(&self) -> ObjectKey {
        self.root
    }

    fn node(&self, entity: Entity) -> Option<&ObjectNode> {
        if entity.world_id() != self.id {
            return None;
        }
        self.objects.get(entity.key())
    }

    /// 校验句柄属于本运行时且对象仍存在。
    pub(crate) fn object_key(&self, entity: Entity) -> Result<ObjectKey, HierarchyError> {
        if entity.world_id() != self.id {
            return Err(HierarchyError::ForeignWorld {
                entity,
                world: self.id,
            });
        }
        if !self.objects.contains_key(entity.key()) {
            return Err(HierarchyError::ObjectDestroyed(entity));
        }
        Ok(entity.key())
    }

    /// 校验句柄属于本运行时且组件尚未销毁。
    pub(crate) fn component_key(&self, component: ComponentId) -> Result<ComponentKey, ComponentError> {
        if component.world_id() != self.id {
            return Err(ComponentError::ForeignWorld {
                id: component,
                world: self.id,
            });
        }
        match self.components.get(component.key()) {
            Some(slot) if !slot.state.destroyed => Ok(component.key()),
            _ => Err(ComponentError::Destroyed(component)),
        }
    }

    fn live_slot(&self, component: ComponentId) -> Option<&ComponentSlot> {
        let key = self.component_key(component).ok()?;
        self.components.get(key)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
