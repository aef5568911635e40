use super::registry::CompactingRegistry;
use crate::game::{
    component::{ComponentId, ComponentKey, Hook},
    world::World,
};

/// 启动队列与更新队列的所有者。
///
/// 每帧 [`World::update`] 按固定顺序执行：刷新启动缓冲 → 逐个调用 `start` →
/// 刷新更新缓冲 → 按执行顺序调用 `update`。钩子在遍历期间加入的组件进入缓冲区，
/// 下一次刷新后才可见。
pub struct SceneProcessor {
    pending_start: CompactingRegistry<ComponentKey>,
    updates: CompactingRegistry<ComponentKey, i32>,
}

impl SceneProcessor {
    pub(crate) fn new(compaction_threshold: usize) -> Self {
        Self {
            pending_start: CompactingRegistry::new(compaction_threshold),
            updates: CompactingRegistry::new(compaction_threshold),
        }
    }

    /// 等待 `start` 的组件数量（含缓冲区）。
    pub fn pending_start_count(&self) -> usize {
        self.pending_start.len()
    }

    /// 更新队列中的组件数量（含缓冲区）。
    pub fn update_count(&self) -> usize {
        self.updates.len()
    }

    pub fn is_scheduled_for_update(&self, component: impl Into<ComponentId>) -> bool {
        self.updates.contains(component.into().key())
    }

    pub(crate) fn enqueue_start(&mut self, key: ComponentKey) {
        self.pending_start.insert(key, ());
    }

    pub(crate) fn dequeue_start(&mut self, key: ComponentKey) {
        self.pending_start.remove(key);
    }

    pub(crate) fn enqueue_update(&mut self, key: ComponentKey, order: i32) {
        self.updates.insert(key, order);
    }

    pub(crate) fn dequeue_update(&mut self, key: ComponentKey) {
        self.updates.remove(key);
    }

    pub(crate) fn run(world: &mut World) -> anyhow::Result<()> {
        world.scheduler.pending_start.flush();
        world.scheduler.pending_start.begin_pass();
        let started = Self::start_pass(world);
        world.scheduler.pending_start.end_pass();
        started?;

        world.scheduler.updates.flush();
        world.scheduler.updates.begin_pass();
        let updated = Self::update_pass(world);
        world.scheduler.updates.end_pass();
        updated
    }

    fn start_pass(world: &mut World) -> anyhow::Result<()> {
        let slots = world.scheduler.pending_start.slot_count();
        for slot in 0..slots {
            let Some(key) = world.scheduler.pending_start.key_at(slot) else {
                continue;
            };
            world.scheduler.pending_start.remove(key);
            world.try_call_start(key)?;
        }
        Ok(())
    }

    fn update_pass(world: &mut World) -> anyhow::Result<()> {
        let slots = world.scheduler.updates.slot_count();
        for slot in 0..slots {
            let Some(key) = world.scheduler.updates.key_at(slot) else {
                continue;
            };
            let Some(component) = world.components.get(key) else {
                continue;
            };
            let state = component.state;
            if state.destroyed || !state.active || !state.started {
                continue;
            }
            world.invoke(key, Hook::Update)?;
        }
        Ok(())
    }
}
