use std::time::Duration;

use slotmap::{SlotMap, new_key_type};
use thiserror::Error;
use tracing::trace;

use super::{registry::CompactingRegistry, yield_instruction::YieldInstruction};
use crate::game::{
    component::{ComponentId, ComponentKey},
    context::Context,
    entity::{Entity, WorldId},
    world::World,
};

new_key_type! {
    /// 协程在协程处理器中的键。
    pub struct CoroutineKey;
}

/// 可恢复的执行体。
///
/// 每次被协程处理器恢复时执行到下一个挂起点，返回新的挂起条件；
/// 返回 `Ok(None)` 表示执行完毕，返回错误会结束该协程并把错误沿当前阶段向上传播。
pub trait Routine {
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Option<YieldInstruction>>;
}

/// 由闭包实现的执行体，闭包自行维护步骤状态。
pub struct FnRoutine<F>(F);

impl<F> Routine for FnRoutine<F>
where
    F: FnMut(&mut Context<'_>) -> anyhow::Result<Option<YieldInstruction>>,
{
    fn resume(&mut self, cx: &mut Context<'_>) -> anyhow::Result<Option<YieldInstruction>> {
        (self.0)(cx)
    }
}

/// 用闭包构造执行体。
pub fn routine<F>(body: F) -> FnRoutine<F>
where
    F: FnMut(&mut Context<'_>) -> anyhow::Result<Option<YieldInstruction>>,
{
    FnRoutine(body)
}

/// 依次产出给定挂起条件、不含额外逻辑的执行体。
pub struct Sequence<I>(I);

impl<I> Routine for Sequence<I>
where
    I: Iterator<Item = YieldInstruction>,
{
    fn resume(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<Option<YieldInstruction>> {
        Ok(self.0.next())
    }
}

pub fn sequence<I>(instructions: I) -> Sequence<I::IntoIter>
where
    I: IntoIterator<Item = YieldInstruction>,
{
    Sequence(instructions.into_iter())
}

/// 协程句柄，记录签发它的运行时与所属组件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineHandle {
    world: WorldId,
    key: CoroutineKey,
    owner: ComponentKey,
}

impl CoroutineHandle {
    pub(crate) fn new(world: WorldId, key: CoroutineKey, owner: ComponentKey) -> Self {
        Self { world, key, owner }
    }

    /// 启动该协程的组件。
    pub fn owner(&self) -> ComponentId {
        ComponentId::new(self.world, self.owner)
    }

    pub(crate) fn world_id(&self) -> WorldId {
        self.world
    }

    pub(crate) fn key(&self) -> CoroutineKey {
        self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoroutineError {
    #[error("组件 {caller} 不能停止由组件 {owner} 启动的协程")]
    NotOwner { owner: ComponentId, caller: ComponentId },
    #[error("组件 {0} 未处于激活状态，不能启动协程")]
    InactiveOwner(ComponentId),
}

pub(crate) struct Coroutine {
    pub(crate) owner: ComponentKey,
    /// 恢复执行期间被取出。
    routine: Option<Box<dyn Routine>>,
    current: Option<YieldInstruction>,
    waited: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Regular,
    EndOfFrame,
}

/// 所有存活协程的所有者，负责每帧两个阶段的推进。
pub struct CoroutineProcessor {
    world: WorldId,
    coroutines: SlotMap<CoroutineKey, Coroutine>,
    live: CompactingRegistry<CoroutineKey>,
}

impl CoroutineProcessor {
    pub(crate) fn new(world: WorldId, compaction_threshold: usize) -> Self {
        Self {
            world,
            coroutines: SlotMap::with_key(),
            live: CompactingRegistry::new(compaction_threshold),
        }
    }

    /// 存活协程数量（含本阶段新启动、尚未可见的协程）。
    pub fn len(&self) -> usize {
        self.coroutines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coroutines.is_empty()
    }

    /// 句柄由本运行时签发且协程尚未结束。
    pub fn is_running(&self, handle: CoroutineHandle) -> bool {
        handle.world_id() == self.world && self.coroutines.contains_key(handle.key())
    }

    pub(crate) fn spawn(&mut self, owner: ComponentKey, routine: Box<dyn Routine>) -> CoroutineKey {
        let key = self.coroutines.insert(Coroutine {
            owner,
            routine: Some(routine),
            current: None,
            waited: Duration::ZERO,
        });
        self.live.insert(key, ());
        key
    }

    /// 立即移除协程；正在恢复中的执行体会在返回后被丢弃。
    pub(crate) fn remove(&mut self, key: CoroutineKey) -> Option<ComponentKey> {
        self.live.remove(key);
        self.coroutines.remove(key).map(|coroutine| coroutine.owner)
    }

    pub(crate) fn run_pass(world: &mut World, phase: Phase) -> anyhow::Result<()> {
        world.coroutines.live.flush();
        world.coroutines.live.begin_pass();
        let result = Self::visit_all(world, phase);
        world.coroutines.live.end_pass();
        result
    }

    fn visit_all(world: &mut World, phase: Phase) -> anyhow::Result<()> {
        let slots = world.coroutines.live.slot_count();
        for slot in 0..slots {
            if let Some(key) = world.coroutines.live.key_at(slot) {
                Self::visit(world, key, phase)?;
            }
        }
        Ok(())
    }

    fn visit(world: &mut World, key: CoroutineKey, phase: Phase) -> anyhow::Result<()> {
        let delta = world.time().delta;
        let Some(coroutine) = world.coroutines.coroutines.get_mut(key) else {
            return Ok(());
        };
        if coroutine.routine.is_none() {
            return Ok(());
        }
        let current = coroutine.current.take();
        let mut waited = coroutine.waited;

        let ready = match (phase, &current) {
            (Phase::Regular, None) => true,
            (Phase::EndOfFrame, None) => false,
            (Phase::EndOfFrame, Some(instruction)) => instruction.is_end_of_frame(),
            (Phase::Regular, Some(YieldInstruction::NextFrame)) => true,
            (Phase::Regular, Some(YieldInstruction::WaitForSeconds(duration))) => {
                waited = waited.saturating_add(delta);
                waited >= *duration
            }
            (Phase::Regular, Some(YieldInstruction::WaitUntil(predicate))) => predicate(world),
            (Phase::Regular, Some(YieldInstruction::WaitWhile(predicate))) => !predicate(world),
            (Phase::Regular, Some(YieldInstruction::WaitForEndOfFrame)) => false,
        };

        if !ready {
            if let Some(coroutine) = world.coroutines.coroutines.get_mut(key) {
                coroutine.current = current;
                coroutine.waited = waited;
            }
            return Ok(());
        }
        Self::advance(world, key)
    }

    fn advance(world: &mut World, key: CoroutineKey) -> anyhow::Result<()> {
        let Some(coroutine) = world.coroutines.coroutines.get_mut(key) else {
            return Ok(());
        };
        let owner = coroutine.owner;
        let Some(mut routine) = coroutine.routine.take() else {
            return Ok(());
        };
        let Some(object) = world.components.get(owner).map(|slot| slot.object) else {
            world.finish_coroutine(key);
            return Ok(());
        };

        let this = ComponentId::new(world.id(), owner);
        let entity = Entity::new(world.id(), object);
        let resumed = {
            let mut cx = Context::new(world, this, entity);
            routine.resume(&mut cx)
        };

        match resumed {
            Ok(Some(instruction)) => {
                if let Some(coroutine) = world.coroutines.coroutines.get_mut(key) {
                    trace!(target: "canopy-core", component = %this, ?instruction, "coroutine suspended");
                    coroutine.routine = Some(routine);
                    coroutine.current = Some(instruction);
                    coroutine.waited = Duration::ZERO;
                }
                Ok(())
            }
            Ok(None) => {
                trace!(target: "canopy-core", component = %this, "coroutine finished");
                world.finish_coroutine(key);
                Ok(())
            }
            Err(err) => {
                world.finish_coroutine(key);
                Err(err)
            }
        }
    }
}
