use std::{cell::Cell, rc::Rc, time::Duration};

use super::*;
use crate::game::{
    builder::{ComponentRef, ObjectBuilder},
    component::{Component, ComponentError, ComponentKind, component, component_impl},
    context::Context,
    entity::NodeNameError,
    system::{
        CoroutineError, YieldInstruction,
        coroutine::{routine, sequence},
    },
    testing::{Log, Recorder, recorder_world},
};

fn frame(world: &mut World) -> anyhow::Result<()> {
    world.begin_frame(Duration::from_millis(16));
    world.update()?;
    world.update_after_process()?;
    world.end_frame_after_process()
}

/// 在 `on_enable` 中销毁自身。
#[component]
struct SelfDestruct {
    log: Log,
}

#[component_impl]
impl Component for SelfDestruct {
    fn on_enable(&mut self, cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.log.push("on_enable");
        cx.destroy()
    }

    fn start(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.log.push("start");
        Ok(())
    }

    fn update(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.log.push("update");
        Ok(())
    }

    fn on_disable(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.log.push("on_disable");
        Ok(())
    }

    fn on_destroy(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.log.push("on_destroy");
        Ok(())
    }
}

/// 在 `start` 中启动协程，用于验证停用时协程被取消。
#[component]
struct Ticker {
    log: Log,
}

#[component_impl]
impl Component for Ticker {
    fn start(&mut self, cx: &mut Context<'_>) -> anyhow::Result<()> {
        let log = self.log.clone();
        let mut ticks = 0;
        cx.start_coroutine(routine(move |_cx| {
            ticks += 1;
            log.push(format!("tick{ticks}"));
            Ok(Some(YieldInstruction::NextFrame))
        }))?;
        Ok(())
    }
}

#[component(Recorder)]
struct NeedsRecorder;

#[component_impl]
impl Component for NeedsRecorder {}

#[component(disallow_multiple)]
struct Single;

#[component_impl]
impl Component for Single {}

#[test]
fn root_is_always_active() {
    let world = World::new();
    let root = world.root();
    assert!(world.is_active_in_hierarchy(root));
    assert_eq!(world.name(root), Some("root"));
    assert_eq!(world.parent(root), None);
}

#[test]
fn repeated_self_active_does_not_refire_hooks() -> anyhow::Result<()> {
    let mut world = World::new();
    let (recorder, log) = recorder_world(&mut world, "a")?;
    let entity = world.owner(recorder.id()).expect("recorder has owner");
    log.take();

    world.set_self_active(entity, false)?;
    assert_eq!(log.take(), vec!["a:on_disable"]);
    world.set_self_active(entity, false)?;
    assert!(log.take().is_empty());

    world.set_self_active(entity, true)?;
    world.set_self_active(entity, true)?;
    assert_eq!(log.take(), vec!["a:on_enable"]);
    Ok(())
}

#[test]
fn lifecycle_order_on_fresh_tree() -> anyhow::Result<()> {
    let mut world = World::new();
    let (_recorder, log) = recorder_world(&mut world, "a")?;

    frame(&mut world)?;
    frame(&mut world)?;
    assert_eq!(
        log.take(),
        vec!["a:awake", "a:on_enable", "a:start", "a:update", "a:update"]
    );
    Ok(())
}

#[test]
fn deactivation_cascades_to_enabled_descendants_only() -> anyhow::Result<()> {
    let mut world = World::new();
    let log = Log::default();
    let parent = world.create_object("parent", None)?;
    let child = world.create_object("child", Some(parent))?;
    let grandchild = world.create_object("grandchild", Some(child))?;

    let p = world
        .add_component(parent, Recorder::new("p", &log))?
        .expect("attach p");
    let c = world
        .add_component(child, Recorder::new("c", &log))?
        .expect("attach c");
    let g = world
        .add_component(grandchild, Recorder::new("g", &log))?
        .expect("attach g");
    frame(&mut world)?;
    log.take();

    world.set_enabled(c.id(), false)?;
    assert_eq!(log.take(), vec!["c:on_disable"]);

    world.set_self_active(parent, false)?;
    assert_eq!(log.take(), vec!["p:on_disable", "g:on_disable"]);
    assert!(!world.is_active_in_hierarchy(grandchild));
    assert!(world.is_self_active(grandchild));
    for handle in [p.id(), c.id(), g.id()] {
        assert!(!world.scheduler().is_scheduled_for_update(handle));
    }

    frame(&mut world)?;
    assert!(log.take().is_empty(), "停用后不再 update");

    world.set_self_active(parent, true)?;
    assert_eq!(log.take(), vec!["p:on_enable", "g:on_enable"]);
    assert!(world.scheduler().is_scheduled_for_update(p));
    assert!(!world.scheduler().is_scheduled_for_update(c));
    assert!(world.scheduler().is_scheduled_for_update(g));

    frame(&mut world)?;
    assert_eq!(log.take(), vec!["p:update", "g:update"], "已 start 的组件不再 start");
    Ok(())
}

#[test]
fn activation_enqueues_update_exactly_once() -> anyhow::Result<()> {
    let mut world = World::new();
    let log = Log::default();
    let a = world.create_object("a", None)?;
    world.set_self_active(a, false)?;
    world.add_component(a, Recorder::new("k", &log))?;
    assert_eq!(log.take(), vec!["k:awake"]);

    world.set_self_active(a, true)?;
    assert_eq!(log.take(), vec!["k:on_enable"]);

    // 同一帧内反复切换不会重复入队。
    world.set_self_active(a, false)?;
    world.set_self_active(a, true)?;
    log.take();

    frame(&mut world)?;
    assert_eq!(log.take(), vec!["k:start", "k:update"]);
    Ok(())
}

#[test]
fn self_destroy_inside_on_enable_skips_start_and_update() -> anyhow::Result<()> {
    let mut world = World::new();
    let log = Log::default();
    let a = world.create_object("a", None)?;
    world.set_self_active(a, false)?;
    let k = world
        .add_component(a, SelfDestruct { log: log.clone() })?
        .expect("attach");

    world.set_self_active(a, true)?;
    assert_eq!(log.take(), vec!["on_enable", "on_disable", "on_destroy"]);
    assert!(world.is_destroyed(k.id()));
    assert!(world.components(a).is_empty());

    frame(&mut world)?;
    frame(&mut world)?;
    assert!(log.take().is_empty());
    assert_eq!(world.scheduler().update_count(), 0);
    assert_eq!(world.scheduler().pending_start_count(), 0);
    Ok(())
}

#[test]
fn destroyed_component_rejects_lifecycle_operations() -> anyhow::Result<()> {
    let mut world = World::new();
    let (recorder, log) = recorder_world(&mut world, "a")?;
    log.take();

    world.destroy_component(recorder.id())?;
    assert_eq!(log.take(), vec!["a:on_disable", "a:on_destroy"]);

    // 幂等
    world.destroy_component(recorder.id())?;
    assert!(log.take().is_empty());

    let err = world
        .set_enabled(recorder.id(), false)
        .expect_err("已销毁组件不能被启用/禁用");
    assert!(matches!(
        err.downcast_ref::<ComponentError>(),
        Some(ComponentError::Destroyed(_))
    ));
    let err = world
        .start_coroutine(recorder.id(), sequence([YieldInstruction::NextFrame]))
        .expect_err("已销毁组件不能启动协程");
    assert!(matches!(
        err.downcast_ref::<ComponentError>(),
        Some(ComponentError::Destroyed(_))
    ));
    assert!(world.component(recorder).is_none());
    Ok(())
}

#[test]
fn disabled_component_is_still_awakened() -> anyhow::Result<()> {
    let mut world = World::new();
    let log = Log::default();
    let recorder = ComponentRef::<Recorder>::new();
    let init_ref = recorder.clone();
    world.instantiate(
        ObjectBuilder::new("a")
            .with_component_ref(Recorder::new("a", &log), &recorder)
            .with_initializer(move |world, _entity| {
                world.set_enabled(init_ref.require()?.id(), false)
            }),
        None,
    )?;

    assert_eq!(log.take(), vec!["a:awake"]);
    let handle = recorder.require()?;
    assert!(world.is_awakened(handle.id()));
    assert!(!world.is_active_and_enabled(handle.id()));

    world.set_enabled(handle.id(), true)?;
    assert_eq!(log.take(), vec!["a:on_enable"]);
    Ok(())
}

#[test]
fn destroying_object_cascades_post_order() -> anyhow::Result<()> {
    let mut world = World::new();
    let log = Log::default();
    let parent = world.create_object("parent", None)?;
    let child = world.create_object("child", Some(parent))?;
    world.add_component(parent, Recorder::new("p", &log))?;
    world.add_component(child, Recorder::new("c", &log))?;
    log.take();

    world.destroy_object(parent)?;
    assert_eq!(
        log.take(),
        vec!["c:on_disable", "c:on_destroy", "p:on_disable", "p:on_destroy"]
    );
    assert!(!world.contains(parent));
    assert!(!world.contains(child));
    assert!(world.children(world.root()).is_empty());

    // 重复销毁是空操作
    world.destroy_object(parent)?;
    Ok(())
}

#[test]
fn deactivation_stops_owned_coroutines() -> anyhow::Result<()> {
    let mut world = World::new();
    let log = Log::default();
    let a = world.create_object("a", None)?;
    world.add_component(a, Ticker { log: log.clone() })?;

    frame(&mut world)?;
    frame(&mut world)?;
    assert_eq!(log.take(), vec!["tick1", "tick2"]);
    assert_eq!(world.coroutines().len(), 1);

    world.set_self_active(a, false)?;
    assert!(world.coroutines().is_empty());
    frame(&mut world)?;
    assert!(log.take().is_empty());
    Ok(())
}

#[test]
fn inactive_owner_cannot_start_coroutine() -> anyhow::Result<()> {
    let mut world = World::new();
    let (recorder, _log) = recorder_world(&mut world, "a")?;
    world.set_enabled(recorder.id(), false)?;

    let err = world
        .start_coroutine(recorder.id(), sequence([YieldInstruction::NextFrame]))
        .expect_err("未激活组件不能启动协程");
    assert!(matches!(
        err.downcast_ref::<CoroutineError>(),
        Some(CoroutineError::InactiveOwner(_))
    ));
    Ok(())
}

#[test]
fn add_component_policy_violations_are_skipped() -> anyhow::Result<()> {
    let mut world = World::new();
    let a = world.create_object("a", None)?;

    assert!(world.add_component(a, NeedsRecorder)?.is_none());
    assert!(world.add_component(a, Single)?.is_some());
    assert!(world.add_component(a, Single)?.is_none());
    assert_eq!(world.components(a).len(), 1);
    assert!(Single::DISALLOW_MULTIPLE);

    let log = Log::default();
    world.add_component(a, Recorder::new("r", &log))?;
    assert!(world.add_component(a, NeedsRecorder)?.is_some());
    Ok(())
}

#[test]
fn reparenting_rejects_cycles_self_and_foreign_worlds() -> anyhow::Result<()> {
    let mut world = World::new();
    let mut other = World::new();
    let a = world.create_object("a", None)?;
    let b = world.create_object("b", Some(a))?;
    let foreign = other.create_object("x", None)?;

    let err = world.change_parent(a, Some(b)).expect_err("环");
    assert!(matches!(
        err.downcast_ref::<HierarchyError>(),
        Some(HierarchyError::HierarchyCycle { .. })
    ));

    let err = world.add_child(a, a).expect_err("自我挂载");
    assert!(matches!(
        err.downcast_ref::<HierarchyError>(),
        Some(HierarchyError::SelfAttachment(_))
    ));

    let err = world.add_child(a, foreign).expect_err("跨实例");
    assert!(matches!(
        err.downcast_ref::<HierarchyError>(),
        Some(HierarchyError::ForeignWorld { .. })
    ));

    let err = world.destroy_object(world.root()).expect_err("根对象");
    assert!(matches!(
        err.downcast_ref::<HierarchyError>(),
        Some(HierarchyError::RootImmutable)
    ));

    assert_eq!(world.parent(b), Some(a));
    Ok(())
}

#[test]
fn reparenting_under_inactive_parent_deactivates_subtree() -> anyhow::Result<()> {
    let mut world = World::new();
    let log = Log::default();
    let hidden = world.create_object("hidden", None)?;
    world.set_self_active(hidden, false)?;
    let mover = world.create_object("mover", None)?;
    world.add_component(mover, Recorder::new("m", &log))?;
    log.take();

    world.add_child(hidden, mover)?;
    assert_eq!(log.take(), vec!["m:on_disable"]);
    assert_eq!(world.path(mover)?, "root/hidden/mover");

    world.change_parent(mover, None)?;
    assert_eq!(log.take(), vec!["m:on_enable"]);
    assert_eq!(world.find_child(world.root(), "mover"), Some(mover));
    Ok(())
}

#[test]
fn invalid_names_are_rejected() {
    let mut world = World::new();
    let err = world.create_object("has space", None).expect_err("名称无效");
    assert_eq!(
        err.downcast_ref::<NodeNameError>(),
        Some(&NodeNameError::ContainsWhitespace)
    );
}

#[test]
fn hook_error_aborts_pass_and_propagates() -> anyhow::Result<()> {
    #[component]
    struct Failing;

    #[component_impl]
    impl Component for Failing {
        fn update(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
            anyhow::bail!("update failed")
        }
    }

    let mut world = World::new();
    let a = world.create_object("a", None)?;
    world.add_component(a, Failing)?;
    let err = frame(&mut world).expect_err("钩子错误应向上传播");
    assert_eq!(err.to_string(), "update failed");
    Ok(())
}

/// 在 `update` 中尝试运行协程常规阶段，记录协程步数是否变化以及调用是否被拒绝。
#[component]
struct CoroutinePassFromUpdate {
    steps: Rc<Cell<u32>>,
    attempts: Log,
}

#[component_impl]
impl Component for CoroutinePassFromUpdate {
    fn start(&mut self, cx: &mut Context<'_>) -> anyhow::Result<()> {
        let steps = Rc::clone(&self.steps);
        cx.start_coroutine(routine(move |_cx| {
            steps.set(steps.get() + 1);
            Ok(Some(YieldInstruction::NextFrame))
        }))?;
        Ok(())
    }

    fn update(&mut self, cx: &mut Context<'_>) -> anyhow::Result<()> {
        let before = self.steps.get();
        let rejected = cx.update_after_process().is_err_and(|err| {
            err.downcast_ref::<FrameError>()
                == Some(&FrameError::Reentrant {
                    running: FramePass::Update,
                    requested: FramePass::Coroutines,
                })
        });
        let resumed = self.steps.get() != before;
        self.attempts
            .push(format!("rejected={rejected} resumed={resumed}"));
        Ok(())
    }
}

#[test]
fn update_hook_cannot_run_coroutine_pass() -> anyhow::Result<()> {
    let mut world = World::new();
    let steps = Rc::new(Cell::new(0));
    let attempts = Log::default();
    let a = world.create_object("a", None)?;
    world.add_component(
        a,
        CoroutinePassFromUpdate {
            steps: Rc::clone(&steps),
            attempts: attempts.clone(),
        },
    )?;

    frame(&mut world)?;
    frame(&mut world)?;

    assert_eq!(
        attempts.take(),
        vec!["rejected=true resumed=false", "rejected=true resumed=false"]
    );
    assert_eq!(steps.get(), 2, "协程每帧只在常规阶段推进一次");
    assert_eq!(world.running_pass(), None);
    Ok(())
}

#[component]
struct UpdateCounter {
    calls: Rc<Cell<u32>>,
}

#[component_impl]
impl Component for UpdateCounter {
    fn update(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.calls.set(self.calls.get() + 1);
        Ok(())
    }
}

/// 先于 `UpdateCounter` 更新，并在更新中再次调用 `World::update`。
#[component(order = -1)]
struct NestedUpdate {
    errors: Log,
}

#[component_impl]
impl Component for NestedUpdate {
    fn update(&mut self, cx: &mut Context<'_>) -> anyhow::Result<()> {
        if let Err(err) = cx.update() {
            self.errors.push(err.to_string());
        }
        Ok(())
    }
}

#[test]
fn nested_update_is_rejected_and_updates_run_once_per_frame() -> anyhow::Result<()> {
    let mut world = World::new();
    let calls = Rc::new(Cell::new(0));
    let errors = Log::default();
    let a = world.create_object("a", None)?;
    world.add_component(
        a,
        UpdateCounter {
            calls: Rc::clone(&calls),
        },
    )?;
    world.add_component(
        a,
        NestedUpdate {
            errors: errors.clone(),
        },
    )?;

    frame(&mut world)?;
    assert_eq!(calls.get(), 1);
    assert_eq!(errors.take().len(), 1);

    frame(&mut world)?;
    assert_eq!(calls.get(), 2);
    Ok(())
}

#[test]
fn frame_passes_reject_calls_from_coroutines() -> anyhow::Result<()> {
    let mut world = World::new();
    let (owner, _log) = recorder_world(&mut world, "owner")?;
    let outcomes = Log::default();
    let seen = outcomes.clone();
    world.start_coroutine(
        owner.id(),
        routine(move |cx| {
            let running = cx.running_pass();
            let update = cx.update().is_err();
            let end_of_frame = cx.end_frame_after_process().is_err();
            seen.push(format!("{running:?} {update} {end_of_frame}"));
            Ok(None)
        }),
    )?;

    frame(&mut world)?;
    assert_eq!(outcomes.take(), vec!["Some(Coroutines) true true"]);
    Ok(())
}

#[component]
struct FailsOnDisable;

#[component_impl]
impl Component for FailsOnDisable {
    fn on_disable(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        anyhow::bail!("on_disable failed")
    }
}

#[test]
fn with_component_returns_deferred_hook_error() -> anyhow::Result<()> {
    let mut world = World::new();
    let a = world.create_object("a", None)?;
    let handle = world
        .add_component(a, FailsOnDisable)?
        .expect("组件应挂载成功");

    let outcome = world
        .with_component(handle, |_component, world| {
            world.set_enabled(handle.id(), false)
        })
        .expect("组件存活且未被取出");
    let err = outcome.expect_err("补发的 on_disable 错误应返回给调用方");
    assert_eq!(err.to_string(), "on_disable failed");
    assert_eq!(world.is_enabled(handle.id()), Ok(false));
    assert!(!world.is_active_and_enabled(handle.id()));
    Ok(())
}

#[test]
fn deep_hierarchy_cascades_and_tears_down_without_recursion() -> anyhow::Result<()> {
    const DEPTH: usize = 50_000;

    let mut world = World::new();
    let log = Log::default();
    let top = world.create_object("top", None)?;
    let mut tip = top;
    for _ in 0..DEPTH {
        tip = world.create_object("link", Some(tip))?;
    }
    world.add_component(tip, Recorder::new("tip", &log))?;
    log.take();

    world.set_self_active(top, false)?;
    assert!(!world.is_active_in_hierarchy(tip));
    assert_eq!(log.take(), vec!["tip:on_disable"]);

    world.set_self_active(top, true)?;
    assert!(world.is_active_in_hierarchy(tip));
    assert_eq!(log.take(), vec!["tip:on_enable"]);

    world.destroy_object(top)?;
    assert!(!world.contains(tip));
    assert_eq!(log.take(), vec!["tip:on_disable", "tip:on_destroy"]);
    assert_eq!(world.objects.len(), 1);
    Ok(())
}
