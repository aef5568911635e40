use anyhow::Context as _;
use tracing::info;

use canopy_core::{
    Game, World,
    config::GameConfig,
    game::{
        RenderBackend,
        component::{Component, component, component_impl},
        context::Context,
        system::YieldInstruction,
        system::coroutine::routine,
    },
    logger, scene,
};

/// 每帧按角速度累加旋转角。
#[component(order = -10)]
struct Spinner {
    degrees_per_second: f32,
    angle: f32,
}

#[component_impl]
impl Component for Spinner {
    fn update(&mut self, cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.angle = (self.angle + self.degrees_per_second * cx.delta_time().as_secs_f32()) % 360.0;
        Ok(())
    }
}

/// 周期性地开关同一对象上的 `Spinner`。
#[component(Spinner, disallow_multiple)]
struct Blinker {
    period: f32,
}

#[component_impl]
impl Component for Blinker {
    fn start(&mut self, cx: &mut Context<'_>) -> anyhow::Result<()> {
        let period = self.period;
        let spinner = cx.sibling::<Spinner>().context("Blinker 需要同对象上的 Spinner")?;
        let mut waiting = false;
        cx.start_coroutine(routine(move |cx: &mut Context<'_>| {
            if waiting {
                let entity = cx.entity();
                let world: &mut World = cx;
                let enabled = world.is_enabled(spinner.into())?;
                world.set_enabled(spinner.into(), !enabled)?;
                info!(target: "canopy-tpl", entity = %entity, spinning = !enabled, "blink");
                waiting = false;
                return Ok(Some(YieldInstruction::WaitForEndOfFrame));
            }
            waiting = true;
            Ok(Some(YieldInstruction::wait_for_seconds(period)))
        }))?;
        Ok(())
    }
}

/// 以日志形式“渲染”每个旋转体的状态。
#[derive(Default)]
struct LogRenderer {
    frames: u64,
}

impl RenderBackend for LogRenderer {
    fn render(&mut self, world: &World) -> anyhow::Result<()> {
        self.frames += 1;
        if self.frames % 30 != 0 {
            return Ok(());
        }
        let mut pending = vec![world.root()];
        while let Some(entity) = pending.pop() {
            for handle in world.get_components::<Spinner>(entity) {
                if let Some(spinner) = world.component(handle) {
                    info!(
                        target: "canopy-tpl",
                        frame = world.time().frame,
                        path = %world.path(entity)?,
                        angle = spinner.angle,
                        "spinner"
                    );
                }
            }
            pending.extend(world.children(entity));
        }
        Ok(())
    }
}

fn build_demo_scene(world: &mut World) -> anyhow::Result<()> {
    let bindings = scene! {
        node "demo" {
            node "wheel" as wheel {
                + Spinner { degrees_per_second: 90.0, angle: 0.0 };
                + Blinker { period: 0.5 };
            }
            node "gear" as gear {
                + Spinner { degrees_per_second: -45.0, angle: 0.0 } => |spinner, world| {
                    spinner.angle = if world.contains(wheel) { 180.0 } else { 0.0 };
                    Ok(())
                };
            }
        }
    }(world, None)?;

    info!(
        target: "canopy-tpl",
        wheel = %world.path(bindings.wheel)?,
        gear = %world.path(bindings.gear)?,
        "demo scene ready"
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    logger::init()?;

    let config = GameConfig {
        max_frames: Some(120),
        ..GameConfig::default()
    };
    let mut game = Game::new(config).with_renderer(LogRenderer::default());
    build_demo_scene(game.world_mut()).context("构建示例场景失败")?;

    let frames = game.run()?;
    info!(target: "canopy-tpl", frames, "demo finished");
    Ok(())
}
