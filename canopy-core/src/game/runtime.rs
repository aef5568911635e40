use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::time::interval;
use tracing::{info, warn};

use super::world::World;
use crate::config::GameConfig;


/// 渲染协作者。每帧在两个协程阶段之间按注册顺序调用。
pub trait RenderBackend {
    fn render(&mut self, world: &World) -> anyhow::Result<()>;
}

/// 帧驱动：持有 [`World`] 与渲染协作者，并按固定顺序推进每一帧。
pub struct Game {
    config: GameConfig,
    world: World,
    renderers: Vec<Box<dyn RenderBackend>>,
    stopped: Arc<AtomicBool>,
}

impl Game {
    pub fn new(config: GameConfig) -> Self {
        info!(target: "canopy-core", "Canopy v{}", env!("CARGO_PKG_VERSION"));
        let world = World::with_config(config.world.clone());
        Self {
            config,
            world,
            renderers: Vec::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn add_renderer<R>(&mut self, renderer: R)
    where
        R: RenderBackend + 'static,
    {
        self.renderers.push(Box::new(renderer));
    }

    /// Builder 风格：返回追加了渲染协作者的 `Game`。
    pub fn with_renderer<R>(mut self, renderer: R) -> Self
    where
        R: RenderBackend + 'static,
    {
        self.add_renderer(renderer);
        self
    }

    /// 停止标志。置位后主循环在当前帧结束后退出，可跨线程持有。
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    /// 推进一帧：启动/更新 → 协程常规阶段 → 渲染 → 协程帧末阶段。
    pub fn step(&mut self, delta: Duration) -> anyhow::Result<()> {
        self.world.begin_frame(delta);
        self.world.update()?;
        self.world.update_after_process()?;
        for renderer in &mut self.renderers {
            renderer.render(&self.world)?;
        }
        self.world.end_frame_after_process()
    }

    /// 在当前线程上创建 tokio 运行时并运行主循环，返回实际运行的帧数。
    pub fn run(&mut self) -> anyhow::Result<u64> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.run_async())
    }

    pub async fn run_async(&mut self) -> anyhow::Result<u64> {
        let frame_interval = Duration::from_millis(self.config.frame_interval_ms.max(1));
        let mut itv = interval(frame_interval);
        let mut last_tick = Instant::now();
        let mut frames = 0;

        while !self.stopped.load(Ordering::Acquire) {
            if self
                .config
                .max_frames
                .is_some_and(|max_frames| frames >= max_frames)
            {
                break;
            }
            itv.tick().await;

            let delta = last_tick.elapsed();
            last_tick = Instant::now();

            if let Err(err) = self.step(delta) {
                if self.config.stop_on_error {
                    return Err(err);
                }
                warn!(target: "canopy-core", error = %err, frame = self.world.time().frame, "frame failed");
            }
            frames += 1;
        }
        info!(target: "canopy-core", frames, "game loop stopped");
        Ok(frames)
    }
}
