//! 测试用的记录组件。

use std::{cell::RefCell, rc::Rc};

use super::{
    World,
    component::{Component, ComponentHandle, component, component_impl},
    context::Context,
};

/// 共享的钩子调用记录。
#[derive(Clone, Default)]
pub(crate) struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// 取出并清空已有记录。
    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// 把每个钩子记录为 `label:hook`。
#[component]
pub(crate) struct Recorder {
    label: &'static str,
    log: Log,
}

impl Recorder {
    pub(crate) fn new(label: &'static str, log: &Log) -> Self {
        Self {
            label,
            log: log.clone(),
        }
    }

    fn record(&self, hook: &str) {
        self.log.push(format!("{}:{}", self.label, hook));
    }
}

#[component_impl]
impl Component for Recorder {
    fn awake(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.record("awake");
        Ok(())
    }

    fn start(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.record("start");
        Ok(())
    }

    fn update(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.record("update");
        Ok(())
    }

    fn on_enable(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.record("on_enable");
        Ok(())
    }

    fn on_disable(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.record("on_disable");
        Ok(())
    }

    fn on_destroy(&mut self, _cx: &mut Context<'_>) -> anyhow::Result<()> {
        self.record("on_destroy");
        Ok(())
    }
}

/// 在根对象下创建一个挂有 [`Recorder`] 的激活对象。
pub(crate) fn recorder_world(
    world: &mut World,
    label: &'static str,
) -> anyhow::Result<(ComponentHandle<Recorder>, Log)> {
    let log = Log::default();
    let object = world.create_object(label, None)?;
    let handle = world
        .add_component(object, Recorder::new(label, &log))?
        .ok_or_else(|| anyhow::anyhow!("recorder should attach"))?;
    Ok((handle, log))
}
