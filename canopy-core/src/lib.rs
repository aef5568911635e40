//! Canopy 的核心库（`canopy-core`）。
//!
//! 该 crate 提供场景树对象与组件的生命周期运行时：
//! - [`game::World`]：对象树、组件、调度器与协程的唯一所有者
//! - [`game::builder`]：两阶段（build / initialize）构建对象子树
//! - [`game::system`]：启动/更新调度器与协程处理器
//! - [`Game`]：按固定顺序驱动每一帧的主循环
//!
//! 大多数项目只需要：
//! - 用 `#[component]` + `#[component_impl]` 编写组件
//! - 用 [`scene!`] 或 [`game::builder::ObjectBuilder`] 构建场景
//! - 通过 [`Game`] 运行主循环

extern crate self as canopy_core;

pub mod config;
pub mod game;
pub mod logger;

pub use canopy_macros::scene;
pub use game::{Game, World};
