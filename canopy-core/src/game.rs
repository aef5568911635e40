pub mod builder;
pub mod component;
pub mod context;
pub mod entity;
pub mod runtime;
pub mod system;
pub mod world;

#[cfg(test)]
pub(crate) mod testing;

pub use runtime::{Game, RenderBackend};
pub use world::{FrameError, FramePass, Time, World};
