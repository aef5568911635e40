pub mod coroutine;
pub(crate) mod registry;
pub mod scheduler;
pub mod yield_instruction;

pub use coroutine::{CoroutineError, CoroutineHandle, CoroutineProcessor, Routine};
pub use scheduler::SceneProcessor;
pub use yield_instruction::YieldInstruction;
