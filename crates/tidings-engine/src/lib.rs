pub mod mock;
pub mod model;
pub mod pipe;
pub mod prompt;
pub mod runner;
pub mod scripted;

pub use mock::MockChatModel;
pub use model::ChatModel;
pub use pipe::{delta_pipe, event_pipe, PipeSender};
pub use runner::{EngineConfig, ModelEngine};
pub use scripted::{ScriptedEngine, ScriptedRun, Step};
