pub mod engine;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod wire;

pub use engine::{ChatRequest, ExecutionEngine};
pub use errors::PipelineError;
pub use events::{ChatEvent, Delta, DeltaStream, EventKind, EventStream};
pub use ids::{MessageId, RequestId, Topic};
pub use wire::{WireMessage, WireType};
