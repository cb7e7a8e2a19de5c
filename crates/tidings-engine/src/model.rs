use async_trait::async_trait;

use tidings_core::errors::PipelineError;
use tidings_core::events::DeltaStream;
use tidings_core::messages::Message;

/// A streaming chat model. Implementations own the transport to the model
/// backend; callers only see the delta stream.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(&self, messages: &[Message]) -> Result<DeltaStream, PipelineError>;
}
