use async_trait::async_trait;

use crate::errors::PipelineError;
use crate::events::EventStream;
use crate::ids::RequestId;
use crate::messages::Message;

/// Input for one run of the execution pipeline.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub request_id: RequestId,
    pub input: String,
    pub history: Vec<Message>,
}

impl ChatRequest {
    pub fn new(request_id: RequestId, input: impl Into<String>) -> Self {
        Self {
            request_id,
            input: input.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// The model execution pipeline as seen by the stream bridge: start a run
/// and hand back its outer event stream.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: ChatRequest) -> Result<EventStream, PipelineError>;
}
