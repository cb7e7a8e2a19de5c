use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, warn};

use tidings_core::engine::{ChatRequest, ExecutionEngine};
use tidings_core::errors::PipelineError;
use tidings_core::events::{ChatEvent, Delta, DeltaStream, EventStream};

use crate::model::ChatModel;
use crate::pipe::{delta_pipe, event_pipe, PipeSender};
use crate::prompt;

/// Message sent on the outer stream when the model invocation panics.
const INTERNAL_ERROR: &str = "internal server error";

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Slots in the outer event pipe.
    pub event_buffer: usize,
    /// Slots between the model and the answer consumer.
    pub delta_buffer: usize,
    pub agent_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer: 10,
            delta_buffer: 32,
            agent_name: "all-round assistant".to_string(),
        }
    }
}

/// Execution engine backed by a single chat model: one run produces one
/// `ModelAnswer` event carrying the model's delta stream.
pub struct ModelEngine<M> {
    model: Arc<M>,
    config: EngineConfig,
}

impl<M: ChatModel + 'static> ModelEngine<M> {
    pub fn new(model: M, config: EngineConfig) -> Self {
        Self {
            model: Arc::new(model),
            config,
        }
    }
}

#[async_trait]
impl<M: ChatModel + 'static> ExecutionEngine for ModelEngine<M> {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn execute(&self, request: ChatRequest) -> Result<EventStream, PipelineError> {
        if request.input.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("input is empty".into()));
        }

        let messages = prompt::assemble(&self.config.agent_name, &request, Utc::now());
        let (tx, events) = event_pipe(self.config.event_buffer);
        let request_id = request.request_id;
        let delta_buffer = self.config.delta_buffer;

        let model = Arc::clone(&self.model);
        let invocation = tokio::spawn(async move { model.stream(&messages).await });

        let _supervisor = tokio::spawn(async move {
            match invocation.await {
                Ok(Ok(deltas)) => {
                    let (dtx, relayed) = delta_pipe(delta_buffer);
                    let _relay = tokio::spawn(relay(deltas, dtx));
                    if !tx.send(ChatEvent::ModelAnswer(relayed)).await {
                        debug!(request_id = %request_id, "event consumer gone before model answer");
                    }
                }
                Ok(Err(e)) => {
                    warn!(request_id = %request_id, error = %e, "model invocation failed");
                    let _ = tx.fail(e).await;
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(request_id = %request_id, "model invocation panicked");
                    let _ = tx.fail(PipelineError::Internal(INTERNAL_ERROR.into())).await;
                }
                Err(_) => {
                    let _ = tx.fail(PipelineError::Cancelled).await;
                }
            }
        });

        Ok(events)
    }
}

/// Copy model deltas into a bounded pipe, stopping at the first error or
/// once the consumer drops the answer.
async fn relay(mut deltas: DeltaStream, tx: PipeSender<Delta>) {
    while let Some(item) = deltas.next().await {
        let delivered = match item {
            Ok(delta) => tx.send(delta).await,
            Err(e) => {
                let _ = tx.fail(e).await;
                return;
            }
        };
        if !delivered {
            return;
        }
    }
}
