use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use tidings_core::errors::PipelineError;
use tidings_core::events::{Delta, DeltaStream};
use tidings_core::messages::Message;

use crate::model::ChatModel;

/// Chat model that streams a fixed reply, for local runs and tests.
#[derive(Clone, Debug)]
pub struct MockChatModel {
    chunks: Vec<String>,
    chunk_delay: Duration,
    fail_after: Option<usize>,
}

impl Default for MockChatModel {
    fn default() -> Self {
        Self::new(["the weather is", " good"])
    }
}

impl MockChatModel {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            chunk_delay: Duration::ZERO,
            fail_after: None,
        }
    }

    /// Sleep this long before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Interrupt the stream after `n` chunks.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, _messages: &[Message]) -> Result<DeltaStream, PipelineError> {
        let mut items: Vec<Result<Delta, PipelineError>> = self
            .chunks
            .iter()
            .take(self.fail_after.unwrap_or(usize::MAX))
            .map(|c| Ok(Delta::new(c.clone())))
            .collect();
        if self.fail_after.is_some() {
            items.push(Err(PipelineError::StreamInterrupted("mock model interrupted".into())));
        }

        let delay = self.chunk_delay;
        let deltas = stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(deltas))
    }
}
