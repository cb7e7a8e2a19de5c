use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use tidings_core::errors::PipelineError;
use tidings_core::events::{ChatEvent, Delta, DeltaStream, EventStream};

/// Producer half of a bounded pipe. Dropping every sender ends the stream
/// cleanly; [`PipeSender::fail`] ends it with an error item.
pub struct PipeSender<T> {
    tx: mpsc::Sender<Result<T, PipelineError>>,
}

impl<T> Clone for PipeSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> PipeSender<T> {
    /// Waits for a free slot. Returns `false` once the consumer is gone.
    pub async fn send(&self, item: T) -> bool {
        self.tx.send(Ok(item)).await.is_ok()
    }

    pub async fn fail(&self, error: PipelineError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }
}

fn pipe<T: Send + 'static>(
    capacity: usize,
) -> (PipeSender<T>, ReceiverStream<Result<T, PipelineError>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeSender { tx }, ReceiverStream::new(rx))
}

/// Bounded outer event pipe.
pub fn event_pipe(capacity: usize) -> (PipeSender<ChatEvent>, EventStream) {
    let (tx, rx) = pipe(capacity);
    (tx, Box::pin(rx))
}

/// Bounded delta pipe for one model answer.
pub fn delta_pipe(capacity: usize) -> (PipeSender<Delta>, DeltaStream) {
    let (tx, rx) = pipe(capacity);
    (tx, Box::pin(rx))
}
