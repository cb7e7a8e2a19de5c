use std::collections::VecDeque;
use std::fmt;
use std::sync::Weak;

use tokio::sync::mpsc;
use tracing::trace;

use tidings_core::ids::{MessageId, Topic};
use tidings_core::wire::WireMessage;

use crate::server::Inner;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Handle to one subscription. Yields the replayed tail first, then live
/// messages. Dropping it unsubscribes.
pub struct Subscriber {
    id: SubscriberId,
    topics: Vec<Topic>,
    replay: VecDeque<WireMessage>,
    live: mpsc::Receiver<WireMessage>,
    last_id: Option<MessageId>,
    server: Weak<Inner>,
}

impl Subscriber {
    pub(crate) fn new(
        id: SubscriberId,
        topics: Vec<Topic>,
        replay: Vec<WireMessage>,
        live: mpsc::Receiver<WireMessage>,
        server: Weak<Inner>,
    ) -> Self {
        Self {
            id,
            topics,
            replay: replay.into(),
            live,
            last_id: None,
            server,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Replayed messages not yet taken.
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Next message, or `None` once the server has dropped this subscription
    /// (shutdown, eviction for backpressure, or explicit unsubscribe).
    pub async fn recv(&mut self) -> Option<WireMessage> {
        let message = match self.replay.pop_front() {
            Some(replayed) => replayed,
            None => self.live.recv().await?,
        };
        if let Some(id) = message.id {
            debug_assert!(self.last_id.map_or(true, |last| last < id));
            self.last_id = Some(id);
        }
        Some(message)
    }

    /// Id of the last numbered message handed out.
    pub fn last_id(&self) -> Option<MessageId> {
        self.last_id
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("pending_replay", &self.replay.len())
            .finish()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        trace!(subscriber = %self.id, "subscriber dropped");
        if let Some(server) = self.server.upgrade() {
            server.release(self.id);
        }
    }
}
