//! Topic-scoped publish/subscribe with a time-boxed replay buffer.
//!
//! [`BroadcastServer`] fans each published [`WireMessage`] out to every
//! subscriber of its topics and records it in the [`ReplayBuffer`], so a
//! client that reconnects with the id of the last message it saw receives
//! the missed tail before live traffic.

pub mod error;
pub mod replay;
pub mod server;
pub mod subscriber;

pub use error::BroadcastError;
pub use replay::{ReplayBuffer, ReplayConfig, ReplayEntry};
pub use server::{BroadcastConfig, BroadcastServer};
pub use subscriber::{Subscriber, SubscriberId};

use tidings_core::ids::{MessageId, Topic};
use tidings_core::wire::WireMessage;

/// Sink for wire messages. Publishing never waits on subscribers.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: WireMessage, topics: &[Topic]) -> Result<MessageId, BroadcastError>;
}

impl<P: Publisher + ?Sized> Publisher for std::sync::Arc<P> {
    fn publish(&self, message: WireMessage, topics: &[Topic]) -> Result<MessageId, BroadcastError> {
        (**self).publish(message, topics)
    }
}
