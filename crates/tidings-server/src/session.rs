//! One client's live view of a topic, rendered as an SSE event stream.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::Stream;
use tracing::{debug, trace};

use tidings_broadcast::{BroadcastError, BroadcastServer, Subscriber};
use tidings_core::ids::{MessageId, Topic};
use tidings_core::wire::WireMessage;
use tidings_telemetry::metric_names as m;

use crate::runs::RunRegistry;

/// Subscription owned by one HTTP connection. Ends after a `finish`, `error`
/// or `close` message, or when the broadcast server drops the subscriber.
/// Dropping the channel unsubscribes; if it was the topic's last subscriber,
/// the topic's in-flight run is cancelled.
pub struct SessionChannel {
    topic: Topic,
    subscriber: Option<Subscriber>,
    broadcast: BroadcastServer,
    runs: RunRegistry,
    ended: bool,
}

impl SessionChannel {
    pub fn open(
        broadcast: &BroadcastServer,
        runs: &RunRegistry,
        topic: Topic,
        last_message_id: Option<MessageId>,
    ) -> Result<Self, BroadcastError> {
        let subscriber = broadcast.subscribe(vec![topic.clone()], last_message_id)?;
        metrics::counter!(m::SSE_CONNECTIONS_TOTAL).increment(1);
        debug!(topic = %topic, subscriber = %subscriber.id(), ?last_message_id, "session channel opened");
        Ok(Self {
            topic,
            subscriber: Some(subscriber),
            broadcast: broadcast.clone(),
            runs: runs.clone(),
            ended: false,
        })
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Replayed messages waiting to be delivered.
    pub fn pending_replay(&self) -> usize {
        self.subscriber.as_ref().map_or(0, Subscriber::pending_replay)
    }

    /// Next message for the client, or `None` once the channel has ended.
    pub async fn next_message(&mut self) -> Option<WireMessage> {
        if self.ended {
            return None;
        }
        let subscriber = self.subscriber.as_mut()?;
        match subscriber.recv().await {
            Some(message) => {
                if message.kind.ends_stream() {
                    self.ended = true;
                }
                Some(message)
            }
            None => {
                debug!(topic = %self.topic, "subscription dropped by server");
                self.ended = true;
                None
            }
        }
    }

    /// SSE events for this channel. The channel lives inside the stream, so
    /// dropping the response body closes it.
    pub fn into_sse_stream(mut self) -> impl Stream<Item = Result<Event, Infallible>> + Send {
        async_stream::stream! {
            while let Some(message) = self.next_message().await {
                trace!(topic = %self.topic, kind = message.kind.as_str(), "sse frame");
                yield Ok(to_sse_event(&message));
            }
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        let Some(subscriber) = self.subscriber.take() else {
            return;
        };
        let runs = &self.runs;
        self.broadcast.leave(subscriber, |topic| {
            if runs.cancel(topic) {
                debug!(topic = %topic, "last subscriber left, cancelling run");
            }
        });
    }
}

/// Render a wire message as one SSE frame: `event`, `data`, optional `id`.
pub fn to_sse_event(message: &WireMessage) -> Event {
    let event = Event::default()
        .event(message.kind.as_str())
        .data(normalize_newlines(&message.data));
    match message.id {
        Some(id) => event.id(id.to_string()),
        None => event,
    }
}

/// SSE splits `data` on line feeds only; a bare carriage return would end
/// the field early on the client.
fn normalize_newlines(data: &str) -> String {
    data.replace("\r\n", "\n").replace('\r', "\n")
}
