//! Topic registry, fan-out, and lifecycle.
//!
//! All registry mutation and id assignment happen under one mutex. A publish
//! appends to the replay buffer and enqueues to subscribers inside that lock;
//! a subscribe snapshots the replay tail and registers inside it too. So a
//! subscriber sees every message with an id above its resume point exactly
//! once: either in the snapshot or on its live queue.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tidings_core::ids::{MessageId, Topic};
use tidings_core::wire::WireMessage;
use tidings_telemetry::metric_names as m;

use crate::error::BroadcastError;
use crate::replay::{ReplayBuffer, ReplayConfig, ReplayEntry};
use crate::subscriber::{Subscriber, SubscriberId};
use crate::Publisher;

/// Reason sent in the `close` message delivered on shutdown.
const SHUTDOWN_REASON: &str = "server shutting down";

#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    pub replay: ReplayConfig,
    /// Period of the replay purge task.
    pub gc_interval: Duration,
    /// Outbound queue slots per subscriber. A subscriber whose queue is
    /// full when a message arrives is dropped.
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            replay: ReplayConfig::default(),
            gc_interval: Duration::from_secs(60),
            queue_capacity: 256,
        }
    }
}

struct Registration {
    topics: Vec<Topic>,
    tx: mpsc::Sender<WireMessage>,
}

#[derive(Default)]
struct Registry {
    closed: bool,
    last_message_id: u64,
    next_subscriber_id: u64,
    subscribers: HashMap<SubscriberId, Registration>,
    by_topic: HashMap<Topic, HashSet<SubscriberId>>,
}

impl Registry {
    fn register(&mut self, topics: Vec<Topic>, tx: mpsc::Sender<WireMessage>) -> SubscriberId {
        self.next_subscriber_id += 1;
        let id = SubscriberId(self.next_subscriber_id);
        for topic in &topics {
            let _ = self.by_topic.entry(topic.clone()).or_default().insert(id);
        }
        let _ = self.subscribers.insert(id, Registration { topics, tx });
        id
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        let Some(registration) = self.subscribers.remove(&id) else {
            return false;
        };
        for topic in &registration.topics {
            if let Some(ids) = self.by_topic.get_mut(topic) {
                let _ = ids.remove(&id);
                if ids.is_empty() {
                    let _ = self.by_topic.remove(topic);
                }
            }
        }
        true
    }

    fn recipients(&self, topics: &[Topic]) -> HashSet<SubscriberId> {
        topics
            .iter()
            .filter_map(|t| self.by_topic.get(t))
            .flatten()
            .copied()
            .collect()
    }
}

pub(crate) struct Inner {
    config: BroadcastConfig,
    registry: Mutex<Registry>,
    replay: ReplayBuffer,
    shutdown: CancellationToken,
    live_handles: AtomicUsize,
    drained: Notify,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Called when a [`Subscriber`] handle drops.
    pub(crate) fn release(&self, id: SubscriberId) {
        if self.registry.lock().remove(id) {
            metrics::gauge!(m::SUBSCRIBERS_ACTIVE).decrement(1.0);
        }
        if self.live_handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Topic-scoped broadcast hub with replay. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastServer {
    inner: Arc<Inner>,
}

impl BroadcastServer {
    pub fn new(config: BroadcastConfig) -> Self {
        let replay = ReplayBuffer::new(config.replay.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry::default()),
                replay,
                shutdown: CancellationToken::new(),
                live_handles: AtomicUsize::new(0),
                drained: Notify::new(),
                gc_task: Mutex::new(None),
            }),
        }
    }

    /// Create a server and start its replay purge task. Must be called
    /// inside a Tokio runtime.
    pub fn start(config: BroadcastConfig) -> Self {
        let server = Self::new(config);
        server.spawn_gc();
        server
    }

    /// Start the periodic replay purge. A second call is a no-op.
    pub fn spawn_gc(&self) {
        let mut slot = self.inner.gc_task.lock();
        if slot.is_some() || self.inner.shutdown.is_cancelled() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.gc_interval;
        let cancel = self.inner.shutdown.clone();
        *slot = Some(tokio::spawn(run_gc(weak, period, cancel)));
    }

    /// Assign the next id, store the message for replay, and enqueue it to
    /// every subscriber of any of `topics`. Never blocks on subscribers;
    /// one whose queue is full is dropped. Zero subscribers is not an error.
    pub fn publish(&self, message: WireMessage, topics: &[Topic]) -> Result<MessageId, BroadcastError> {
        let mut registry = self.inner.registry.lock();
        if registry.closed {
            return Err(BroadcastError::Closed);
        }

        registry.last_message_id += 1;
        let id = MessageId::new(registry.last_message_id);
        let message = message.with_id(id);

        let evicted = self.inner.replay.append(ReplayEntry {
            id,
            topics: topics.to_vec(),
            message: message.clone(),
            stored_at: Instant::now(),
        });
        if evicted > 0 {
            metrics::counter!(m::REPLAY_PURGED_TOTAL).increment(evicted as u64);
        }

        let mut dropped = Vec::new();
        for sid in registry.recipients(topics) {
            let Some(registration) = registry.subscribers.get(&sid) else {
                continue;
            };
            match registration.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = %sid, message_id = %id, "subscriber queue full, dropping subscriber");
                    metrics::counter!(m::SUBSCRIBER_DROPS_TOTAL).increment(1);
                    dropped.push(sid);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(sid),
            }
        }
        for sid in dropped {
            if registry.remove(sid) {
                metrics::gauge!(m::SUBSCRIBERS_ACTIVE).decrement(1.0);
            }
        }
        drop(registry);

        metrics::counter!(m::MESSAGES_PUBLISHED_TOTAL, "type" => message.kind.as_str()).increment(1);
        metrics::gauge!(m::REPLAY_ENTRIES).set(self.inner.replay.len() as f64);
        Ok(id)
    }

    /// Register interest in `topics`. With `last_message_id`, the retained
    /// messages on those topics with a greater id are delivered first, then
    /// live traffic, with no duplicates and no gap between the two.
    #[instrument(skip(self))]
    pub fn subscribe(
        &self,
        topics: Vec<Topic>,
        last_message_id: Option<MessageId>,
    ) -> Result<Subscriber, BroadcastError> {
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);

        let mut registry = self.inner.registry.lock();
        if registry.closed {
            return Err(BroadcastError::Closed);
        }
        let replay: Vec<WireMessage> = match last_message_id {
            Some(after) => self
                .inner
                .replay
                .range(&topics, after, Instant::now())
                .iter()
                .map(|entry| entry.message.clone())
                .collect(),
            None => Vec::new(),
        };
        let id = registry.register(topics.clone(), tx);
        let _ = self.inner.live_handles.fetch_add(1, Ordering::AcqRel);
        drop(registry);

        if let Some(after) = last_message_id {
            if let Some(oldest) = self.inner.replay.oldest_id() {
                if after.next() < oldest {
                    debug!(subscriber = %id, after = %after, oldest = %oldest, "resume point older than retained history");
                }
            }
            metrics::counter!(m::MESSAGES_REPLAYED_TOTAL).increment(replay.len() as u64);
        }
        metrics::gauge!(m::SUBSCRIBERS_ACTIVE).increment(1.0);
        debug!(subscriber = %id, replayed = replay.len(), "subscribed");

        Ok(Subscriber::new(id, topics, replay, rx, Arc::downgrade(&self.inner)))
    }

    /// Remove a subscription. Its handle then yields any queued messages and
    /// ends. Returns whether the subscription was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.registry.lock().remove(id);
        if removed {
            metrics::gauge!(m::SUBSCRIBERS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Drop `subscriber` and call `on_idle` for each of its topics that is
    /// left with no subscribers. `on_idle` runs under the registry lock, so a
    /// concurrent subscribe to the same topic lands either before the removal
    /// (and the topic is not idle) or after `on_idle` has returned.
    pub fn leave(&self, subscriber: Subscriber, mut on_idle: impl FnMut(&Topic)) {
        {
            let mut registry = self.inner.registry.lock();
            if registry.remove(subscriber.id()) {
                metrics::gauge!(m::SUBSCRIBERS_ACTIVE).decrement(1.0);
            }
            for topic in subscriber.topics() {
                if !registry.by_topic.contains_key(topic) {
                    on_idle(topic);
                }
            }
        }
        drop(subscriber);
    }

    /// Subscriptions currently registered on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .registry
            .lock()
            .by_topic
            .get(topic)
            .map_or(0, HashSet::len)
    }

    /// Subscriptions currently registered on any topic.
    pub fn total_subscribers(&self) -> usize {
        self.inner.registry.lock().subscribers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn replay_len(&self) -> usize {
        self.inner.replay.len()
    }

    /// Stop accepting work, send `close` to every subscriber, and wait up to
    /// `grace` for all subscriber handles to be dropped. Safe to call more
    /// than once; later calls only wait.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), BroadcastError> {
        let first = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                false
            } else {
                registry.closed = true;
                let close = WireMessage::close(SHUTDOWN_REASON);
                for registration in registry.subscribers.values() {
                    let _ = registration.tx.try_send(close.clone());
                }
                let count = registry.subscribers.len();
                registry.subscribers.clear();
                registry.by_topic.clear();
                metrics::gauge!(m::SUBSCRIBERS_ACTIVE).decrement(count as f64);
                true
            }
        };

        if first {
            self.inner.shutdown.cancel();
            if let Some(gc) = self.inner.gc_task.lock().take() {
                gc.abort();
            }
            self.inner.replay.clear();
            info!(open = self.inner.live_handles.load(Ordering::Acquire), "broadcast server shutting down");
        }

        let drained = tokio::time::timeout(grace, self.wait_drained()).await;
        match drained {
            Ok(()) => Ok(()),
            Err(_) => {
                let remaining = self.inner.live_handles.load(Ordering::Acquire);
                warn!(remaining, "shutdown grace elapsed with subscribers still open");
                Err(BroadcastError::ShutdownTimedOut { remaining })
            }
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            let _ = notified.as_mut().enable();
            if self.inner.live_handles.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Publisher for BroadcastServer {
    fn publish(&self, message: WireMessage, topics: &[Topic]) -> Result<MessageId, BroadcastError> {
        BroadcastServer::publish(self, message, topics)
    }
}

fn purge(inner: &Inner) -> usize {
    let purged = inner.replay.gc(Instant::now());
    if purged > 0 {
        debug!(purged, "purged expired replay entries");
        metrics::counter!(m::REPLAY_PURGED_TOTAL).increment(purged as u64);
    }
    metrics::gauge!(m::REPLAY_ENTRIES).set(inner.replay.len() as f64);
    purged
}

async fn run_gc(inner: Weak<Inner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { return };
                let _ = purge(&inner);
            }
        }
    }
}
