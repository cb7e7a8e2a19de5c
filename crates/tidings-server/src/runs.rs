//! In-flight run tracking, one run per topic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tidings_core::ids::Topic;

struct RunEntry {
    generation: u64,
    token: CancellationToken,
}

/// Map of topics to the cancellation token of the bridge publishing to them.
#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<Topic, RunEntry>>,
    generation: Arc<AtomicU64>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `topic` for a new run. `None` if one is already in flight.
    pub fn try_begin(&self, topic: &Topic) -> Option<RunGuard> {
        match self.runs.entry(topic.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                let _ = slot.insert(RunEntry {
                    generation,
                    token: token.clone(),
                });
                Some(RunGuard {
                    registry: self.clone(),
                    topic: topic.clone(),
                    generation,
                    token,
                })
            }
        }
    }

    pub fn is_running(&self, topic: &Topic) -> bool {
        self.runs.contains_key(topic)
    }

    /// Cancel the run on `topic`. Returns whether one was in flight.
    pub fn cancel(&self, topic: &Topic) -> bool {
        match self.runs.get(topic) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every run. Returns how many were in flight.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.runs.iter() {
            entry.token.cancel();
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

/// Ownership of one topic's run. Dropping it frees the topic.
pub struct RunGuard {
    registry: RunRegistry,
    topic: Topic,
    generation: u64,
    token: CancellationToken,
}

impl RunGuard {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let removed = self
            .registry
            .runs
            .remove_if(&self.topic, |_, entry| entry.generation == self.generation);
        if removed.is_some() {
            debug!(topic = %self.topic, "run released");
        }
    }
}
