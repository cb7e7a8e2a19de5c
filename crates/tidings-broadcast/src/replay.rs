//! Time-windowed history of published messages.
//!
//! Entries are kept in id order. Because ids and timestamps are both taken
//! under the publish lock, id order is also timestamp order, so expiry only
//! ever removes a prefix.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use tidings_core::ids::{MessageId, Topic};
use tidings_core::wire::WireMessage;

#[derive(Clone, Debug)]
pub struct ReplayConfig {
    /// Entries older than this are never replayed and get purged.
    pub retention: Duration,
    /// Oldest entries are evicted beyond this count.
    pub max_entries: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(120),
            max_entries: 10_000,
        }
    }
}

/// A stored message. Immutable once appended.
#[derive(Debug)]
pub struct ReplayEntry {
    pub id: MessageId,
    pub topics: Vec<Topic>,
    pub message: WireMessage,
    pub stored_at: Instant,
}

impl ReplayEntry {
    fn matches(&self, topics: &[Topic]) -> bool {
        self.topics.iter().any(|t| topics.contains(t))
    }
}

pub struct ReplayBuffer {
    config: ReplayConfig,
    entries: RwLock<VecDeque<Arc<ReplayEntry>>>,
}

impl ReplayBuffer {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.config.retention
    }

    /// Store an entry. Ids must be appended in increasing order. Returns how
    /// many of the oldest entries were evicted to respect `max_entries`.
    pub fn append(&self, entry: ReplayEntry) -> usize {
        let mut entries = self.entries.write();
        debug_assert!(entries.back().map_or(true, |last| last.id < entry.id));
        entries.push_back(Arc::new(entry));

        let mut evicted = 0;
        while entries.len() > self.config.max_entries {
            let _ = entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Unexpired entries on any of `topics` with an id greater than `after`,
    /// in id order. The scan runs under the read lock, so a concurrent
    /// [`gc`](Self::gc) waits for it; returned entries stay valid after purge.
    pub fn range(&self, topics: &[Topic], after: MessageId, now: Instant) -> Vec<Arc<ReplayEntry>> {
        let entries = self.entries.read();
        let start = entries.partition_point(|e| e.id <= after);
        entries
            .range(start..)
            .filter(|e| !self.is_expired(e, now) && e.matches(topics))
            .cloned()
            .collect()
    }

    /// Remove entries older than the retention window. Returns the count.
    pub fn gc(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let mut purged = 0;
        while entries.front().is_some_and(|e| self.is_expired(e, now)) {
            let _ = entries.pop_front();
            purged += 1;
        }
        purged
    }

    /// Id of the oldest retained entry.
    pub fn oldest_id(&self) -> Option<MessageId> {
        self.entries.read().front().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop everything. Used on shutdown.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn is_expired(&self, entry: &ReplayEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) >= self.config.retention
    }
}
