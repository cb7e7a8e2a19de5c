//! Metric name constants shared across crates.

/// Messages accepted by `publish` (counter).
pub const MESSAGES_PUBLISHED_TOTAL: &str = "tidings_messages_published_total";
/// Buffered messages delivered on resume (counter).
pub const MESSAGES_REPLAYED_TOTAL: &str = "tidings_messages_replayed_total";
/// Live subscriptions (gauge).
pub const SUBSCRIBERS_ACTIVE: &str = "tidings_subscribers_active";
/// Subscribers evicted because their queue was full (counter).
pub const SUBSCRIBER_DROPS_TOTAL: &str = "tidings_subscriber_drops_total";
/// Replay entries removed by GC or the size cap (counter).
pub const REPLAY_PURGED_TOTAL: &str = "tidings_replay_purged_total";
/// Retained replay entries (gauge).
pub const REPLAY_ENTRIES: &str = "tidings_replay_entries";
/// Stream bridge runs finished (counter, labels: outcome).
pub const BRIDGE_RUNS_TOTAL: &str = "tidings_bridge_runs_total";
/// Stream bridge runs in flight (gauge).
pub const BRIDGE_RUNS_ACTIVE: &str = "tidings_bridge_runs_active";
/// SSE connections opened (counter).
pub const SSE_CONNECTIONS_TOTAL: &str = "tidings_sse_connections_total";
