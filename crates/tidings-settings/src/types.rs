//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a partial file only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TidingsSettings {
    pub server: ServerSettings,
    pub broadcast: BroadcastSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

impl TidingsSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.broadcast.gc_interval_ms == 0 {
            return Err(SettingsError::InvalidValue("broadcast.gcIntervalMs must be > 0".into()));
        }
        if self.broadcast.subscriber_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "broadcast.subscriberQueueCapacity must be > 0".into(),
            ));
        }
        if self.engine.event_buffer_capacity == 0 || self.engine.delta_buffer_capacity == 0 {
            return Err(SettingsError::InvalidValue("engine buffer capacities must be > 0".into()));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Interval between SSE keep-alive comments, in milliseconds.
    pub keep_alive_ms: u64,
    /// How long shutdown waits for open channels to drain, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            keep_alive_ms: 15_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ServerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Topic broadcast and replay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastSettings {
    /// How long a published message stays replayable, in milliseconds.
    pub replay_retention_ms: u64,
    /// Period of the replay garbage collector, in milliseconds.
    pub gc_interval_ms: u64,
    /// Outbound queue slots per subscriber before it is dropped.
    pub subscriber_queue_capacity: usize,
    /// Hard cap on retained replay entries (oldest evicted first).
    pub replay_max_entries: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            replay_retention_ms: 120_000,
            gc_interval_ms: 60_000,
            subscriber_queue_capacity: 256,
            replay_max_entries: 10_000,
        }
    }
}

impl BroadcastSettings {
    pub fn replay_retention(&self) -> Duration {
        Duration::from_millis(self.replay_retention_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

/// Execution pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Slots in the outer event pipe.
    pub event_buffer_capacity: usize,
    /// Slots in each nested delta pipe.
    pub delta_buffer_capacity: usize,
    /// Name the assistant introduces itself with in the system prompt.
    pub agent_name: String,
    /// Chunks streamed by the built-in mock model.
    pub mock_reply: Vec<String>,
    /// Pause before each mock chunk, in milliseconds.
    pub mock_chunk_delay_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            event_buffer_capacity: 10,
            delta_buffer_capacity: 32,
            agent_name: "all-round assistant".to_string(),
            mock_reply: vec!["the weather is".to_string(), " good".to_string()],
            mock_chunk_delay_ms: 0,
        }
    }
}

/// Logging and metrics settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            metrics_enabled: true,
        }
    }
}
