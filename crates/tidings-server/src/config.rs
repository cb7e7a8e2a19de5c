//! Server configuration.

use std::time::Duration;

use tidings_broadcast::{BroadcastConfig, ReplayConfig};
use tidings_settings::TidingsSettings;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// `0` picks a free port.
    pub port: u16,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
    /// How long shutdown waits for open channels, then for the listener.
    pub shutdown_grace: Duration,
    pub broadcast: BroadcastConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            keep_alive: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(5),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &TidingsSettings) -> Self {
        let broadcast = &settings.broadcast;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            keep_alive: settings.server.keep_alive(),
            shutdown_grace: settings.server.shutdown_grace(),
            broadcast: BroadcastConfig {
                replay: ReplayConfig {
                    retention: broadcast.replay_retention(),
                    max_entries: broadcast.replay_max_entries,
                },
                gc_interval: broadcast.gc_interval(),
                queue_capacity: broadcast.subscriber_queue_capacity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_on_free_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn from_settings_maps_every_section() {
        let mut settings = TidingsSettings::default();
        settings.server.port = 9090;
        settings.server.keep_alive_ms = 500;
        settings.broadcast.replay_retention_ms = 1_000;
        settings.broadcast.gc_interval_ms = 250;
        settings.broadcast.subscriber_queue_capacity = 4;
        settings.broadcast.replay_max_entries = 50;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.keep_alive, Duration::from_millis(500));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(5));
        assert_eq!(cfg.broadcast.replay.retention, Duration::from_secs(1));
        assert_eq!(cfg.broadcast.replay.max_entries, 50);
        assert_eq!(cfg.broadcast.gc_interval, Duration::from_millis(250));
        assert_eq!(cfg.broadcast.queue_capacity, 4);
    }
}
