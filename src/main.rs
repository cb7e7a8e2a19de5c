//! # tidings
//!
//! Server binary: loads settings, installs telemetry, and serves chat runs
//! over SSE until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use tidings_engine::{EngineConfig, MockChatModel, ModelEngine};
use tidings_server::ServerConfig;
use tidings_settings::TidingsSettings;
use tidings_telemetry::{init_telemetry, TelemetryConfig};

/// Streaming chat server with resumable SSE delivery.
#[derive(Parser, Debug)]
#[command(name = "tidings", about = "Streaming chat server with resumable SSE delivery")]
struct Cli {
    /// Settings file (defaults to `TIDINGS_SETTINGS` or `~/.tidings/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

fn load(cli: &Cli) -> Result<TidingsSettings> {
    let mut settings = match &cli.config {
        Some(path) => tidings_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => tidings_settings::load_settings().context("failed to load settings")?,
    };
    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    Ok(settings)
}

fn telemetry_config(settings: &TidingsSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: Level::from_str(&settings.logging.level).unwrap_or(Level::INFO),
        json: settings.logging.json,
        metrics_enabled: settings.logging.metrics_enabled,
        ..TelemetryConfig::default()
    }
}

fn engine(settings: &TidingsSettings) -> ModelEngine<MockChatModel> {
    let engine = &settings.engine;
    let model = MockChatModel::new(engine.mock_reply.iter().cloned())
        .with_chunk_delay(Duration::from_millis(engine.mock_chunk_delay_ms));
    ModelEngine::new(
        model,
        EngineConfig {
            event_buffer: engine.event_buffer_capacity,
            delta_buffer: engine.delta_buffer_capacity,
            agent_name: engine.agent_name.clone(),
        },
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    let telemetry = init_telemetry(telemetry_config(&settings)).context("failed to initialize telemetry")?;

    let handle = tidings_server::start(
        ServerConfig::from_settings(&settings),
        Arc::new(engine(&settings)),
        telemetry.prometheus(),
    )
    .await
    .context("failed to start server")?;
    tracing::info!(addr = %handle.local_addr(), "tidings ready");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    tracing::info!("interrupt received");

    handle.shutdown().await.context("shutdown failed")?;
    Ok(())
}
