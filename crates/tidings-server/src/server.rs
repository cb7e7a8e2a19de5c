//! Router construction and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tidings_broadcast::{BroadcastError, BroadcastServer};
use tidings_core::engine::ExecutionEngine;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers;
use crate::runs::RunRegistry;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub broadcast: BroadcastServer,
    pub runs: RunRegistry,
    pub engine: Arc<dyn ExecutionEngine>,
    pub keep_alive: Duration,
    /// Present when a Prometheus recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

/// Build the axum router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", get(handlers::chat))
        .route("/v1/chat/{request_id}/events", get(handlers::events))
        .route("/v1/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the listener, start the replay purge task, and serve in the
/// background.
pub async fn start(
    config: ServerConfig,
    engine: Arc<dyn ExecutionEngine>,
    prometheus: Option<PrometheusHandle>,
) -> Result<ServerHandle, ServerError> {
    let bind = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|source| ServerError::Bind { addr: bind.clone(), source })?;
    let addr = listener.local_addr()?;

    let broadcast = BroadcastServer::start(config.broadcast.clone());
    let runs = RunRegistry::new();
    let state = AppState {
        broadcast: broadcast.clone(),
        runs: runs.clone(),
        engine: Arc::clone(&engine),
        keep_alive: config.keep_alive,
        prometheus,
    };

    let stop = CancellationToken::new();
    let signal = stop.clone();
    let app = router(state);
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
    });

    info!(%addr, engine = engine.name(), "tidings server listening");
    Ok(ServerHandle {
        addr,
        broadcast,
        runs,
        grace: config.shutdown_grace,
        stop,
        task: Mutex::new(Some(task)),
    })
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    broadcast: BroadcastServer,
    runs: RunRegistry,
    grace: Duration,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn broadcast(&self) -> &BroadcastServer {
        &self.broadcast
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    /// Cancel in-flight runs, close every subscriber, then stop the HTTP
    /// listener. Each wait is bounded by the shutdown grace. Idempotent.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let cancelled = self.runs.cancel_all();
        info!(cancelled, "shutting down");

        match self.broadcast.shutdown(self.grace).await {
            Ok(()) => {}
            Err(BroadcastError::ShutdownTimedOut { remaining }) => {
                warn!(remaining, "channels still open after grace, closing listener anyway");
            }
            Err(e) => return Err(e.into()),
        }

        self.stop.cancel();
        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };
        let abort = task.abort_handle();
        match tokio::time::timeout(self.grace, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => warn!(error = %join, "http server task failed"),
            Err(_) => {
                warn!("http listener did not stop within grace, aborting");
                abort.abort();
            }
        }
        info!("server stopped");
        Ok(())
    }
}
