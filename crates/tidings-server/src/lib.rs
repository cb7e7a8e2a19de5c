//! SSE front end: starts execution runs, bridges their event streams onto
//! per-request topics, and serves those topics to HTTP clients with resume.

pub mod bridge;
pub mod config;
pub mod error;
pub mod handlers;
pub mod runs;
pub mod server;
pub mod session;

pub use bridge::{BridgeOutcome, StreamBridge, CHAT_CANCELLED};
pub use config::ServerConfig;
pub use error::ServerError;
pub use runs::{RunGuard, RunRegistry};
pub use server::{router, start, AppState, ServerHandle};
pub use session::SessionChannel;
