#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// The server has been shut down. Not retryable.
    #[error("broadcast server closed")]
    Closed,
    #[error("shutdown grace period elapsed with {remaining} subscribers still open")]
    ShutdownTimedOut { remaining: usize },
}
