/// Failures produced by the model execution pipeline, either while starting a
/// run or mid-stream on the outer event stream or a nested delta stream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("model invocation failed: {0}")]
    Model(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Model(_) => "model",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}
