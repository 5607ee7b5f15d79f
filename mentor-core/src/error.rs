use std::time::Duration;
use thiserror::Error;

/// Failures reported by an [`crate::engine::InferenceEngine`] implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no model is loaded")]
    NotLoaded,

    #[error("unknown model id: {0}")]
    UnknownModel(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("stream failed: {0}")]
    Stream(String),
}

/// Terminal outcomes a generation can fail with. Every failure is terminal
/// for that request; there are no retries.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// A generation was requested before a model finished loading.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(#[from] EngineError),

    /// Another generation is already outstanding.
    #[error("a generation is already in progress")]
    Busy,

    /// The session was empty or did not end with a user message.
    #[error("session must be non-empty and end with a user message")]
    InvalidSession,

    /// The stream or final retrieval raised an exception.
    #[error("stream failure: {0}")]
    StreamFailure(String),

    /// The user requested interruption. Distinct from [`Self::StreamFailure`]
    /// so callers can render "stopped by user" rather than a generic failure.
    #[error("generation stopped by user")]
    Interrupted,

    /// No delta arrived within the configured window.
    #[error("no output received from engine within {0:?}")]
    Timeout(Duration),
}

impl GenerateError {
    /// True when the termination was user-initiated rather than a fault.
    pub fn is_interruption(&self) -> bool {
        matches!(self, GenerateError::Interrupted)
    }
}
