//! Error taxonomy for the signal simulation
//!
//! None of these are fatal. The engine and the detection feed log them and
//! fall back to a no-op or a default result.

use thiserror::Error;

use super::types::SessionId;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("road '{road}' not found in session {session}")]
    RoadNotFound { session: SessionId, road: String },

    #[error("durable run {0} not found")]
    RunNotFound(SessionId),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("delivery to sink failed for '{road}': {reason}")]
    Delivery { road: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Shorthand result type for typed signal errors
pub type SignalResult<T> = Result<T, SignalError>;
