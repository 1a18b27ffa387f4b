//! Unified error taxonomy
//!
//! Every fallible operation in the workspace returns [`EngineResult`].
//! Expected failures surface to the caller unchanged; [`EngineError::Internal`]
//! marks an invariant violation and is logged with context before surfacing.

use thiserror::Error;

/// Errors surfaced by the analysis core
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration violates documented constraints
    #[error("invalid parameters: {reason}")]
    InvalidParams {
        /// Which constraint was violated
        reason: String,
    },

    /// Samples contain NaN/Inf or have the wrong arity
    #[error("invalid audio: {reason}")]
    InvalidAudio {
        /// What was wrong with the samples
        reason: String,
    },

    /// Unknown session identifier
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// Operation not permitted in the current session state
    #[error("wrong state: {operation} not permitted while {state}")]
    WrongState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: &'static str,
    },

    /// Master call identifier unknown
    #[error("master call not found: {0}")]
    NotFound(String),

    /// Feature file fails magic/integrity checks
    #[error("corrupt data: {reason}")]
    CorruptData {
        /// What failed to validate
        reason: String,
    },

    /// Feature file version incompatible with the current extractor
    #[error("version mismatch: {reason}")]
    VersionMismatch {
        /// Which version gate failed
        reason: String,
    },

    /// Not enough frames for a stable score
    #[error("insufficient data: {have} frames, need {need}")]
    InsufficientData {
        /// Frames available
        have: usize,
        /// Frames required
        need: usize,
    },

    /// Ring buffer full; retry after backoff
    #[error("ring buffer overflow on session {0}")]
    Overflow(u64),

    /// Session cap, pool growth cap, or cache cap reached
    #[error("resource exhausted: {reason}")]
    ResourceExhausted {
        /// Which cap was hit
        reason: String,
    },

    /// Operation aborted because the session was destroyed
    #[error("canceled: session {0} destroyed")]
    Canceled(u64),

    /// Invariant violated; implies a bug
    #[error("internal error: {reason}")]
    Internal {
        /// Context for the violated invariant
        reason: String,
    },
}

impl EngineError {
    /// Shorthand for an [`EngineError::InvalidParams`]
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`EngineError::InvalidAudio`]
    pub fn invalid_audio(reason: impl Into<String>) -> Self {
        Self::InvalidAudio {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`EngineError::CorruptData`]
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptData {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`EngineError::Internal`]; logs before constructing
    pub fn internal(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        log::error!("internal invariant violated: {reason}");
        Self::Internal { reason }
    }
}

/// Result type for all core operations
pub type EngineResult<T> = Result<T, EngineError>;
