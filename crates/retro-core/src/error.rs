//! Unified error model for the retrodiction-training coordinator.
//!
//! One enum covers every error kind named by the error-handling policy table: `InvalidInput`,
//! `TransientIo`, `PermanentIo`, `WorkerFailure`, `Cancellation`, `UploadFailure`, plus a
//! catch-all `Serialization` for the JSON paths shared by the trust tracker and the metric/data
//! stores. Callers match on kind to decide whether to retry, log-and-continue, or abort.

use std::io;
use thiserror::Error;

/// Result type alias for retro-core and downstream crates.
pub type Result<T> = std::result::Result<T, RetroError>;

/// Unified error type for the coordinator.
#[derive(Debug, Error)]
pub enum RetroError {
    /// Bad input at a validation boundary (batch planning, config construction).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An I/O failure that is expected to be retried by the caller before giving up.
    #[error("transient I/O error: {0}")]
    TransientIo(#[source] io::Error),

    /// An I/O or data failure that is not retried; the caller logs and degrades gracefully.
    #[error("permanent I/O error: {0}")]
    PermanentIo(String),

    /// A worker task failed while processing a batch; captured, never propagated to the run.
    #[error("worker failure: {0}")]
    WorkerFailure(String),

    /// The run was cancelled, either explicitly or via signal.
    #[error("operation cancelled")]
    Cancellation,

    /// A results upload failed; recorded on the run summary, never fails the pipeline.
    #[error("upload failure: {0}")]
    UploadFailure(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RetroError {
    /// Construct an [`RetroError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        RetroError::InvalidInput(message.into())
    }

    /// Construct a [`RetroError::PermanentIo`].
    pub fn permanent_io(message: impl Into<String>) -> Self {
        RetroError::PermanentIo(message.into())
    }

    /// Construct a [`RetroError::WorkerFailure`].
    pub fn worker_failure(message: impl Into<String>) -> Self {
        RetroError::WorkerFailure(message.into())
    }

    /// Construct an [`RetroError::UploadFailure`].
    pub fn upload_failure(message: impl Into<String>) -> Self {
        RetroError::UploadFailure(message.into())
    }

    /// True for errors that should be retried by the caller (transient I/O only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetroError::TransientIo(_))
    }

    /// True for errors that must never fail the overall pipeline (§7: WorkerFailure, UploadFailure).
    pub fn is_non_fatal(&self) -> bool {
        matches!(
            self,
            RetroError::WorkerFailure(_) | RetroError::UploadFailure(_)
        )
    }
}

impl From<io::Error> for RetroError {
    fn from(e: io::Error) -> Self {
        RetroError::TransientIo(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_display() {
        let e = RetroError::invalid_input("variables list cannot be empty");
        assert!(e.to_string().contains("variables list cannot be empty"));
    }

    #[test]
    fn io_error_converts_to_transient() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let e: RetroError = io_err.into();
        assert!(matches!(e, RetroError::TransientIo(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn permanent_io_is_not_retryable() {
        let e = RetroError::permanent_io("index corrupt");
        assert!(!e.is_retryable());
    }

    #[test]
    fn worker_and_upload_failures_are_non_fatal() {
        assert!(RetroError::worker_failure("boom").is_non_fatal());
        assert!(RetroError::upload_failure("network down").is_non_fatal());
        assert!(!RetroError::invalid_input("bad").is_non_fatal());
    }

    #[test]
    fn serialization_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let e: RetroError = parse_err.into();
        assert!(matches!(e, RetroError::Serialization(_)));
    }

    #[test]
    fn cancellation_is_not_retryable_or_fatal_flagged() {
        let e = RetroError::Cancellation;
        assert!(!e.is_retryable());
        assert!(!e.is_non_fatal());
    }
}
