//! Error types for the async span layer.

use std::time::Duration;

use lumen_common::LumenError;
use miette::Diagnostic;

/// Failure at the labeling boundary.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum LabelError {
    #[error("labeling request failed")]
    #[diagnostic(code(lumen::labeler::transport))]
    Transport(#[source] reqwest::Error),

    #[error("labeling service responded with status {status}")]
    #[diagnostic(code(lumen::labeler::status))]
    Status { status: u16 },

    #[error("labeling service timed out")]
    #[diagnostic(
        code(lumen::labeler::timeout),
        help("raise LUMEN_LABELER_TIMEOUT_MS if the service is slow but healthy")
    )]
    Timeout,

    #[error("could not decode labeling response: {0}")]
    #[diagnostic(code(lumen::labeler::decode))]
    Decode(String),

    /// Failure reported by a non-HTTP labeler.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for LabelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LabelError::Timeout
        } else if let Some(status) = err.status() {
            LabelError::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            LabelError::Decode(err.to_string())
        } else {
            LabelError::Transport(err)
        }
    }
}

/// Why a retrieval produced no spans.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum RetrievalError {
    /// Labeling failed and nothing cached could stand in.
    #[error(transparent)]
    #[diagnostic_source]
    Labeler(#[from] LabelError),

    #[error("labeling task failed: {0}")]
    #[diagnostic(code(lumen::retrieval::task))]
    Task(String),
}

/// Durable storage failure.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum StorageError {
    #[error(transparent)]
    #[diagnostic(code(lumen::storage::io))]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    #[diagnostic(code(lumen::storage::json))]
    Json(#[from] serde_json::Error),
}

/// Background offload failure. Callers fall back to processing inline.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum OffloadError {
    #[error("offload worker unavailable: {0}")]
    #[diagnostic(code(lumen::offload::unavailable))]
    Unavailable(String),

    #[error("offload worker did not answer within {0:?}")]
    #[diagnostic(code(lumen::offload::timeout))]
    Timeout(Duration),

    #[error("offload worker reported an error: {0}")]
    #[diagnostic(code(lumen::offload::worker))]
    Worker(String),

    #[error("offload worker hung up")]
    #[diagnostic(code(lumen::offload::closed))]
    Closed,
}

impl From<LabelError> for LumenError {
    fn from(err: LabelError) -> Self {
        LumenError::Labeling(err.to_string())
    }
}

impl From<RetrievalError> for LumenError {
    fn from(err: RetrievalError) -> Self {
        LumenError::Labeling(err.to_string())
    }
}

impl From<StorageError> for LumenError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => LumenError::Io(e),
            other => LumenError::Storage(other.to_string()),
        }
    }
}

impl From<OffloadError> for LumenError {
    fn from(err: OffloadError) -> Self {
        LumenError::Offload(err.to_string())
    }
}
