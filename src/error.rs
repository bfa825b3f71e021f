//! Error taxonomy for the engine
//!
//! Validation and persistence errors are synchronous and propagate directly
//! to the caller. Remote errors are surfaced to whichever action initiated
//! the request, after the optimistic mutation has been rolled back.
//! Reconciliation failures never surface to the user; they are logged and
//! dropped inside the reconciler.

use thiserror::Error;

use crate::record::PoemId;

/// Precondition failure, reported before any state change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("poem body is empty")]
    EmptyBody,

    #[error("comment body is empty")]
    EmptyComment,

    #[error("poem is already published to the square")]
    AlreadyPublished,

    #[error("audit results apply only to a pending publish")]
    NotPendingAudit,

    #[error("no signed-in user")]
    NotSignedIn,
}

/// Typed failure from the remote API collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("remote validation rejected the request: {0}")]
    Validation(String),

    /// Conflict / duplicate. A like the remote already knows about lands
    /// here and is treated as success by the gateway.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("remote call timed out")]
    Timeout,
}

impl RemoteError {
    /// Whether this failure means the remote state already matches what the
    /// optimistic mutation assumed
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RemoteError::Conflict(_))
    }
}

/// Failure from the durable storage collaborator
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StorageError(pub String);

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Durable write failed; the in-memory change was rolled back
    #[error("durable write failed: {0}")]
    Persistence(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("poem not found: {0}")]
    NotFound(PoemId),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::Persistence(err.0)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
