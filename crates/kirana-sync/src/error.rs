//! # Sync Error Types
//!
//! Error taxonomy for the sync engine.
//!
//! ## Error Categories
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Persistence      local durable read/write failed; fatal to the  │
//! │                   operation that triggered it, queue unchanged   │
//! │  RemoteTransient  network/timeout; mutation stays queued and is  │
//! │                   retried on the next drain pass                 │
//! │  RemoteRejected   remote permanently refuses the mutation;       │
//! │                   surfaced with its MutationId, never retried    │
//! │                   automatically, never silently dropped          │
//! │  Parse            malformed persisted or imported state          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Conflicts are not errors; they always resolve to a decision.

use thiserror::Error;

use kirana_core::{CoreError, MutationId};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Local durable write or read failed. The triggering operation is
    /// aborted and the in-memory queue state is left unchanged.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    // =========================================================================
    // Remote Store Errors
    // =========================================================================
    /// Network or remote-side failure; the mutation stays queued and is
    /// retried on the next pass.
    #[error("Remote store unavailable: {0}")]
    RemoteTransient(String),

    /// The remote permanently refused the mutation. Tagged with the
    /// MutationId so the caller can decide whether to drop or correct it.
    #[error("Remote rejected mutation {mutation_id}: {reason}")]
    RemoteRejected {
        mutation_id: MutationId,
        reason: String,
    },

    // =========================================================================
    // State Errors
    // =========================================================================
    /// Malformed persisted or imported state.
    #[error("Malformed state: {0}")]
    Parse(String),

    /// A mutation failed core validation before it was queued.
    #[error("Invalid mutation: {0}")]
    InvalidRecord(#[from] CoreError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// The engine has not been started or was already stopped.
    #[error("Sync engine is not running")]
    NotRunning,

    /// The engine was asked to start twice.
    #[error("Sync engine is already running")]
    AlreadyRunning,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failed operation can be retried on a later pass.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::RemoteTransient(_))
    }

    /// Returns true if the error is terminal for its mutation: the record
    /// stays queued but will not be retried until the caller intervenes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::RemoteRejected { .. })
    }
}
