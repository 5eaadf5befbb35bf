//! # Remote Store Capability
//!
//! The injected boundary to the remote system. The engine only ever asks it
//! to apply one mutation or fetch one entity; batching, transport, deadlines
//! and auth are the implementation's business.
//!
//! ## Idempotency Contract
//! [`MutationRecord::id`] is the retry key: the engine may re-apply a
//! mutation whose earlier success was lost to a crash before the queue
//! removal persisted. Implementations must make re-application of an
//! already-applied id observable-side-effect free (at-most-once end to end).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use kirana_core::{EntityKey, LocalEntity, MutationRecord};

// =============================================================================
// Remote Results
// =============================================================================

/// Successful application of one mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteAck {
    /// Fields the server assigned or rewrote (ids, canonical timestamps,
    /// computed totals). Laid over the local payload in the snapshot.
    pub server_fields: Option<Value>,
}

/// Failure modes of the remote boundary.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network or remote-side trouble; safe to retry on a later pass.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote permanently refuses the mutation (structurally invalid,
    /// authorization revoked, ...). Never auto-retried.
    #[error("remote rejected mutation: {0}")]
    Rejected(String),
}

// =============================================================================
// Remote Store Trait
// =============================================================================

/// Apply-and-fetch capability over the remote system.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Applies one mutation. Must be idempotent per [`MutationRecord::id`].
    async fn apply(&self, record: &MutationRecord) -> Result<RemoteAck, RemoteError>;

    /// Fetches the current remote state of one entity. `Ok(None)` means the
    /// entity does not exist remotely.
    async fn fetch(&self, key: &EntityKey) -> Result<Option<LocalEntity>, RemoteError>;
}
