//! # Persistence Capability
//!
//! Abstract durable storage for the queue and snapshot, injected into the
//! engine at construction time. Three adapters ship with the crate:
//!
//! - [`JsonFilePersistence`] - single JSON file, atomic via temp-file rename
//! - [`SqlitePersistence`] - SQLite through sqlx, one transaction per save
//! - [`MemoryPersistence`] - in-process, for tests and host-app fakes
//!
//! ## Contract
//! `save` must be all-or-nothing with respect to a process crash: a crash
//! mid-save must never leave a half-written state behind. `load` treats
//! corrupt state as if no prior state existed (logged, not surfaced), so the
//! application stays usable after corruption.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kirana_core::{LocalEntity, MutationRecord};

use crate::error::SyncResult;

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::JsonFilePersistence;
pub use memory::MemoryPersistence;
pub use sqlite::SqlitePersistence;

// =============================================================================
// Persisted State
// =============================================================================

/// Everything the engine persists: the ordered mutation queue plus the
/// entity snapshot, saved together so the two can never drift apart on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Pending mutations in enqueue order.
    pub queue: Vec<MutationRecord>,

    /// Last known entity state, one row per (collection, entity id).
    pub snapshot: Vec<LocalEntity>,
}

impl PersistedState {
    /// True when there is nothing to restore.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.snapshot.is_empty()
    }
}

// =============================================================================
// Persistence Trait
// =============================================================================

/// Durable storage capability for the engine's state.
///
/// Implementations must make `save` atomic with respect to process crash.
/// `load` returns `Ok(None)` both for "no prior state" and for state that
/// failed to parse (after logging); it returns `Err` only for genuine I/O
/// failures.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Loads the previously saved state, if any.
    async fn load(&self) -> SyncResult<Option<PersistedState>>;

    /// Durably replaces the saved state. All-or-nothing.
    async fn save(&self, state: &PersistedState) -> SyncResult<()>;
}
