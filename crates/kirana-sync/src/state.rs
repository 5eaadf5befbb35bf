//! # Shared Persisted State
//!
//! One mutex guards everything the engine persists: the mutation queue and
//! the entity snapshot. The queue and snapshot facades, `enqueue`/`clear`
//! callers, and an in-progress drain therefore follow a single-writer
//! discipline, and every save writes both halves together so they can never
//! drift apart on disk.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use kirana_core::{EntityKey, LocalEntity, MutationRecord};

use crate::error::SyncResult;
use crate::persist::{PersistedState, Persistence};

// =============================================================================
// Sync State
// =============================================================================

/// In-memory image of the persisted state.
#[derive(Debug, Default)]
pub(crate) struct SyncState {
    /// Pending mutations in enqueue order.
    pub queue: Vec<MutationRecord>,

    /// Last known entity state, exactly one row per key.
    pub snapshot: HashMap<EntityKey, LocalEntity>,
}

impl SyncState {
    fn from_persisted(persisted: PersistedState) -> Self {
        let snapshot = persisted
            .snapshot
            .into_iter()
            .map(|entity| (entity.key.clone(), entity))
            .collect();

        SyncState {
            queue: persisted.queue,
            snapshot,
        }
    }

    fn to_persisted(&self) -> PersistedState {
        // Sorted for a deterministic on-disk layout.
        let mut snapshot: Vec<LocalEntity> = self.snapshot.values().cloned().collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));

        PersistedState {
            queue: self.queue.clone(),
            snapshot,
        }
    }

    /// Keys that currently have at least one pending mutation.
    pub fn pending_keys(&self) -> std::collections::HashSet<EntityKey> {
        self.queue.iter().map(|r| r.entity_key()).collect()
    }
}

// =============================================================================
// State Cell
// =============================================================================

/// The single owner of the persisted state: a mutex over [`SyncState`] plus
/// the injected persistence capability.
pub(crate) struct StateCell {
    inner: Mutex<SyncState>,
    persistence: Arc<dyn Persistence>,
}

impl StateCell {
    /// Loads prior state (or starts empty) and wraps it in a cell.
    pub async fn open(persistence: Arc<dyn Persistence>) -> SyncResult<Arc<Self>> {
        let state = match persistence.load().await? {
            Some(persisted) => {
                info!(
                    queued = persisted.queue.len(),
                    entities = persisted.snapshot.len(),
                    "Restored sync state"
                );
                SyncState::from_persisted(persisted)
            }
            None => SyncState::default(),
        };

        Ok(Arc::new(StateCell {
            inner: Mutex::new(state),
            persistence,
        }))
    }

    /// Acquires the single-writer lock.
    pub async fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.inner.lock().await
    }

    /// Durably saves the given state image. Callers hold the lock while
    /// saving so a concurrent writer cannot interleave; on error they roll
    /// back their in-memory change before releasing it.
    pub async fn persist(&self, state: &SyncState) -> SyncResult<()> {
        self.persistence.save(&state.to_persisted()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersistence;
    use chrono::Utc;
    use kirana_core::MutationAction;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_empty() {
        let cell = StateCell::open(Arc::new(MemoryPersistence::new()))
            .await
            .unwrap();
        let state = cell.lock().await;
        assert!(state.queue.is_empty());
        assert!(state.snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_reopen() {
        let persistence = MemoryPersistence::new();

        {
            let cell = StateCell::open(Arc::new(persistence.clone())).await.unwrap();
            let mut state = cell.lock().await;
            let record = MutationRecord::new(
                MutationAction::Create,
                "orders",
                "order-1",
                json!({ "total": 450 }),
                Utc::now(),
            )
            .unwrap();
            state.queue.push(record);
            cell.persist(&state).await.unwrap();
        }

        let cell = StateCell::open(Arc::new(persistence)).await.unwrap();
        let state = cell.lock().await;
        assert_eq!(state.queue.len(), 1);
        assert_eq!(state.queue[0].entity_id, "order-1");
    }

    #[tokio::test]
    async fn test_pending_keys() {
        let mut state = SyncState::default();
        for entity_id in ["a", "b", "a"] {
            state.queue.push(
                MutationRecord::new(
                    MutationAction::Update,
                    "orders",
                    entity_id,
                    json!({}),
                    Utc::now(),
                )
                .unwrap(),
            );
        }

        let keys = state.pending_keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&EntityKey::new("orders", "a")));
    }
}
