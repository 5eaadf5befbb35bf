//! # Mutation Queue
//!
//! Durable, strictly ordered log of pending mutations (the outbox). Every
//! enqueue persists the full state before returning, so a crash between
//! enqueue and the next drain pass never loses a record. Enqueue touches
//! local persistence only - it never blocks on the network.
//!
//! ## Queue Flow
//! ```text
//! caller ──enqueue──► [ record appended + snapshot row updated ]
//!                     [ state persisted, then the call returns ]
//!                                  │
//!                                  ▼
//!                      drained in order by the sync engine;
//!                      confirmed records removed via remove_synced
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use kirana_core::{
    merge_fields, LocalEntity, MutationAction, MutationId, MutationRecord,
};

use crate::error::SyncResult;
use crate::state::StateCell;

/// Facade over the shared state cell exposing the queue contract.
///
/// The queue is owned by the engine's persistence boundary; only the engine
/// removes records (after confirmed remote application).
#[derive(Clone)]
pub struct MutationQueue {
    cell: Arc<StateCell>,
}

impl MutationQueue {
    pub(crate) fn new(cell: Arc<StateCell>) -> Self {
        MutationQueue { cell }
    }

    /// Appends a mutation and persists it before returning.
    ///
    /// The local snapshot row for the target entity is updated in the same
    /// save (offline-first: the UI reads local state immediately). On a
    /// persistence failure the in-memory change is rolled back and the
    /// mutation is NOT considered queued; the caller must retry or surface
    /// the error.
    pub async fn enqueue(
        &self,
        action: MutationAction,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> SyncResult<MutationId> {
        let now = Utc::now();
        let record = MutationRecord::new(action, collection, entity_id, payload, now)?;
        let id = record.id;
        let key = record.entity_key();

        let mut state = self.cell.lock().await;

        // Remember enough to roll back if the save fails.
        let previous_entity = state.snapshot.get(&key).cloned();

        match action {
            MutationAction::Create => {
                state.snapshot.insert(
                    key.clone(),
                    LocalEntity::from_local(key.clone(), record.payload.clone(), now),
                );
            }
            MutationAction::Update => {
                let fields = match state.snapshot.get(&key) {
                    Some(existing) => merge_fields(&record.payload, &existing.fields),
                    None => record.payload.clone(),
                };
                let last_fetched_at =
                    state.snapshot.get(&key).and_then(|e| e.last_fetched_at);
                state.snapshot.insert(
                    key.clone(),
                    LocalEntity {
                        key: key.clone(),
                        fields,
                        last_updated_at: now,
                        last_fetched_at,
                    },
                );
            }
            MutationAction::Delete => {
                state.snapshot.remove(&key);
            }
        }

        state.queue.push(record);

        if let Err(e) = self.cell.persist(&state).await {
            state.queue.pop();
            match previous_entity {
                Some(entity) => {
                    state.snapshot.insert(key, entity);
                }
                None => {
                    state.snapshot.remove(&key);
                }
            }
            return Err(e);
        }

        debug!(%id, %action, entity = %key, "Mutation enqueued");
        Ok(id)
    }

    /// Count of unsynced records. Weakly consistent with a concurrent drain.
    pub async fn pending_count(&self) -> usize {
        self.cell.lock().await.queue.len()
    }

    /// Ordered, read-only copy of the queue for export and diagnostics.
    pub async fn snapshot(&self) -> Vec<MutationRecord> {
        self.cell.lock().await.queue.clone()
    }

    /// Atomically drops the given records and re-persists. Called only by
    /// the sync engine after confirmed remote application.
    pub(crate) async fn remove_synced(&self, ids: &HashSet<MutationId>) -> SyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut state = self.cell.lock().await;
        let previous = state.queue.clone();
        state.queue.retain(|r| !ids.contains(&r.id));

        if let Err(e) = self.cell.persist(&state).await {
            state.queue = previous;
            return Err(e);
        }

        debug!(removed = ids.len(), remaining = state.queue.len(), "Synced records removed");
        Ok(())
    }

    /// Removes a single record by id, regardless of sync state. The escape
    /// hatch for permanently rejected mutations the caller decides to drop.
    /// Returns false when no record carried the id.
    pub(crate) async fn remove(&self, id: MutationId) -> SyncResult<bool> {
        let mut state = self.cell.lock().await;
        let previous = state.queue.clone();
        state.queue.retain(|r| r.id != id);

        if state.queue.len() == previous.len() {
            return Ok(false);
        }

        if let Err(e) = self.cell.persist(&state).await {
            state.queue = previous;
            return Err(e);
        }

        info!(%id, "Mutation dropped by caller");
        Ok(true)
    }

    /// Drops all records (full local reset, e.g. on sign-out).
    pub async fn clear(&self) -> SyncResult<()> {
        let mut state = self.cell.lock().await;
        let previous = std::mem::take(&mut state.queue);

        if let Err(e) = self.cell.persist(&state).await {
            state.queue = previous;
            return Err(e);
        }

        info!("Mutation queue cleared");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{MemoryPersistence, Persistence};
    use serde_json::json;

    async fn queue_with(persistence: MemoryPersistence) -> MutationQueue {
        let cell = StateCell::open(Arc::new(persistence)).await.unwrap();
        MutationQueue::new(cell)
    }

    #[tokio::test]
    async fn test_enqueue_persists_before_returning() {
        let persistence = MemoryPersistence::new();
        let queue = queue_with(persistence.clone()).await;

        queue
            .enqueue(MutationAction::Create, "orders", "order-1", json!({ "total": 450 }))
            .await
            .unwrap();

        let stored = persistence.stored().unwrap();
        assert_eq!(stored.queue.len(), 1);
        assert_eq!(stored.queue[0].entity_id, "order-1");
    }

    #[tokio::test]
    async fn test_enqueue_updates_local_snapshot() {
        let persistence = MemoryPersistence::new();
        let queue = queue_with(persistence.clone()).await;

        queue
            .enqueue(MutationAction::Create, "orders", "order-1", json!({ "total": 450 }))
            .await
            .unwrap();
        queue
            .enqueue(MutationAction::Update, "orders", "order-1", json!({ "status": "paid" }))
            .await
            .unwrap();

        let stored = persistence.stored().unwrap();
        assert_eq!(stored.snapshot.len(), 1);
        assert_eq!(
            stored.snapshot[0].fields,
            json!({ "total": 450, "status": "paid" })
        );
    }

    #[tokio::test]
    async fn test_delete_removes_snapshot_row() {
        let persistence = MemoryPersistence::new();
        let queue = queue_with(persistence.clone()).await;

        queue
            .enqueue(MutationAction::Create, "orders", "order-1", json!({ "total": 450 }))
            .await
            .unwrap();
        queue
            .enqueue(MutationAction::Delete, "orders", "order-1", json!(null))
            .await
            .unwrap();

        let stored = persistence.stored().unwrap();
        assert!(stored.snapshot.is_empty());
        assert_eq!(stored.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back() {
        let persistence = MemoryPersistence::new();
        let queue = queue_with(persistence.clone()).await;

        persistence.set_fail_saves(true);
        let err = queue
            .enqueue(MutationAction::Create, "orders", "order-1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Persistence(_)));

        // Not considered queued.
        assert_eq!(queue.pending_count().await, 0);
        let snapshot = queue.snapshot().await;
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_durability_across_restart() {
        let persistence = MemoryPersistence::new();

        let ids = {
            let queue = queue_with(persistence.clone()).await;
            let mut ids = Vec::new();
            for n in 0..5 {
                let id = queue
                    .enqueue(
                        MutationAction::Update,
                        "orders",
                        format!("order-{n}"),
                        json!({ "n": n }),
                    )
                    .await
                    .unwrap();
                ids.push(id);
            }
            ids
        };

        // Reload from persistence only.
        let queue = queue_with(persistence).await;
        let restored = queue.snapshot().await;
        assert_eq!(restored.len(), 5);
        let restored_ids: Vec<_> = restored.iter().map(|r| r.id).collect();
        assert_eq!(restored_ids, ids);
    }

    #[tokio::test]
    async fn test_remove_synced_drops_only_given_ids() {
        let persistence = MemoryPersistence::new();
        let queue = queue_with(persistence).await;

        let first = queue
            .enqueue(MutationAction::Create, "orders", "a", json!({}))
            .await
            .unwrap();
        let second = queue
            .enqueue(MutationAction::Create, "orders", "b", json!({}))
            .await
            .unwrap();

        let mut synced = HashSet::new();
        synced.insert(first);
        queue.remove_synced(&synced).await.unwrap();

        let remaining = queue.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second);
    }

    #[tokio::test]
    async fn test_clear_empties_queue() {
        let persistence = MemoryPersistence::new();
        let queue = queue_with(persistence.clone()).await;

        queue
            .enqueue(MutationAction::Create, "orders", "a", json!({}))
            .await
            .unwrap();
        queue.clear().await.unwrap();

        assert_eq!(queue.pending_count().await, 0);
        assert!(persistence.load().await.unwrap().unwrap().queue.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_id_is_noop() {
        let persistence = MemoryPersistence::new();
        let queue = queue_with(persistence).await;

        queue
            .enqueue(MutationAction::Create, "orders", "a", json!({}))
            .await
            .unwrap();
        let removed = queue.remove(MutationId::new()).await.unwrap();
        assert!(!removed);
        assert_eq!(queue.pending_count().await, 1);
    }
}
