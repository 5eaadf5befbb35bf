//! # Local Snapshot Store
//!
//! Durable, keyed mapping from (collection, entity id) to the last known
//! entity state and its last-modified timestamp. Reads are public; writes
//! are crate-internal because the snapshot is owned by the engine's
//! persistence boundary (enqueue, drain, and reconciliation are the only
//! writers).

use std::sync::Arc;

use tracing::{debug, info};

use kirana_core::{EntityKey, LocalEntity};

use crate::error::SyncResult;
use crate::state::StateCell;

/// Facade over the shared state cell exposing the snapshot contract.
#[derive(Clone)]
pub struct SnapshotStore {
    cell: Arc<StateCell>,
}

impl SnapshotStore {
    pub(crate) fn new(cell: Arc<StateCell>) -> Self {
        SnapshotStore { cell }
    }

    /// Last known state of one entity, if ever observed.
    pub async fn get(&self, key: &EntityKey) -> Option<LocalEntity> {
        self.cell.lock().await.snapshot.get(key).cloned()
    }

    /// Keys of every entity the store has observed.
    pub async fn keys(&self) -> Vec<EntityKey> {
        let state = self.cell.lock().await;
        let mut keys: Vec<EntityKey> = state.snapshot.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entities in the snapshot.
    pub async fn len(&self) -> usize {
        self.cell.lock().await.snapshot.len()
    }

    /// True when no entity has been observed yet.
    pub async fn is_empty(&self) -> bool {
        self.cell.lock().await.snapshot.is_empty()
    }

    /// Inserts or replaces an entity row and persists.
    pub(crate) async fn upsert(&self, entity: LocalEntity) -> SyncResult<()> {
        let key = entity.key.clone();
        let mut state = self.cell.lock().await;
        let previous = state.snapshot.insert(key.clone(), entity);

        if let Err(e) = self.cell.persist(&state).await {
            match previous {
                Some(entity) => {
                    state.snapshot.insert(key, entity);
                }
                None => {
                    state.snapshot.remove(&key);
                }
            }
            return Err(e);
        }

        debug!(entity = %key, "Snapshot row updated");
        Ok(())
    }

    /// Removes an entity row (explicit delete) and persists.
    pub(crate) async fn remove(&self, key: &EntityKey) -> SyncResult<()> {
        let mut state = self.cell.lock().await;
        let previous = state.snapshot.remove(key);

        if previous.is_none() {
            return Ok(());
        }

        if let Err(e) = self.cell.persist(&state).await {
            if let Some(entity) = previous {
                state.snapshot.insert(key.clone(), entity);
            }
            return Err(e);
        }

        debug!(entity = %key, "Snapshot row removed");
        Ok(())
    }

    /// Drops every entity row (full local reset).
    pub async fn clear(&self) -> SyncResult<()> {
        let mut state = self.cell.lock().await;
        let previous = std::mem::take(&mut state.snapshot);

        if let Err(e) = self.cell.persist(&state).await {
            state.snapshot = previous;
            return Err(e);
        }

        info!("Snapshot store cleared");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryPersistence;
    use chrono::Utc;
    use serde_json::json;

    async fn store() -> (SnapshotStore, MemoryPersistence) {
        let persistence = MemoryPersistence::new();
        let cell = StateCell::open(Arc::new(persistence.clone())).await.unwrap();
        (SnapshotStore::new(cell), persistence)
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let (store, _) = store().await;
        let key = EntityKey::new("orders", "order-1");
        let entity = LocalEntity::from_local(key.clone(), json!({ "total": 450 }), Utc::now());

        store.upsert(entity.clone()).await.unwrap();
        assert_eq!(store.get(&key).await, Some(entity));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_one_row_per_key() {
        let (store, _) = store().await;
        let key = EntityKey::new("orders", "order-1");

        store
            .upsert(LocalEntity::from_local(key.clone(), json!({ "v": 1 }), Utc::now()))
            .await
            .unwrap();
        store
            .upsert(LocalEntity::from_local(key.clone(), json!({ "v": 2 }), Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&key).await.unwrap().fields, json!({ "v": 2 }));
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let (store, persistence) = store().await;
        let key = EntityKey::new("orders", "order-1");

        store
            .upsert(LocalEntity::from_local(key.clone(), json!({}), Utc::now()))
            .await
            .unwrap();
        store.remove(&key).await.unwrap();

        assert!(store.is_empty().await);
        assert!(persistence.stored().unwrap().snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back_upsert() {
        let (store, persistence) = store().await;
        let key = EntityKey::new("orders", "order-1");

        persistence.set_fail_saves(true);
        let err = store
            .upsert(LocalEntity::from_local(key.clone(), json!({}), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::SyncError::Persistence(_)));
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_keys_are_sorted() {
        let (store, _) = store().await;
        for id in ["b", "a", "c"] {
            store
                .upsert(LocalEntity::from_local(
                    EntityKey::new("orders", id),
                    json!({}),
                    Utc::now(),
                ))
                .await
                .unwrap();
        }

        let keys = store.keys().await;
        let ids: Vec<&str> = keys.iter().map(|k| k.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
