//! # In-Memory Persistence
//!
//! Keeps state in process memory. Durable only for the lifetime of the
//! process, which is exactly what tests and host-application fakes need:
//! cloning the adapter shares the underlying state, so a "restarted" engine
//! built over the same clone sees what the previous one saved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};
use crate::persist::{PersistedState, Persistence};

/// In-memory persistence adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    state: Arc<Mutex<Option<PersistedState>>>,
    fail_saves: Arc<AtomicBool>,
}

impl MemoryPersistence {
    /// Creates an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save` fail, for exercising rollback paths.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Returns a copy of what is currently "on disk".
    pub fn stored(&self) -> Option<PersistedState> {
        self.state.lock().expect("memory persistence poisoned").clone()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load(&self) -> SyncResult<Option<PersistedState>> {
        Ok(self.state.lock().expect("memory persistence poisoned").clone())
    }

    async fn save(&self, state: &PersistedState) -> SyncResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence("simulated save failure".into()));
        }

        *self.state.lock().expect("memory persistence poisoned") = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let persistence = MemoryPersistence::new();
        assert!(persistence.load().await.unwrap().is_none());

        persistence.save(&PersistedState::default()).await.unwrap();
        assert!(persistence.load().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let persistence = MemoryPersistence::new();
        let other = persistence.clone();

        persistence.save(&PersistedState::default()).await.unwrap();
        assert!(other.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_simulated_save_failure() {
        let persistence = MemoryPersistence::new();
        persistence.set_fail_saves(true);

        let err = persistence.save(&PersistedState::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));
        assert!(persistence.stored().is_none());
    }
}
