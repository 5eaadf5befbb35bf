//! # JSON File Persistence
//!
//! Stores the full engine state as one JSON document. Writes go to a
//! sibling temp file first and are renamed into place; rename is atomic on
//! the platforms we target, so a crash mid-save leaves either the old state
//! or the new state, never a torn file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::persist::{PersistedState, Persistence};

/// File-backed persistence adapter.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    /// Path of the state file.
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Creates an adapter writing to `path`. The file is created on the
    /// first save; parent directories must already exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFilePersistence { path: path.into() }
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn load(&self) -> SyncResult<Option<PersistedState>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted state file");
                return Ok(None);
            }
            Err(e) => return Err(SyncError::Persistence(e.to_string())),
        };

        match serde_json::from_slice::<PersistedState>(&raw) {
            Ok(state) => {
                debug!(
                    path = %self.path.display(),
                    queued = state.queue.len(),
                    entities = state.snapshot.len(),
                    "Loaded persisted state"
                );
                Ok(Some(state))
            }
            Err(e) => {
                // Corrupt state is treated as absent so the application
                // stays usable; the next save overwrites it.
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Persisted state is malformed, starting empty"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, state: &PersistedState) -> SyncResult<()> {
        let raw = serde_json::to_vec_pretty(state)
            .map_err(|e| SyncError::Persistence(e.to_string()))?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &raw)
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| SyncError::Persistence(e.to_string()))?;

        debug!(
            path = %self.path.display(),
            queued = state.queue.len(),
            "Saved persisted state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kirana_core::{MutationAction, MutationRecord};
    use serde_json::json;

    fn sample_state() -> PersistedState {
        let record = MutationRecord::new(
            MutationAction::Create,
            "orders",
            "order-1",
            json!({ "total": 450 }),
            Utc::now(),
        )
        .unwrap();

        PersistedState {
            queue: vec![record],
            snapshot: vec![],
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state.json"));
        assert!(persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state.json"));

        let state = sample_state();
        persistence.save(&state).await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = JsonFilePersistence::new(dir.path().join("state.json"));

        persistence.save(&sample_state()).await.unwrap();
        persistence.save(&PersistedState::default()).await.unwrap();

        let loaded = persistence.load().await.unwrap().unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let persistence = JsonFilePersistence::new(&path);
        assert!(persistence.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = JsonFilePersistence::new(&path);

        persistence.save(&sample_state()).await.unwrap();
        assert!(!persistence.temp_path().exists());
        assert!(path.exists());
    }
}
