//! # SQLite Persistence
//!
//! Stores the queue and snapshot in two tables, replaced inside a single
//! transaction per save. The transaction gives the all-or-nothing guarantee;
//! a crash mid-save rolls back to the previous state.
//!
//! ## Schema
//! ```text
//! mutation_queue  (position INTEGER PK, id TEXT, record TEXT)
//! entity_snapshot (collection TEXT, entity_id TEXT, entity TEXT,
//!                  PRIMARY KEY (collection, entity_id))
//! ```
//!
//! Rows hold the serde_json serialization of the full record/entity; the
//! relational columns exist only for ordering and keyed lookups by hand
//! during diagnostics.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, warn};

use kirana_core::{LocalEntity, MutationRecord};

use crate::error::{SyncError, SyncResult};
use crate::persist::{PersistedState, Persistence};

/// SQLite-backed persistence adapter.
#[derive(Debug, Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists. Use `sqlite::memory:` for an in-memory database.
    pub async fn connect(url: &str) -> SyncResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SyncError::Persistence(e.to_string()))?
            .create_if_missing(true);

        // A single connection keeps in-memory databases alive and gives the
        // save transaction exclusive access.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let persistence = SqlitePersistence { pool };
        persistence.migrate().await?;
        Ok(persistence)
    }

    /// Wraps an existing pool (the hosting app may share one).
    pub async fn with_pool(pool: SqlitePool) -> SyncResult<Self> {
        let persistence = SqlitePersistence { pool };
        persistence.migrate().await?;
        Ok(persistence)
    }

    async fn migrate(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mutation_queue (
                position INTEGER PRIMARY KEY,
                id       TEXT NOT NULL,
                record   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_snapshot (
                collection TEXT NOT NULL,
                entity_id  TEXT NOT NULL,
                entity     TEXT NOT NULL,
                PRIMARY KEY (collection, entity_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn load(&self) -> SyncResult<Option<PersistedState>> {
        let queue_rows = sqlx::query("SELECT record FROM mutation_queue ORDER BY position")
            .fetch_all(&self.pool)
            .await?;
        let snapshot_rows = sqlx::query("SELECT entity FROM entity_snapshot")
            .fetch_all(&self.pool)
            .await?;

        if queue_rows.is_empty() && snapshot_rows.is_empty() {
            return Ok(None);
        }

        let mut state = PersistedState::default();

        for row in &queue_rows {
            let raw: String = row.get("record");
            match serde_json::from_str::<MutationRecord>(&raw) {
                Ok(record) => state.queue.push(record),
                Err(e) => {
                    // Same policy as the file adapter: malformed state is
                    // treated as absent rather than wedging the application.
                    warn!(error = %e, "Malformed queue row, starting empty");
                    return Ok(None);
                }
            }
        }

        for row in &snapshot_rows {
            let raw: String = row.get("entity");
            match serde_json::from_str::<LocalEntity>(&raw) {
                Ok(entity) => state.snapshot.push(entity),
                Err(e) => {
                    warn!(error = %e, "Malformed snapshot row, starting empty");
                    return Ok(None);
                }
            }
        }

        debug!(
            queued = state.queue.len(),
            entities = state.snapshot.len(),
            "Loaded persisted state from SQLite"
        );
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> SyncResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mutation_queue")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entity_snapshot")
            .execute(&mut *tx)
            .await?;

        for (position, record) in state.queue.iter().enumerate() {
            let raw = serde_json::to_string(record)
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
            sqlx::query("INSERT INTO mutation_queue (position, id, record) VALUES (?1, ?2, ?3)")
                .bind(position as i64)
                .bind(record.id.to_string())
                .bind(raw)
                .execute(&mut *tx)
                .await?;
        }

        for entity in &state.snapshot {
            let raw = serde_json::to_string(entity)
                .map_err(|e| SyncError::Persistence(e.to_string()))?;
            sqlx::query(
                "INSERT INTO entity_snapshot (collection, entity_id, entity) VALUES (?1, ?2, ?3)",
            )
            .bind(&entity.key.collection)
            .bind(&entity.key.entity_id)
            .bind(raw)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(queued = state.queue.len(), "Saved persisted state to SQLite");
        Ok(())
    }
}
