//! # Domain Types
//!
//! Core data model for the offline-first sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Sync Data Model                          │
//! │                                                                 │
//! │  ┌──────────────────┐  ┌───────────────┐  ┌─────────────────┐  │
//! │  │  MutationRecord  │  │   EntityKey   │  │   LocalEntity   │  │
//! │  │  ──────────────  │  │  ───────────  │  │  ─────────────  │  │
//! │  │  id (UUID)       │  │  collection   │  │  key            │  │
//! │  │  action          │  │  entity_id    │  │  fields (JSON)  │  │
//! │  │  collection      │  └───────────────┘  │  last_updated_at│  │
//! │  │  entity_id       │                     │  last_fetched_at│  │
//! │  │  payload (JSON)  │                     └─────────────────┘  │
//! │  │  enqueued_at     │                                          │
//! │  └──────────────────┘                                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are opaque JSON: invoice math, stock units, and other domain
//! semantics belong to the hosting application, never to this engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

// =============================================================================
// Mutation Id
// =============================================================================

/// Unique identifier for a queued mutation.
///
/// Generated at enqueue time with UUID v4 (no coordination required, safe to
/// mint offline). This id doubles as the idempotency key the remote store
/// must honor: re-applying the same id must have no observable side effect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Mints a fresh id.
    pub fn new() -> Self {
        MutationId(Uuid::new_v4())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        MutationId::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Mutation Action
// =============================================================================

/// The kind of change a mutation applies to its target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    /// Entity is created with the payload fields.
    Create,
    /// Payload fields are laid over the entity's existing fields.
    Update,
    /// Entity is removed; payload is ignored.
    Delete,
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationAction::Create => write!(f, "create"),
            MutationAction::Update => write!(f, "update"),
            MutationAction::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Entity Key
// =============================================================================

/// Identifies one logical entity: a collection name plus the entity's id
/// within that collection. Exactly one [`LocalEntity`] exists per key.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntityKey {
    /// Name of the logical entity set ("orders", "products", ...).
    pub collection: String,

    /// Id of the entity within the collection.
    pub entity_id: String,
}

impl EntityKey {
    /// Creates a new entity key.
    pub fn new(collection: impl Into<String>, entity_id: impl Into<String>) -> Self {
        EntityKey {
            collection: collection.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.entity_id)
    }
}

// =============================================================================
// Mutation Record
// =============================================================================

/// A single pending local change, queued until confirmed applied remotely.
///
/// Records are created by callers, mutated only by the sync engine (retry
/// bookkeeping, the transient `synced` marker) and removed from the queue on
/// confirmed remote application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Unique id, also the remote idempotency key.
    pub id: MutationId,

    /// What the mutation does to its entity.
    pub action: MutationAction,

    /// Target collection.
    pub collection: String,

    /// Target entity id within the collection.
    pub entity_id: String,

    /// Opaque entity fields or delta.
    pub payload: Value,

    /// When the mutation was enqueued; diagnostics and ordering.
    pub enqueued_at: DateTime<Utc>,

    /// Number of remote-apply attempts so far.
    pub attempts: i64,

    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,

    /// Transient marker set during a drain pass once the remote confirmed
    /// the mutation. Records with `synced = true` are removed from the queue
    /// at the end of the pass; the flag never survives long-term.
    #[serde(default)]
    pub synced: bool,
}

impl MutationRecord {
    /// Creates a new record, validating the target.
    pub fn new(
        action: MutationAction,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
        enqueued_at: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let collection = collection.into();
        let entity_id = entity_id.into();

        if collection.trim().is_empty() {
            return Err(CoreError::EmptyCollection);
        }
        if entity_id.trim().is_empty() {
            return Err(CoreError::EmptyEntityId);
        }

        Ok(MutationRecord {
            id: MutationId::new(),
            action,
            collection,
            entity_id,
            payload,
            enqueued_at,
            attempts: 0,
            last_error: None,
            synced: false,
        })
    }

    /// The key of the entity this mutation targets.
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.collection.clone(), self.entity_id.clone())
    }
}

// =============================================================================
// Local Entity
// =============================================================================

/// Last known state of one entity in the local snapshot store.
///
/// Rows are created on first observation (local mutation or remote fetch) and
/// updated on every subsequent write. They are never implicitly deleted; only
/// an explicit delete mutation or a full clear removes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    /// Collection + entity id.
    pub key: EntityKey,

    /// Opaque entity fields.
    pub fields: Value,

    /// Set on every local or remote-applied write. Last write wins for the
    /// snapshot value, except where the conflict resolver overrides.
    pub last_updated_at: DateTime<Utc>,

    /// When the entity was last observed from the remote store. `None` until
    /// the first remote fetch or confirmed remote application.
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl LocalEntity {
    /// Creates a snapshot row from a local observation.
    pub fn from_local(key: EntityKey, fields: Value, at: DateTime<Utc>) -> Self {
        LocalEntity {
            key,
            fields,
            last_updated_at: at,
            last_fetched_at: None,
        }
    }

    /// Creates a snapshot row from a remote observation.
    pub fn from_remote(
        key: EntityKey,
        fields: Value,
        updated_at: DateTime<Utc>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        LocalEntity {
            key,
            fields,
            last_updated_at: updated_at,
            last_fetched_at: Some(fetched_at),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutation_ids_are_unique() {
        let a = MutationId::new();
        let b = MutationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_rejects_empty_collection() {
        let err = MutationRecord::new(
            MutationAction::Create,
            "",
            "order-1",
            json!({}),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, CoreError::EmptyCollection);
    }

    #[test]
    fn test_record_rejects_empty_entity_id() {
        let err = MutationRecord::new(
            MutationAction::Update,
            "orders",
            "  ",
            json!({}),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, CoreError::EmptyEntityId);
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let record = MutationRecord::new(
            MutationAction::Create,
            "orders",
            "order-1",
            json!({ "total": 450, "currency": "INR" }),
            Utc::now(),
        )
        .unwrap();

        let raw = serde_json::to_string(&record).unwrap();
        let back: MutationRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_entity_key_display() {
        let key = EntityKey::new("orders", "order-1");
        assert_eq!(key.to_string(), "orders/order-1");
    }

    #[test]
    fn test_action_display() {
        assert_eq!(MutationAction::Delete.to_string(), "delete");
    }
}
