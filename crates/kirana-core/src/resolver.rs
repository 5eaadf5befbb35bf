//! # Conflict Resolver
//!
//! Pure decision component: given the local and remote versions of one
//! entity, decide which wins or how to merge. The resolver never mutates
//! state; the sync engine applies whatever decision it returns.
//!
//! ## Conflict Rule
//! A conflict exists only when BOTH hold:
//! 1. The local entity was updated after the client last fetched it from the
//!    remote (never-fetched counts as "after").
//! 2. The serialized field content differs from the remote's. A newer local
//!    timestamp with identical content is not a conflict.
//!
//! ## Strategies
//! - `LocalWins` (default): keep the local fields; the engine re-queues them
//!   for re-application.
//! - `RemoteWins`: adopt the remote fields, dropping local pending changes
//!   for that entity.
//! - `Merge`: field-wise union, local fields take precedence on key
//!   collision; the resolution records a merge timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EntityKey, LocalEntity};

// =============================================================================
// Resolution Strategy
// =============================================================================

/// How a divergence between local and remote state is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Local fields win; the local value is re-queued for re-application.
    LocalWins,
    /// Remote fields win; local pending changes for the entity are dropped.
    RemoteWins,
    /// Field-wise union with local precedence on key collision.
    Merge,
}

impl Default for ResolutionStrategy {
    fn default() -> Self {
        ResolutionStrategy::LocalWins
    }
}

// =============================================================================
// Sync Conflict
// =============================================================================

/// An ephemeral decision record for one divergence.
///
/// Conflicts are never persisted; they exist only while the engine applies
/// the resolution to the snapshot store.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict {
    /// The diverged entity.
    pub key: EntityKey,

    /// The local version at resolution time.
    pub local: LocalEntity,

    /// The remote version at resolution time.
    pub remote: LocalEntity,

    /// The strategy that produced this decision.
    pub resolution: ResolutionStrategy,

    /// The fields the snapshot store should hold after applying the decision.
    pub resolved_fields: Value,

    /// When the decision was made (the merge timestamp for `Merge`).
    pub resolved_at: DateTime<Utc>,
}

// =============================================================================
// Detection
// =============================================================================

/// Returns true when `local` and `remote` are in conflict.
///
/// See the module docs for the exact rule. Entities that merely lag behind
/// the remote (no local edit since the last fetch) are not conflicts; the
/// engine adopts the remote value without consulting a strategy.
pub fn is_conflict(local: &LocalEntity, remote: &LocalEntity) -> bool {
    let edited_since_fetch = match local.last_fetched_at {
        Some(fetched) => local.last_updated_at > fetched,
        None => true,
    };

    edited_since_fetch && local.fields != remote.fields
}

// =============================================================================
// Resolution
// =============================================================================

/// Decides the outcome of one conflict.
///
/// Pure: the caller supplies `at` so the same inputs always yield the same
/// decision. The returned conflict carries the winning fields; applying them
/// is the engine's job.
pub fn resolve(
    local: &LocalEntity,
    remote: &LocalEntity,
    strategy: ResolutionStrategy,
    at: DateTime<Utc>,
) -> SyncConflict {
    let resolved_fields = match strategy {
        ResolutionStrategy::LocalWins => local.fields.clone(),
        ResolutionStrategy::RemoteWins => remote.fields.clone(),
        ResolutionStrategy::Merge => merge_fields(&local.fields, &remote.fields),
    };

    SyncConflict {
        key: local.key.clone(),
        local: local.clone(),
        remote: remote.clone(),
        resolution: strategy,
        resolved_fields,
        resolved_at: at,
    }
}

/// Field-wise union of two JSON objects, local precedence on key collision.
///
/// Non-object payloads cannot be merged field-wise; the local value wins
/// outright, which matches the `LocalWins` bias of the system.
pub fn merge_fields(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(local_map), Value::Object(remote_map)) => {
            let mut merged = remote_map.clone();
            for (k, v) in local_map {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => local.clone(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entity(fields: Value, updated: DateTime<Utc>, fetched: Option<DateTime<Utc>>) -> LocalEntity {
        LocalEntity {
            key: EntityKey::new("orders", "order-1"),
            fields,
            last_updated_at: updated,
            last_fetched_at: fetched,
        }
    }

    #[test]
    fn test_conflict_requires_differing_content() {
        let now = Utc::now();
        let fetched = now - Duration::seconds(60);

        // Newer local timestamp, identical content: not a conflict.
        let local = entity(json!({ "qty": 2 }), now, Some(fetched));
        let remote = entity(json!({ "qty": 2 }), now, None);
        assert!(!is_conflict(&local, &remote));

        // Newer local timestamp, differing content: conflict.
        let local = entity(json!({ "qty": 3 }), now, Some(fetched));
        assert!(is_conflict(&local, &remote));
    }

    #[test]
    fn test_stale_local_is_not_a_conflict() {
        let now = Utc::now();

        // Local was fetched after its last edit: remote is simply newer.
        let local = entity(
            json!({ "qty": 1 }),
            now - Duration::seconds(120),
            Some(now - Duration::seconds(30)),
        );
        let remote = entity(json!({ "qty": 5 }), now, None);
        assert!(!is_conflict(&local, &remote));
    }

    #[test]
    fn test_never_fetched_local_edit_conflicts() {
        let now = Utc::now();
        let local = entity(json!({ "qty": 3 }), now, None);
        let remote = entity(json!({ "qty": 5 }), now, None);
        assert!(is_conflict(&local, &remote));
    }

    #[test]
    fn test_local_wins_keeps_local_fields() {
        let now = Utc::now();
        let local = entity(json!({ "qty": 3 }), now, None);
        let remote = entity(json!({ "qty": 5 }), now, None);

        let decision = resolve(&local, &remote, ResolutionStrategy::LocalWins, now);
        assert_eq!(decision.resolved_fields, json!({ "qty": 3 }));
        assert_eq!(decision.resolution, ResolutionStrategy::LocalWins);
    }

    #[test]
    fn test_remote_wins_adopts_remote_fields() {
        let now = Utc::now();
        let local = entity(json!({ "qty": 3 }), now, None);
        let remote = entity(json!({ "qty": 5 }), now, None);

        let decision = resolve(&local, &remote, ResolutionStrategy::RemoteWins, now);
        assert_eq!(decision.resolved_fields, json!({ "qty": 5 }));
    }

    #[test]
    fn test_merge_prefers_local_on_collision() {
        let now = Utc::now();
        let local = entity(json!({ "qty": 3, "note": "rush" }), now, None);
        let remote = entity(json!({ "qty": 5, "status": "packed" }), now, None);

        let decision = resolve(&local, &remote, ResolutionStrategy::Merge, now);
        assert_eq!(
            decision.resolved_fields,
            json!({ "qty": 3, "note": "rush", "status": "packed" })
        );
        assert_eq!(decision.resolved_at, now);
    }

    #[test]
    fn test_merge_of_non_objects_keeps_local() {
        let merged = merge_fields(&json!("local"), &json!({ "a": 1 }));
        assert_eq!(merged, json!("local"));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let now = Utc::now();
        let local = entity(json!({ "qty": 3 }), now, None);
        let remote = entity(json!({ "qty": 5 }), now, None);

        let a = resolve(&local, &remote, ResolutionStrategy::Merge, now);
        let b = resolve(&local, &remote, ResolutionStrategy::Merge, now);
        assert_eq!(a, b);
    }
}
