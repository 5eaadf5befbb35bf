//! # State Export/Import
//!
//! Serialized queue dumps for diagnostics and device migration. Import
//! fully replaces the in-memory queue - it is a restore, not a merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use kirana_core::{CoreError, MutationRecord};

use crate::error::{SyncError, SyncResult};

/// Current export format version.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// A portable dump of the mutation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedState {
    /// Format version, checked on import.
    pub version: u32,

    /// When the export was taken.
    pub exported_at: DateTime<Utc>,

    /// The queue records in enqueue order.
    pub records: Vec<MutationRecord>,
}

impl ExportedState {
    /// Wraps the given records in the current format.
    pub fn new(records: Vec<MutationRecord>, exported_at: DateTime<Utc>) -> Self {
        ExportedState {
            version: EXPORT_FORMAT_VERSION,
            exported_at,
            records,
        }
    }

    /// Serializes to the portable JSON form.
    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a previously exported dump. Malformed input and unknown
    /// versions surface as errors - unlike persisted state, an explicit
    /// import never silently falls back to empty.
    pub fn from_json(raw: &str) -> SyncResult<Self> {
        let exported: ExportedState = serde_json::from_str(raw).map_err(|e| {
            warn!(error = %e, "Rejected malformed import");
            SyncError::Parse(e.to_string())
        })?;

        if exported.version != EXPORT_FORMAT_VERSION {
            return Err(SyncError::InvalidRecord(CoreError::UnsupportedExportVersion(
                exported.version,
            )));
        }

        Ok(exported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kirana_core::MutationAction;
    use serde_json::json;

    fn records() -> Vec<MutationRecord> {
        vec![
            MutationRecord::new(
                MutationAction::Create,
                "orders",
                "order-1",
                json!({ "total": 450 }),
                Utc::now(),
            )
            .unwrap(),
            MutationRecord::new(
                MutationAction::Delete,
                "orders",
                "order-2",
                json!(null),
                Utc::now(),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_round_trip_is_identical() {
        let exported = ExportedState::new(records(), Utc::now());
        let raw = exported.to_json().unwrap();
        let back = ExportedState::from_json(&raw).unwrap();
        assert_eq!(back, exported);
    }

    #[test]
    fn test_malformed_input_is_a_parse_error() {
        let err = ExportedState::from_json("{ nope").unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut exported = ExportedState::new(vec![], Utc::now());
        exported.version = 99;
        let raw = serde_json::to_string(&exported).unwrap();

        let err = ExportedState::from_json(&raw).unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidRecord(CoreError::UnsupportedExportVersion(99))
        ));
    }
}
