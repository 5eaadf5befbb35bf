//! # Core Error Types
//!
//! Validation errors for the pure data model. Infrastructure errors
//! (persistence, remote, channels) live in `kirana-sync`.

use thiserror::Error;

/// Errors produced while constructing or validating core records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A mutation must target a named collection.
    #[error("Mutation collection must not be empty")]
    EmptyCollection,

    /// A mutation must target a specific entity.
    #[error("Mutation entity id must not be empty")]
    EmptyEntityId,

    /// Exported state carries a format version this build does not understand.
    #[error("Unsupported export format version: {0}")]
    UnsupportedExportVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnsupportedExportVersion(9);
        assert!(err.to_string().contains('9'));
    }
}
