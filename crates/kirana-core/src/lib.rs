//! # kirana-core: Pure Data Model for the Kirana Sync Engine
//!
//! This crate holds the pure half of the offline-first sync engine: the
//! mutation/entity data model and the conflict resolver. It performs no I/O
//! of any kind.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Hosting Application (UI, API)               │
//! └────────────────────────────┬────────────────────────────────┘
//! ┌────────────────────────────▼────────────────────────────────┐
//! │            kirana-sync (queue, engine, adapters)            │
//! └────────────────────────────┬────────────────────────────────┘
//! ┌────────────────────────────▼────────────────────────────────┐
//! │               ★ kirana-core (THIS CRATE) ★                  │
//! │                                                             │
//! │   ┌───────────────┐   ┌───────────────┐   ┌─────────────┐   │
//! │   │     types     │   │   resolver    │   │    error    │   │
//! │   │ MutationRecord│   │  is_conflict  │   │  CoreError  │   │
//! │   │  LocalEntity  │   │   resolve     │   │             │   │
//! │   └───────────────┘   └───────────────┘   └─────────────┘   │
//! │                                                             │
//! │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: the resolver is deterministic - same input, same
//!    decision. Callers supply timestamps explicitly.
//! 2. **Opaque Payloads**: entity fields are `serde_json::Value`; domain
//!    semantics never leak into the engine.
//! 3. **Explicit Errors**: all errors are typed, never strings or panics.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod resolver;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::CoreError;
pub use resolver::{is_conflict, merge_fields, resolve, ResolutionStrategy, SyncConflict};
pub use types::{EntityKey, LocalEntity, MutationAction, MutationId, MutationRecord};
