//! # kirana-sync: Offline-First Sync Engine
//!
//! This crate provides the synchronization layer for Kirana Sync: a durable
//! mutation queue, a local snapshot store, a connectivity monitor, and the
//! engine that drains local mutations to a remote store and reconciles
//! divergent state when connectivity returns.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                                 │
//! │                                                                     │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌───────────────────┐  │
//! │  │  MutationQueue   │  │  SnapshotStore   │  │ ConnectivityMon.  │  │
//! │  │                  │  │                  │  │                   │  │
//! │  │ Durable ordered  │  │ Last known state │  │ Edge-triggered    │  │
//! │  │ outbox; enqueue  │  │ per entity; what │  │ online/offline    │  │
//! │  │ persists before  │  │ the UI reads     │  │ events from raw   │  │
//! │  │ returning        │  │ while offline    │  │ reachability      │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  └─────────┬─────────┘  │
//! │           │                     │                      │            │
//! │           └───────────┬─────────┘                      │            │
//! │                       ▼                                ▼            │
//! │            ┌─────────────────────┐        became_online triggers    │
//! │            │ shared state cell   │        a drain pass              │
//! │            │ (one save covers    │                                  │
//! │            │  queue + snapshot)  │                                  │
//! │            └──────────┬──────────┘                                  │
//! │                       ▼                                             │
//! │             Persistence (JSON file, SQLite, in-memory)              │
//! │                                                                     │
//! │  drain pass: RemoteStore.apply per record, in enqueue order         │
//! │  reconcile:  RemoteStore.fetch + conflict resolver (kirana-core)    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - Main `SyncEngine` orchestrator (drain + reconcile)
//! - [`queue`] - Durable mutation queue (outbox)
//! - [`snapshot`] - Local entity snapshot store
//! - [`connectivity`] - Link state machine and monitor task
//! - [`remote`] - `RemoteStore` capability trait
//! - [`persist`] - Persistence trait and adapters (file, SQLite, memory)
//! - [`export`] - Portable queue dumps for diagnostics and migration
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kirana_sync::{ConnectivityMonitor, EngineConfig, SyncEngine};
//! use kirana_sync::persist::JsonFilePersistence;
//! use std::sync::Arc;
//!
//! let persistence = Arc::new(JsonFilePersistence::new("sync-state.json"));
//! let (connectivity, events) = ConnectivityMonitor::spawn(probe, signal_rx);
//!
//! let mut engine = SyncEngine::new(
//!     EngineConfig::default(),
//!     persistence,
//!     remote,
//!     connectivity,
//!     events,
//! )
//! .await?;
//! engine.start()?;
//!
//! // Works offline: persisted locally, drained when the link returns.
//! engine.queue().enqueue(action, "orders", "order-1", payload).await?;
//!
//! let report = engine.sync_now().await?;
//! println!("synced: {}", report.succeeded);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod connectivity;
pub mod engine;
pub mod error;
pub mod export;
pub mod persist;
pub mod queue;
pub mod remote;
pub mod snapshot;

mod state;

// =============================================================================
// Re-exports
// =============================================================================

pub use connectivity::{
    ConnectivityEvent, ConnectivityHandle, ConnectivityMonitor, LinkState, LinkStateMachine,
};
pub use engine::{
    EngineConfig, NoOpEmitter, SyncEngine, SyncEventEmitter, SyncReport, SyncStatus,
};
pub use error::{SyncError, SyncResult};
pub use export::{ExportedState, EXPORT_FORMAT_VERSION};
pub use persist::{
    JsonFilePersistence, MemoryPersistence, PersistedState, Persistence, SqlitePersistence,
};
pub use queue::MutationQueue;
pub use remote::{RemoteAck, RemoteError, RemoteStore};
pub use snapshot::SnapshotStore;
