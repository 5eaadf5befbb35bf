//! # Sync Engine
//!
//! Main orchestrator. Drains the mutation queue against the remote store,
//! folds confirmed results into the local snapshot, and reconciles entities
//! whose remote state diverged while no local mutation was pending.
//!
//! ## Engine Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           SyncEngine                             │
//! │                                                                  │
//! │   enqueue ──► MutationQueue ──┐                                  │
//! │                               │ drain pass (in enqueue order)    │
//! │   BecameOnline ───────────────┼────────────► RemoteStore.apply   │
//! │   sync_now() ─────────────────┘                    │             │
//! │                                                    ▼             │
//! │              SnapshotStore ◄── confirmed results / conflicts     │
//! │                     ▲                                            │
//! │                     └── reconcile: RemoteStore.fetch + resolver  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Drain Discipline
//! - Only one drain pass runs at a time; a request arriving during an
//!   active pass coalesces into "run once more after this pass".
//! - A failure for one entity blocks only that entity's later mutations in
//!   the pass; unrelated entities continue.
//! - `BecameOffline` mid-drain lets the in-flight remote call finish, then
//!   stops the pass; already-confirmed records stay confirmed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use kirana_core::{
    is_conflict, merge_fields, resolve, EntityKey, LocalEntity, MutationAction, MutationId,
    MutationRecord, ResolutionStrategy, SyncConflict,
};

use crate::connectivity::{ConnectivityEvent, ConnectivityHandle, LinkState};
use crate::error::{SyncError, SyncResult};
use crate::export::ExportedState;
use crate::persist::Persistence;
use crate::queue::MutationQueue;
use crate::remote::{RemoteAck, RemoteError, RemoteStore};
use crate::snapshot::SnapshotStore;
use crate::state::StateCell;

// =============================================================================
// Engine Configuration
// =============================================================================

/// Constructor-injected engine options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How conflicts are settled. LocalWins matches this system's bias:
    /// the device in the shopkeeper's hand holds the truth.
    pub strategy: ResolutionStrategy,

    /// Run a drain pass from `start()` when already online.
    pub drain_on_start: bool,

    /// Run the reconciliation step (fetch + resolver) after each drain pass.
    pub reconcile_on_drain: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            strategy: ResolutionStrategy::LocalWins,
            drain_on_start: true,
            reconcile_on_drain: true,
        }
    }
}

// =============================================================================
// Sync Report
// =============================================================================

/// Aggregate outcome of one `sync_now` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Remote applications attempted this pass.
    pub attempted: usize,

    /// Mutations confirmed and removed from the queue.
    pub succeeded: usize,

    /// Mutations that failed and remain queued (transient or rejected).
    pub failed: usize,

    /// Divergences the resolver settled during reconciliation.
    pub conflicts: usize,

    /// Terminally refused mutations, tagged with their ids so the caller
    /// can drop or correct them. Never auto-retried, never auto-dropped.
    pub rejected: Vec<(MutationId, String)>,
}

// =============================================================================
// Sync Status
// =============================================================================

/// Point-in-time engine status for external queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current link state.
    pub link: LinkState,

    /// Unsynced records in the queue.
    pub pending: usize,

    /// True while a drain pass is running.
    pub draining: bool,

    /// When the last drain pass completed successfully.
    pub last_sync: Option<DateTime<Utc>>,

    /// Most recent sync error, cleared by a fully clean pass.
    pub last_error: Option<String>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Observer hooks for the layers above (status bar, toasts, telemetry).
pub trait SyncEventEmitter: Send + Sync {
    /// Engine status changed.
    fn emit_status(&self, status: &SyncStatus);

    /// A drain pass finished; `pending` records remain, `synced` succeeded.
    fn emit_progress(&self, pending: usize, synced: usize);

    /// A sync failure worth surfacing.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for hosts that poll `status()` instead.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: usize, _synced: usize) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Engine Internals
// =============================================================================

struct EngineInner {
    config: EngineConfig,
    cell: Arc<StateCell>,
    queue: MutationQueue,
    snapshots: SnapshotStore,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityHandle,
    emitter: Arc<dyn SyncEventEmitter>,

    /// Serializes drain passes.
    drain_lock: Mutex<()>,

    /// Set by every sync request; cleared when a pass picks it up. Requests
    /// landing during an active pass coalesce into one follow-up pass.
    rerun: AtomicBool,

    /// True while a drain pass runs.
    draining: AtomicBool,

    last_sync: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// The offline-first sync engine.
///
/// Owns its persistence, remote store, and connectivity capabilities as
/// constructor-injected dependencies, with an explicit `start()`/`stop()`
/// lifecycle - no global state, no import-time side effects.
pub struct SyncEngine {
    inner: Arc<EngineInner>,

    /// Edge events from the connectivity monitor; consumed by `start()`.
    events: Option<mpsc::Receiver<ConnectivityEvent>>,

    /// Shutdown sender for the listener task (present while running).
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SyncEngine {
    /// Creates an engine, restoring any previously persisted state.
    pub async fn new(
        config: EngineConfig,
        persistence: Arc<dyn Persistence>,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityHandle,
        events: mpsc::Receiver<ConnectivityEvent>,
    ) -> SyncResult<Self> {
        Self::with_emitter(
            config,
            persistence,
            remote,
            connectivity,
            events,
            Arc::new(NoOpEmitter),
        )
        .await
    }

    /// Creates an engine with a custom event emitter.
    pub async fn with_emitter(
        config: EngineConfig,
        persistence: Arc<dyn Persistence>,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityHandle,
        events: mpsc::Receiver<ConnectivityEvent>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        let cell = StateCell::open(persistence).await?;

        let inner = Arc::new(EngineInner {
            config,
            queue: MutationQueue::new(cell.clone()),
            snapshots: SnapshotStore::new(cell.clone()),
            cell,
            remote,
            connectivity,
            emitter,
            drain_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            last_sync: RwLock::new(None),
            last_error: RwLock::new(None),
        });

        Ok(SyncEngine {
            inner,
            events: Some(events),
            shutdown_tx: None,
        })
    }

    /// The durable mutation queue.
    pub fn queue(&self) -> &MutationQueue {
        &self.inner.queue
    }

    /// The local snapshot store.
    pub fn snapshots(&self) -> &SnapshotStore {
        &self.inner.snapshots
    }

    /// Current engine status.
    pub async fn status(&self) -> SyncStatus {
        self.inner.status().await
    }

    /// Starts the background listener: drains on every `became_online` edge
    /// (and immediately, when configured and already online).
    ///
    /// Connectivity handling stays off the caller's thread; the listener
    /// runs on a spawned task until `stop()`.
    pub fn start(&mut self) -> SyncResult<()> {
        if self.shutdown_tx.is_some() {
            return Err(SyncError::AlreadyRunning);
        }
        let mut events = self.events.take().ok_or(SyncError::AlreadyRunning)?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let inner = self.inner.clone();

        tokio::spawn(async move {
            if inner.config.drain_on_start && inner.connectivity.is_online().await {
                if let Err(e) = inner.sync_now().await {
                    warn!(error = %e, "Initial drain failed");
                }
            }

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(ConnectivityEvent::BecameOnline) => {
                            info!("Link restored, draining queue");
                            match inner.sync_now().await {
                                Ok(report) => debug!(?report, "Drain after reconnect complete"),
                                Err(e) => {
                                    warn!(error = %e, "Drain after reconnect failed");
                                    inner.emitter.emit_error(&e.to_string(), e.is_retryable());
                                }
                            }
                        }
                        Some(ConnectivityEvent::BecameOffline) => {
                            info!("Link lost");
                            inner.emitter.emit_status(&inner.status().await);
                        }
                        None => {
                            debug!("Connectivity events closed, listener stopping");
                            break;
                        }
                    },

                    _ = shutdown_rx.recv() => {
                        info!("Sync engine listener shutting down");
                        break;
                    }
                }
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        info!("Sync engine started");
        Ok(())
    }

    /// Stops the background listener. Queued mutations stay persisted and
    /// are drained by the next engine instance (or a manual `sync_now`).
    pub async fn stop(&mut self) -> SyncResult<()> {
        let tx = self.shutdown_tx.take().ok_or(SyncError::NotRunning)?;
        let _ = tx.send(()).await;
        info!("Sync engine stopped");
        Ok(())
    }

    /// Runs one drain pass now (pull-to-refresh semantics).
    ///
    /// Returns a zero report when offline. Concurrent calls are serialized;
    /// a call landing during an active pass is coalesced into one follow-up
    /// pass and may itself return a zero report.
    pub async fn sync_now(&self) -> SyncResult<SyncReport> {
        self.inner.sync_now().await
    }

    /// Exports the queue as a portable JSON dump.
    pub async fn export_state(&self) -> SyncResult<String> {
        let records = self.inner.cell.lock().await.queue.clone();
        ExportedState::new(records, Utc::now()).to_json()
    }

    /// Replaces the queue with a previously exported dump (not a merge).
    pub async fn import_state(&self, raw: &str) -> SyncResult<()> {
        let exported = ExportedState::from_json(raw)?;

        let mut state = self.inner.cell.lock().await;
        let previous = std::mem::replace(&mut state.queue, exported.records);
        if let Err(e) = self.inner.cell.persist(&state).await {
            state.queue = previous;
            return Err(e);
        }

        info!(records = state.queue.len(), "Queue replaced from import");
        Ok(())
    }

    /// Drops one mutation by id - the caller's escape hatch for records the
    /// remote permanently rejected. Returns false for an unknown id.
    pub async fn drop_mutation(&self, id: MutationId) -> SyncResult<bool> {
        self.inner.queue.remove(id).await
    }

    /// Full local reset (sign-out): clears queue and snapshot in one save.
    pub async fn reset(&self) -> SyncResult<()> {
        let mut state = self.inner.cell.lock().await;
        let previous_queue = std::mem::take(&mut state.queue);
        let previous_snapshot = std::mem::take(&mut state.snapshot);

        if let Err(e) = self.inner.cell.persist(&state).await {
            state.queue = previous_queue;
            state.snapshot = previous_snapshot;
            return Err(e);
        }

        info!("Local sync state reset");
        Ok(())
    }
}

// =============================================================================
// Drain & Reconcile
// =============================================================================

impl EngineInner {
    async fn status(&self) -> SyncStatus {
        SyncStatus {
            link: self.connectivity.state().await,
            pending: self.cell.lock().await.queue.len(),
            draining: self.draining.load(Ordering::SeqCst),
            last_sync: *self.last_sync.read().await,
            last_error: self.last_error.read().await.clone(),
        }
    }

    async fn sync_now(&self) -> SyncResult<SyncReport> {
        if !self.connectivity.is_online().await {
            debug!("Offline, sync is a no-op");
            return Ok(SyncReport::default());
        }

        self.rerun.store(true, Ordering::SeqCst);
        let _guard = self.drain_lock.lock().await;

        let mut report = SyncReport::default();
        while self.rerun.swap(false, Ordering::SeqCst) {
            if !self.connectivity.is_online().await {
                break;
            }
            report = self.drain_once().await?;
        }
        Ok(report)
    }

    async fn drain_once(&self) -> SyncResult<SyncReport> {
        self.draining.store(true, Ordering::SeqCst);
        let result = self.drain_pass().await;
        self.draining.store(false, Ordering::SeqCst);

        match &result {
            Ok(report) => {
                *self.last_sync.write().await = Some(Utc::now());
                if report.failed == 0 {
                    *self.last_error.write().await = None;
                }

                let pending = self.cell.lock().await.queue.len();
                self.emitter.emit_progress(pending, report.succeeded);
                self.emitter.emit_status(&self.status().await);
            }
            Err(e) => {
                error!(error = %e, "Drain pass failed");
                *self.last_error.write().await = Some(e.to_string());
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }

        result
    }

    async fn drain_pass(&self) -> SyncResult<SyncReport> {
        // Ordered snapshot of the queue; mutations enqueued after this point
        // are picked up on the next pass.
        let pending: Vec<MutationRecord> = self.cell.lock().await.queue.clone();

        let mut report = SyncReport::default();
        let mut succeeded: HashSet<MutationId> = HashSet::new();
        let mut acks: Vec<(MutationRecord, RemoteAck)> = Vec::new();
        let mut failures: Vec<(MutationId, String)> = Vec::new();
        let mut blocked: HashSet<EntityKey> = HashSet::new();

        if !pending.is_empty() {
            info!(pending = pending.len(), "Drain pass starting");
        }

        for mut record in pending {
            if !self.connectivity.is_online().await {
                warn!("Link lost mid-drain, stopping this pass");
                break;
            }

            let key = record.entity_key();
            if blocked.contains(&key) {
                // Strict per-entity ordering: a mutation behind a failed one
                // for the same entity waits for the next pass.
                debug!(id = %record.id, entity = %key, "Skipped behind failed mutation");
                continue;
            }

            report.attempted += 1;
            match self.remote.apply(&record).await {
                Ok(ack) => {
                    debug!(id = %record.id, entity = %key, "Mutation applied remotely");
                    record.synced = true;
                    report.succeeded += 1;
                    succeeded.insert(record.id);
                    acks.push((record, ack));
                }
                Err(RemoteError::Transient(reason)) => {
                    warn!(id = %record.id, entity = %key, reason = %reason, "Transient remote failure");
                    let err = SyncError::RemoteTransient(reason.clone());
                    self.emitter.emit_error(&err.to_string(), err.is_retryable());
                    report.failed += 1;
                    failures.push((record.id, reason));
                    blocked.insert(key);
                }
                Err(RemoteError::Rejected(reason)) => {
                    warn!(id = %record.id, entity = %key, reason = %reason, "Remote rejected mutation");
                    let err = SyncError::RemoteRejected {
                        mutation_id: record.id,
                        reason: reason.clone(),
                    };
                    self.emitter.emit_error(&err.to_string(), err.is_retryable());
                    report.failed += 1;
                    report.rejected.push((record.id, reason.clone()));
                    failures.push((record.id, reason));
                    blocked.insert(key);
                }
            }
        }

        // First save folds acknowledged results and retry bookkeeping into
        // the state; confirmed records are then dropped via the queue. A
        // crash between the two re-applies those records next pass, which
        // the remote's per-id idempotency absorbs.
        {
            let mut state = self.cell.lock().await;
            let now = Utc::now();

            // Remember enough to roll back if the save fails; in-memory
            // state must never drift from disk.
            let previous_queue = state.queue.clone();
            let mut previous_rows: Vec<(EntityKey, Option<LocalEntity>)> =
                Vec::with_capacity(acks.len());

            for (id, reason) in &failures {
                if let Some(r) = state.queue.iter_mut().find(|r| r.id == *id) {
                    r.attempts += 1;
                    r.last_error = Some(reason.clone());
                }
            }
            for (record, ack) in &acks {
                let row_key = record.entity_key();
                previous_rows.push((row_key.clone(), state.snapshot.get(&row_key).cloned()));
                apply_ack(&mut state.snapshot, record, ack, now);
            }

            if let Err(e) = self.cell.persist(&state).await {
                state.queue = previous_queue;
                for (row_key, row) in previous_rows.into_iter().rev() {
                    match row {
                        Some(entity) => {
                            state.snapshot.insert(row_key, entity);
                        }
                        None => {
                            state.snapshot.remove(&row_key);
                        }
                    }
                }
                return Err(e);
            }
        }
        self.queue.remove_synced(&succeeded).await?;

        if self.config.reconcile_on_drain {
            report.conflicts = self.reconcile().await?;
        }

        if report != SyncReport::default() {
            info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                conflicts = report.conflicts,
                "Drain pass complete"
            );
        }
        Ok(report)
    }

    /// Compares cached snapshots against fresh remote state for entities
    /// with no pending mutation, and applies resolver decisions.
    async fn reconcile(&self) -> SyncResult<usize> {
        let (keys, pending_keys) = {
            let state = self.cell.lock().await;
            let mut keys: Vec<EntityKey> = state.snapshot.keys().cloned().collect();
            keys.sort();
            (keys, state.pending_keys())
        };

        let mut conflicts = 0usize;

        for key in keys {
            if pending_keys.contains(&key) {
                continue;
            }
            if !self.connectivity.is_online().await {
                break;
            }

            let remote_entity = match self.remote.fetch(&key).await {
                Ok(Some(entity)) => entity,
                Ok(None) => continue,
                Err(e) => {
                    warn!(entity = %key, error = %e, "Reconcile fetch failed");
                    continue;
                }
            };

            let Some(local) = self.snapshots.get(&key).await else {
                continue;
            };

            let now = Utc::now();

            if local.fields == remote_entity.fields {
                // Content agrees; just note the fresh observation.
                let refreshed = LocalEntity {
                    last_fetched_at: Some(now),
                    ..local
                };
                self.snapshots.upsert(refreshed).await?;
                continue;
            }

            if is_conflict(&local, &remote_entity) {
                let decision = resolve(&local, &remote_entity, self.config.strategy, now);
                info!(
                    entity = %key,
                    resolution = ?decision.resolution,
                    "Conflict resolved"
                );
                conflicts += 1;
                self.apply_decision(decision, now).await?;
            } else {
                // No local edit since the last fetch: the remote simply
                // moved on. Last write wins; adopt it.
                debug!(entity = %key, "Adopting newer remote state");
                self.snapshots
                    .upsert(LocalEntity::from_remote(
                        key.clone(),
                        remote_entity.fields.clone(),
                        remote_entity.last_updated_at,
                        now,
                    ))
                    .await?;
            }
        }

        Ok(conflicts)
    }

    async fn apply_decision(&self, decision: SyncConflict, now: DateTime<Utc>) -> SyncResult<()> {
        let key = decision.key.clone();

        match decision.resolution {
            ResolutionStrategy::RemoteWins => {
                self.snapshots
                    .upsert(LocalEntity::from_remote(
                        key,
                        decision.resolved_fields,
                        decision.remote.last_updated_at,
                        now,
                    ))
                    .await
            }
            ResolutionStrategy::LocalWins | ResolutionStrategy::Merge => {
                // The winning value differs from the remote's: record the
                // fresh observation, then re-queue it so the remote
                // converges on the next pass.
                self.snapshots
                    .upsert(LocalEntity {
                        key: key.clone(),
                        fields: decision.resolved_fields.clone(),
                        last_updated_at: decision.resolved_at,
                        last_fetched_at: Some(now),
                    })
                    .await?;
                self.queue
                    .enqueue(
                        MutationAction::Update,
                        key.collection,
                        key.entity_id,
                        decision.resolved_fields,
                    )
                    .await?;
                Ok(())
            }
        }
    }
}

/// Folds one acknowledged mutation into the snapshot map. Server-assigned
/// fields overlay the local payload.
fn apply_ack(
    snapshot: &mut HashMap<EntityKey, LocalEntity>,
    record: &MutationRecord,
    ack: &RemoteAck,
    now: DateTime<Utc>,
) {
    let key = record.entity_key();

    match record.action {
        MutationAction::Delete => {
            snapshot.remove(&key);
        }
        MutationAction::Create | MutationAction::Update => {
            let base = match snapshot.get(&key) {
                Some(existing) if record.action == MutationAction::Update => {
                    merge_fields(&record.payload, &existing.fields)
                }
                _ => record.payload.clone(),
            };
            let fields = match &ack.server_fields {
                Some(server) => merge_fields(server, &base),
                None => base,
            };

            snapshot.insert(
                key.clone(),
                LocalEntity {
                    key,
                    fields,
                    last_updated_at: now,
                    last_fetched_at: Some(now),
                },
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
