//! # Connectivity Monitor
//!
//! Two-state machine over an injected reachability signal source.
//!
//! ## State Machine
//! ```text
//! ┌─────────┐   signal: true    ┌─────────┐
//! │ Offline │ ────────────────► │ Online  │
//! │         │ ◄──────────────── │         │
//! └─────────┘   signal: false   └─────────┘
//!
//!   edge-triggered events: BecameOnline / BecameOffline
//!   repeated signals of the same state are de-duplicated
//! ```
//!
//! The monitor never polls; the platform layer (or a test) pushes boolean
//! reachability signals into the channel it was spawned with. The initial
//! state comes from a best-effort probe at startup - unknown defaults to
//! Offline, which avoids attempting sync against an unreachable remote.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

// =============================================================================
// Link State
// =============================================================================

/// Reachability of the remote store as the monitor last saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Remote is believed reachable.
    Online,
    /// Remote is believed unreachable (also the conservative default).
    Offline,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Online => write!(f, "online"),
            LinkState::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Connectivity Event
// =============================================================================

/// Edge-triggered transition event. Fired only on a state change, never on
/// every raw signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

// =============================================================================
// State Machine (pure, independently testable)
// =============================================================================

/// De-duplicates raw reachability signals into edge events.
#[derive(Debug)]
pub struct LinkStateMachine {
    state: LinkState,
}

impl LinkStateMachine {
    /// Creates the machine from the startup probe result. `None` (probe
    /// ambiguous or unavailable) defaults to Offline.
    pub fn new(probe: Option<bool>) -> Self {
        let state = match probe {
            Some(true) => LinkState::Online,
            _ => LinkState::Offline,
        };
        LinkStateMachine { state }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Feeds one raw signal; returns an event only on an actual transition.
    pub fn observe(&mut self, reachable: bool) -> Option<ConnectivityEvent> {
        let next = if reachable {
            LinkState::Online
        } else {
            LinkState::Offline
        };

        if next == self.state {
            return None;
        }

        self.state = next;
        Some(match next {
            LinkState::Online => ConnectivityEvent::BecameOnline,
            LinkState::Offline => ConnectivityEvent::BecameOffline,
        })
    }
}

// =============================================================================
// Connectivity Handle
// =============================================================================

/// Shared view of the monitor's current state.
#[derive(Clone)]
pub struct ConnectivityHandle {
    state: Arc<RwLock<LinkState>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ConnectivityHandle {
    /// Current link state.
    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    /// True when the remote is believed reachable.
    pub async fn is_online(&self) -> bool {
        *self.state.read().await == LinkState::Online
    }

    /// Stops the monitor task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// Background task turning raw reachability signals into edge events.
pub struct ConnectivityMonitor {
    machine: LinkStateMachine,
    state: Arc<RwLock<LinkState>>,
    signal_rx: mpsc::Receiver<bool>,
    event_tx: mpsc::Sender<ConnectivityEvent>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ConnectivityMonitor {
    /// Spawns the monitor.
    ///
    /// `probe` is the startup reachability probe result (`None` = unknown,
    /// treated as Offline). `signal_rx` is the platform signal source.
    /// Returns the shared handle plus the edge-event receiver the engine
    /// listens on.
    pub fn spawn(
        probe: Option<bool>,
        signal_rx: mpsc::Receiver<bool>,
    ) -> (ConnectivityHandle, mpsc::Receiver<ConnectivityEvent>) {
        let machine = LinkStateMachine::new(probe);
        let state = Arc::new(RwLock::new(machine.state()));
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        info!(initial = %machine.state(), "Connectivity monitor starting");

        let monitor = ConnectivityMonitor {
            machine,
            state: state.clone(),
            signal_rx,
            event_tx,
            shutdown_rx,
        };
        tokio::spawn(monitor.run());

        let handle = ConnectivityHandle { state, shutdown_tx };
        (handle, event_rx)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    let Some(reachable) = signal else {
                        debug!("Signal source closed, connectivity monitor stopping");
                        break;
                    };

                    if let Some(event) = self.machine.observe(reachable) {
                        *self.state.write().await = self.machine.state();
                        info!(state = %self.machine.state(), "Connectivity transition");

                        if self.event_tx.send(event).await.is_err() {
                            debug!("Event receiver dropped, connectivity monitor stopping");
                            break;
                        }
                    } else {
                        debug!(reachable, "Duplicate connectivity signal ignored");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Connectivity monitor shutting down");
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_unknown_probe_defaults_offline() {
        assert_eq!(LinkStateMachine::new(None).state(), LinkState::Offline);
        assert_eq!(LinkStateMachine::new(Some(false)).state(), LinkState::Offline);
        assert_eq!(LinkStateMachine::new(Some(true)).state(), LinkState::Online);
    }

    #[test]
    fn test_machine_deduplicates_signals() {
        let mut machine = LinkStateMachine::new(None);

        assert_eq!(machine.observe(true), Some(ConnectivityEvent::BecameOnline));
        assert_eq!(machine.observe(true), None);
        assert_eq!(machine.observe(true), None);
        assert_eq!(machine.observe(false), Some(ConnectivityEvent::BecameOffline));
        assert_eq!(machine.observe(false), None);
    }

    #[tokio::test]
    async fn test_monitor_emits_edges_only() {
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let (handle, mut events) = ConnectivityMonitor::spawn(None, signal_rx);

        assert!(!handle.is_online().await);

        // Three identical signals produce exactly one edge.
        signal_tx.send(true).await.unwrap();
        signal_tx.send(true).await.unwrap();
        signal_tx.send(true).await.unwrap();
        signal_tx.send(false).await.unwrap();

        let first = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert_eq!(first, Some(ConnectivityEvent::BecameOnline));
        let second = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert_eq!(second, Some(ConnectivityEvent::BecameOffline));

        assert!(!handle.is_online().await);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_tracks_state() {
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let (handle, mut events) = ConnectivityMonitor::spawn(Some(false), signal_rx);

        signal_tx.send(true).await.unwrap();
        let _ = timeout(Duration::from_secs(1), events.recv()).await.unwrap();

        assert_eq!(handle.state().await, LinkState::Online);
        handle.shutdown().await;
    }
}
