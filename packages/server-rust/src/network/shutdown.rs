//! Graceful shutdown controller.
//!
//! Uses `ArcSwap` for lock-free health state transitions and a watch
//! channel to broadcast the shutdown signal to listeners (the server loop
//! and any background tasks).

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Server is initializing (not yet accepting connections).
    Starting,
    /// Server is fully operational.
    Ready,
    /// Server is draining node connections and outstanding calls.
    Draining,
    /// Server has fully stopped.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates graceful shutdown across the server.
///
/// 1. Health probes read `health_state()` to report readiness
/// 2. `trigger_shutdown()` moves to Draining and signals all listeners
/// 3. The network module drains node connections and pending calls, then
///    calls `set_stopped()`
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    /// Creates a new controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    /// Transitions to `Ready`, indicating the server accepts connections.
    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Transitions to `Stopped` once draining has finished.
    pub fn set_stopped(&self) {
        self.health_state.store(Arc::new(HealthState::Stopped));
    }

    /// Returns a receiver notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Initiates graceful shutdown: transitions to `Draining` and signals
    /// all shutdown receivers.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        // Ignore send errors -- receivers may have been dropped
        let _ = self.shutdown_signal.send(true);
    }

    /// Returns the current health state.
    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
