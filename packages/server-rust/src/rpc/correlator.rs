//! Pending-call table matching inbound replies to outstanding calls.
//!
//! Every issued call parks a oneshot sender here under `(node key, call id)`
//! and hands the receiver to the waiting caller. The session handler feeds
//! inbound response envelopes into [`RequestCorrelator::resolve`], which
//! fulfils the slot exactly once; [`RequestCorrelator::await_call`] races
//! that slot against the call's deadline. Whichever side loses, the pending
//! record is removed exactly once; removal of an absent record and
//! fulfilment of a dropped slot are both safe no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use fleetlink_core::{CallId, Envelope, NodeKey};
use metrics::counter;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use super::error::RpcError;

/// Tracks calls awaiting a reply, keyed by `(node key, call id)`.
///
/// Call ids come from a process-wide monotonic counter, so an id is never
/// reused while any call is pending. All critical sections are short and
/// synchronous; no lock is held across a suspension point.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: DashMap<NodeKey, HashMap<CallId, oneshot::Sender<Envelope>>>,
    next_id: AtomicU64,
}

impl RequestCorrelator {
    /// Creates an empty correlator. Call ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh call id, records the pending call, and returns the
    /// id plus the completion slot the caller will wait on.
    pub fn begin_call(&self, node: NodeKey) -> (CallId, oneshot::Receiver<Envelope>) {
        let id = CallId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.entry(node).or_default().insert(id, tx);
        counter!("fleetlink_rpc_calls_total").increment(1);
        (id, rx)
    }

    /// Routes a response envelope to the pending call it answers.
    ///
    /// An unknown, already-resolved, or foreign `(node, id)` pair is dropped
    /// silently: inbound responses are the one place where "not found" is
    /// expected and benign (late replies after a timeout, duplicates).
    pub fn resolve(&self, node: NodeKey, id: CallId, envelope: Envelope) {
        let Some(tx) = self.take_slot(node, id) else {
            debug!(%node, %id, "dropping response with no pending call");
            return;
        };
        // The receiver may have been dropped by a caller that just timed
        // out; losing that race is fine.
        let _ = tx.send(envelope);
    }

    /// Suspends until the slot is fulfilled or `timeout` elapses.
    ///
    /// The pending record is removed on every exit path exactly once.
    ///
    /// # Errors
    ///
    /// [`RpcError::Timeout`] when the deadline wins the race,
    /// [`RpcError::NotConnected`] when the slot was cancelled by the owning
    /// connection's teardown, and [`RpcError::Remote`] when the node replied
    /// with an error envelope.
    pub async fn await_call(
        &self,
        node: NodeKey,
        id: CallId,
        slot: oneshot::Receiver<Envelope>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(envelope)) => envelope.into_result().map_err(|error| RpcError::Remote {
                code: error.code,
                message: error.message,
            }),
            // Sender dropped: the owning connection tore down and cancelled
            // its pending calls. The record is already gone.
            Ok(Err(_)) => Err(RpcError::NotConnected),
            Err(_) => {
                self.forget(node, id);
                counter!("fleetlink_rpc_timeouts_total").increment(1);
                Err(RpcError::Timeout { timeout })
            }
        }
    }

    /// Removes a pending record without fulfilling it. No-op if the record
    /// is already gone.
    pub fn forget(&self, node: NodeKey, id: CallId) {
        drop(self.take_slot(node, id));
    }

    /// Fails every still-pending call for `node` immediately by dropping
    /// its completion slot, waking each waiter with a disconnect failure.
    /// Returns the number of calls cancelled.
    pub fn cancel_all(&self, node: NodeKey) -> usize {
        self.pending
            .remove(&node)
            .map_or(0, |(_, slots)| slots.len())
    }

    /// Number of calls currently pending for `node`.
    #[must_use]
    pub fn pending_for(&self, node: NodeKey) -> usize {
        self.pending.get(&node).map_or(0, |slots| slots.len())
    }

    /// Total number of calls currently pending across all nodes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(|entry| entry.value().len()).sum()
    }

    fn take_slot(&self, node: NodeKey, id: CallId) -> Option<oneshot::Sender<Envelope>> {
        let slot = {
            let mut slots = self.pending.get_mut(&node)?;
            slots.remove(&id)
        };
        // Reclaim the outer entry once the node has nothing pending. The
        // guard must be dropped before remove_if to avoid self-deadlock.
        self.pending.remove_if(&node, |_, slots| slots.is_empty());
        slot
    }
}
