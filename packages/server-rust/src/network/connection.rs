//! Connection handles and the node registry.
//!
//! Each accepted WebSocket gets a [`NodeConnection`] handle wrapping a
//! bounded mpsc channel; the receiver end is drained by that socket's write
//! loop, so every caller shares one writer per connection. [`NodeRegistry`]
//! maps a node key to its currently active connection, at most one entry
//! per key, with an identity-guarded release so a stale session's teardown
//! can never evict a newer connection for the same node.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fleetlink_core::NodeKey;
use metrics::gauge;
use tokio::sync::mpsc;

use super::config::ConnectionConfig;

/// Frame queued for a connection's write loop.
#[derive(Debug)]
pub enum OutboundFrame {
    /// A JSON text frame (one envelope per frame).
    Text(String),
    /// A close frame with an optional reason; the write loop exits after it.
    Close(Option<String>),
}

/// Error returned when sending a frame to a connection fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The channel remained full for the entire send timeout.
    Timeout,
    /// The write loop has exited; the receiver was dropped.
    Disconnected,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "send timed out (outbound channel full)"),
            Self::Disconnected => write!(f, "connection closed"),
        }
    }
}

/// Handle to one physical node connection.
///
/// Owned by the session handler; the registry and in-flight gateway sends
/// hold `Arc` clones. Connection identity (for the stale-teardown guard) is
/// the `Arc` allocation itself, compared with [`Arc::ptr_eq`].
#[derive(Debug)]
pub struct NodeConnection {
    tx: mpsc::Sender<OutboundFrame>,
    /// When this connection was accepted.
    pub connected_at: Instant,
}

impl NodeConnection {
    /// Creates a connection handle and the receiver its write loop drains.
    #[must_use]
    pub fn channel(config: &ConnectionConfig) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(config.outbound_channel_capacity);
        let conn = Arc::new(Self {
            tx,
            connected_at: Instant::now(),
        });
        (conn, rx)
    }

    /// Attempts to enqueue a frame without blocking.
    ///
    /// Returns `false` if the channel is full or the write loop has exited.
    #[must_use]
    pub fn try_send(&self, frame: OutboundFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Enqueues a frame, waiting up to `timeout` for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Timeout`] if the channel stays full, or
    /// [`SendError::Disconnected`] if the write loop has exited.
    pub async fn send_timeout(
        &self,
        frame: OutboundFrame,
        timeout: Duration,
    ) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Disconnected),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Whether the write loop is still draining this connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Thread-safe map from node key to its currently active connection.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    connections: DashMap<NodeKey, Arc<NodeConnection>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Binds `conn` as the active connection for `key`, superseding any
    /// previous one. Returns the superseded connection, if any.
    pub fn bind(&self, key: NodeKey, conn: Arc<NodeConnection>) -> Option<Arc<NodeConnection>> {
        let previous = self.connections.insert(key, conn);
        gauge!("fleetlink_connected_nodes").set(self.connections.len() as f64);
        previous
    }

    /// Looks up the active connection for `key`.
    #[must_use]
    pub fn get(&self, key: NodeKey) -> Option<Arc<NodeConnection>> {
        self.connections.get(&key).map(|entry| Arc::clone(&entry))
    }

    /// Whether `key` currently has an active connection.
    #[must_use]
    pub fn is_connected(&self, key: NodeKey) -> bool {
        self.connections.contains_key(&key)
    }

    /// Removes the entry for `key` only if the stored connection is the same
    /// instance as `conn`.
    ///
    /// Guards the reconnect race: when a node reconnects, the old session's
    /// teardown may run after the new connection has already replaced it,
    /// and must not evict the live entry. Returns `true` if an entry was
    /// removed.
    pub fn release(&self, key: NodeKey, conn: &Arc<NodeConnection>) -> bool {
        let removed = self
            .connections
            .remove_if(&key, |_, stored| Arc::ptr_eq(stored, conn))
            .is_some();
        gauge!("fleetlink_connected_nodes").set(self.connections.len() as f64);
        removed
    }

    /// Number of currently connected nodes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Removes and returns every connection with the key it was bound
    /// under. Used during graceful shutdown.
    pub fn drain_all(&self) -> Vec<(NodeKey, Arc<NodeConnection>)> {
        let keys: Vec<NodeKey> = self.connections.iter().map(|entry| *entry.key()).collect();
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.connections.remove(&key) {
                handles.push(entry);
            }
        }
        gauge!("fleetlink_connected_nodes").set(0.0);
        handles
    }
}
