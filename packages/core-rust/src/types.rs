//! Identifier newtypes for nodes and correlated calls.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned key addressing a node, stable across reconnects.
///
/// Allocated once by the persistence layer when a node's client-generated
/// external identifier is first seen, and reused on every later registration
/// with the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(pub i64);

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier correlating a JSON-RPC request with its response.
///
/// Unique among calls concurrently pending for the same node; the wire `id`
/// field carries it as a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
