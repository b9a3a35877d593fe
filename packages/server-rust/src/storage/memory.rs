//! In-memory [`NodeDirectory`] backed by [`DashMap`].
//!
//! Keys are allocated from an atomic counter starting at 1, mirroring the
//! autoincrement rowids a SQL-backed directory would hand out. Suitable for
//! development, testing, and single-process deployments that do not need
//! identity to survive a restart.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use fleetlink_core::NodeKey;

use crate::traits::NodeDirectory;

/// In-memory directory of external identifier -> node key.
pub struct MemoryDirectory {
    nodes: DashMap<String, NodeKey>,
    next_key: AtomicI64,
}

impl MemoryDirectory {
    /// Creates an empty directory. The first allocated key is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            next_key: AtomicI64::new(1),
        }
    }

    /// Returns the number of known node identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when no identity has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeDirectory for MemoryDirectory {
    async fn find_or_create(&self, external_id: &str) -> anyhow::Result<NodeKey> {
        // entry() holds the shard lock across the insert, so two racing
        // registrations for the same identifier get the same key.
        let key = *self
            .nodes
            .entry(external_id.to_string())
            .or_insert_with(|| NodeKey(self.next_key.fetch_add(1, Ordering::Relaxed)));
        Ok(key)
    }
}
