use async_trait::async_trait;
use fleetlink_core::NodeKey;

/// Persistence collaborator mapping a node's client-generated external
/// identifier to its server-assigned key.
///
/// The mapping is created once at first registration and is stable across
/// reconnects; this is the only persistence surface the connection core
/// consumes. Implementations: `SQLite`/`PostgreSQL` (deployment), memory
/// (binary default and tests).
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Looks up the key for `external_id`, allocating one if the identifier
    /// has never been seen.
    ///
    /// Must return the same key for the same identifier on every call.
    async fn find_or_create(&self, external_id: &str) -> anyhow::Result<NodeKey>;
}
