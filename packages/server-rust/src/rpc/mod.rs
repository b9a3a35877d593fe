//! The connection-and-correlation core.
//!
//! Pipeline: a node's session hands inbound requests to [`dispatch`], which
//! binds the connection into the registry on registration; calling code
//! issues outbound traffic through [`NodeRpcService`], which records each
//! call in the [`RequestCorrelator`] and transmits on the bound connection;
//! inbound responses flow back through the correlator to wake the waiting
//! caller.

pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod gateway;

pub use correlator::RequestCorrelator;
pub use dispatch::dispatch_request;
pub use error::RpcError;
pub use gateway::NodeRpcService;
