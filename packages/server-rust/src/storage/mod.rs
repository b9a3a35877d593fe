//! Implementations of the [`NodeDirectory`](crate::traits::NodeDirectory)
//! persistence collaborator.

pub mod memory;

pub use memory::MemoryDirectory;
