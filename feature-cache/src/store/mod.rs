//! Byte-oriented storage for serialized grid nodes.
//!
//! The grid never keeps node contents itself: every node is serialized and
//! handed to a [`NodeStore`] keyed by its [`NodeId`]. Any conforming store
//! can back a cache without changing its semantics:
//! - [`InMemoryNodeStore`] keeps node bytes in a concurrent map
//! - [`DiskNodeStore`] keeps them in a single checksummed file
//! - [`BufferedNodeStore`] puts a write-back LRU buffer in front of another store

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::CacheResult;

mod buffered;
mod disk;
mod memory;

pub use buffered::BufferedNodeStore;
pub use disk::DiskNodeStore;
pub use memory::InMemoryNodeStore;

/// Stable handle of a grid node. Handles index the grid's node arena and key
/// the node's bytes in the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The grid root always takes the first slot.
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(value: u64) -> Self {
        NodeId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn is_root(&self) -> bool {
        *self == NodeId::ROOT
    }

    /// Big-endian key bytes, preserving id order in ordered stores.
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Storage of serialized nodes keyed by node id.
///
/// Stores are shared between threads; implementations synchronize
/// internally. A missing node reads as `None`.
pub trait NodeStore: Send + Sync {
    /// Reads the bytes last written for `id`.
    fn read(&self, id: NodeId) -> CacheResult<Option<Vec<u8>>>;

    /// Stores `bytes` for `id`, replacing any previous value.
    fn write(&self, id: NodeId, bytes: &[u8]) -> CacheResult<()>;

    /// Forgets `id`. Removing an unknown id is not an error.
    fn remove(&self, id: NodeId) -> CacheResult<()>;

    /// Forgets every node.
    fn clear(&self) -> CacheResult<()>;

    /// Pushes buffered writes down to durable storage.
    fn flush(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_key_order() {
        let a = NodeId::new(1).to_key();
        let b = NodeId::new(256).to_key();
        assert!(a < b);
        assert!(NodeId::ROOT.is_root());
        assert_eq!(NodeId::new(7).to_string(), "node#7");
    }
}
