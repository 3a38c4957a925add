use dashmap::DashMap;

use super::{NodeId, NodeStore};
use crate::errors::CacheResult;

/// A node store keeping node bytes in a concurrent hash map.
#[derive(Default)]
pub struct InMemoryNodeStore {
    nodes: DashMap<NodeId, Vec<u8>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        InMemoryNodeStore {
            nodes: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn read(&self, id: NodeId) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.nodes.get(&id).map(|entry| entry.value().clone()))
    }

    fn write(&self, id: NodeId, bytes: &[u8]) -> CacheResult<()> {
        self.nodes.insert(id, bytes.to_vec());
        Ok(())
    }

    fn remove(&self, id: NodeId) -> CacheResult<()> {
        self.nodes.remove(&id);
        Ok(())
    }

    fn clear(&self) -> CacheResult<()> {
        self.nodes.clear();
        Ok(())
    }
}
