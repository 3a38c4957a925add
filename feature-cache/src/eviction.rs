//! Eviction policies over grid nodes.

use lru::LruCache;

use crate::store::NodeId;

/// Recency bookkeeping over node ids.
///
/// The tracker reports every node read and write through [`access`] and
/// asks for a victim when the cache must shrink. Policies only hold node
/// ids; validity lives in the grid, so the caller decides which ids are
/// eligible.
///
/// [`access`]: EvictionPolicy::access
pub trait EvictionPolicy: Send {
    /// Records a use of `id`.
    fn access(&mut self, id: NodeId);

    /// Stops tracking `id`.
    fn forget(&mut self, id: NodeId);

    fn clear(&mut self);

    /// Picks the node to evict next among those accepted by `is_candidate`,
    /// or `None` when nothing qualifies.
    fn select_victim(&self, is_candidate: &dyn Fn(NodeId) -> bool) -> Option<NodeId>;

    /// Number of tracked ids.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Least-recently-used policy.
pub struct LruEvictionPolicy {
    order: LruCache<NodeId, ()>,
}

impl LruEvictionPolicy {
    pub fn new() -> Self {
        LruEvictionPolicy {
            order: LruCache::unbounded(),
        }
    }

    /// Tracked ids from least to most recently used.
    pub fn recency_order(&self) -> Vec<NodeId> {
        self.order.iter().rev().map(|(id, _)| *id).collect()
    }
}

impl Default for LruEvictionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionPolicy for LruEvictionPolicy {
    fn access(&mut self, id: NodeId) {
        self.order.put(id, ());
    }

    fn forget(&mut self, id: NodeId) {
        self.order.pop(&id);
    }

    fn clear(&mut self) {
        self.order.clear();
    }

    fn select_victim(&self, is_candidate: &dyn Fn(NodeId) -> bool) -> Option<NodeId> {
        self.order
            .iter()
            .rev()
            .map(|(id, _)| *id)
            .find(|id| is_candidate(*id))
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}
