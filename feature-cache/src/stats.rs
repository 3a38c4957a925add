use std::fmt;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Grid nodes, root included
    pub nodes: usize,
    /// Nodes currently marked valid
    pub valid_nodes: usize,
    /// Cached features
    pub data: usize,
    /// Nodes evicted to make room
    pub evictions: u64,
    /// Inserts refused because the target node was not valid
    pub rejected_inserts: u64,
    /// Calls made to the feature source
    pub source_accesses: u64,
    /// `get` calls answered without a fetch
    pub hits: u64,
    /// `get` calls that needed a fetch
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of `get` calls answered from the cache, 0 when none were made.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Nodes: {} ({} valid), Data: {}, Evictions: {}, Rejected inserts: {}, \
             Source accesses: {}, Hits: {}, Misses: {}",
            self.nodes,
            self.valid_nodes,
            self.data,
            self.evictions,
            self.rejected_inserts,
            self.source_accesses,
            self.hits,
            self.misses
        )
    }
}
