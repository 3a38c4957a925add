use std::fmt;
use std::sync::Arc;

use crate::cache::FeatureCache;
use crate::errors::{CacheError, CacheResult};
use crate::eviction::{EvictionPolicy, LruEvictionPolicy};
use crate::source::FeatureSource;
use crate::store::{InMemoryNodeStore, NodeStore};

/// Default maximum number of cached features.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default requested number of grid cells.
pub const DEFAULT_INDEX_CAPACITY: usize = 64;

/// Default number of disjoint missing tiles sent to the source before they
/// are collapsed into one region.
pub const DEFAULT_MAX_TILES: usize = 16;

/// How a cache miss reaches the feature source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Missing data is fetched by one caller at a time; callers waiting on a
    /// fetch re-check what is missing once it completes. Source errors are
    /// returned to the caller.
    #[default]
    Blocking,
    /// Callers fetch concurrently and may fetch the same data twice. Source
    /// errors are logged and the cached part of the result is returned.
    NonBlocking,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Blocking => write!(f, "blocking"),
            CacheMode::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

/// Tuning parameters of a [`FeatureCache`].
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureCacheConfig {
    /// Maximum number of features held at once.
    pub capacity: usize,
    /// Requested number of grid cells. The grid never has more.
    pub index_capacity: usize,
    /// Missing tiles beyond this count are fetched as one combined region.
    pub max_tiles: usize,
    pub mode: CacheMode,
}

impl Default for FeatureCacheConfig {
    fn default() -> Self {
        FeatureCacheConfig {
            capacity: DEFAULT_CAPACITY,
            index_capacity: DEFAULT_INDEX_CAPACITY,
            max_tiles: DEFAULT_MAX_TILES,
            mode: CacheMode::Blocking,
        }
    }
}

impl FeatureCacheConfig {
    pub fn validate(&self) -> CacheResult<()> {
        if self.capacity == 0 {
            return Err(CacheError::Config("capacity must be positive".into()));
        }
        if self.index_capacity == 0 {
            return Err(CacheError::Config("index capacity must be positive".into()));
        }
        if self.max_tiles == 0 {
            return Err(CacheError::Config("max tiles must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for [`FeatureCache`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use feature_cache::{CacheMode, FeatureCache, MemoryFeatureSource, Region};
///
/// let source = Arc::new(MemoryFeatureSource::new(Region::rect(0.0, 0.0, 10.0, 10.0)));
/// let cache = FeatureCache::builder()
///     .capacity(1_000)
///     .index_capacity(16)
///     .mode(CacheMode::NonBlocking)
///     .build(source)
///     .unwrap();
///
/// assert_eq!(cache.config().capacity, 1_000);
/// ```
pub struct FeatureCacheBuilder {
    config: FeatureCacheConfig,
    node_store: Option<Arc<dyn NodeStore>>,
    eviction_policy: Option<Box<dyn EvictionPolicy>>,
}

impl FeatureCacheBuilder {
    pub fn new() -> Self {
        FeatureCacheBuilder {
            config: FeatureCacheConfig::default(),
            node_store: None,
            eviction_policy: None,
        }
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: FeatureCacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn index_capacity(mut self, index_capacity: usize) -> Self {
        self.config.index_capacity = index_capacity;
        self
    }

    pub fn max_tiles(mut self, max_tiles: usize) -> Self {
        self.config.max_tiles = max_tiles;
        self
    }

    pub fn mode(mut self, mode: CacheMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Store for serialized grid nodes. Defaults to [`InMemoryNodeStore`].
    /// The store is cleared when the cache is built.
    pub fn node_store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.node_store = Some(store);
        self
    }

    /// Defaults to [`LruEvictionPolicy`].
    pub fn eviction_policy(mut self, policy: Box<dyn EvictionPolicy>) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    /// Builds the cache, querying `source` once for its bounds.
    pub fn build(self, source: Arc<dyn FeatureSource>) -> CacheResult<FeatureCache> {
        self.config.validate()?;
        let store = self
            .node_store
            .unwrap_or_else(|| Arc::new(InMemoryNodeStore::new()));
        let policy = self
            .eviction_policy
            .unwrap_or_else(|| Box::new(LruEvictionPolicy::new()));
        FeatureCache::with_parts(source, self.config, store, policy)
    }
}

impl Default for FeatureCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FeatureCacheConfig::default();
        assert_eq!(config.capacity, 10_000);
        assert_eq!(config.index_capacity, 64);
        assert_eq!(config.max_tiles, 16);
        assert_eq!(config.mode, CacheMode::Blocking);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let mut config = FeatureCacheConfig::default();
        config.capacity = 0;
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));

        let config = FeatureCacheConfig {
            max_tiles: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FeatureCacheConfig {
            index_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(CacheMode::Blocking.to_string(), "blocking");
        assert_eq!(CacheMode::NonBlocking.to_string(), "non-blocking");
    }
}
