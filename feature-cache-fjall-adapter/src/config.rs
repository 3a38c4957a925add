use fjall::{Config, PartitionCreateOptions};
use feature_cache::{CacheError, CacheResult};

use crate::store::FjallNodeStore;

/// Partition holding grid nodes unless configured otherwise.
pub const DEFAULT_PARTITION_NAME: &str = "grid_nodes";

/// Default block cache size: 32 MB.
pub const DEFAULT_CACHE_SIZE: u64 = 32 * 1024 * 1024;

/// Fjall node store configuration.
///
/// `fsync_ms` of 0 leaves journal syncing to explicit flushes.
#[derive(Clone, Debug, PartialEq)]
pub struct FjallNodeStoreConfig {
    db_path: String,
    partition_name: String,
    fsync_ms: u16,
    cache_size: u64,
}

impl FjallNodeStoreConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        FjallNodeStoreConfig {
            db_path: db_path.into(),
            partition_name: DEFAULT_PARTITION_NAME.to_string(),
            fsync_ms: 0,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    #[inline]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    #[inline]
    pub fn partition_name(&self) -> &str {
        &self.partition_name
    }

    #[inline]
    pub fn fsync_ms(&self) -> u16 {
        self.fsync_ms
    }

    #[inline]
    pub fn cache_size(&self) -> u64 {
        self.cache_size
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.db_path.is_empty() {
            return Err(CacheError::Config("db path must not be empty".into()));
        }
        if self.partition_name.is_empty() {
            return Err(CacheError::Config("partition name must not be empty".into()));
        }
        Ok(())
    }

    /// Translates this config into fjall's keyspace config.
    pub(crate) fn keyspace_config(&self) -> Config {
        let mut config = Config::new(&self.db_path).cache_size(self.cache_size);
        if self.fsync_ms > 0 {
            config = config.fsync_ms(Some(self.fsync_ms));
        }
        config
    }

    pub(crate) fn partition_config(&self) -> PartitionCreateOptions {
        PartitionCreateOptions::default()
    }
}

/// Builder for [`FjallNodeStore`].
///
/// # Examples
///
/// ```rust,no_run
/// use feature_cache_fjall_adapter::FjallNodeStore;
///
/// let store = FjallNodeStore::builder()
///     .db_path("/tmp/grid-cache")
///     .partition_name("roads")
///     .fsync_ms(500)
///     .build()
///     .unwrap();
/// ```
pub struct FjallNodeStoreBuilder {
    config: FjallNodeStoreConfig,
}

impl FjallNodeStoreBuilder {
    pub fn new() -> Self {
        FjallNodeStoreBuilder {
            config: FjallNodeStoreConfig::new(""),
        }
    }

    pub fn db_path(mut self, db_path: impl Into<String>) -> Self {
        self.config.db_path = db_path.into();
        self
    }

    pub fn partition_name(mut self, partition_name: impl Into<String>) -> Self {
        self.config.partition_name = partition_name.into();
        self
    }

    pub fn fsync_ms(mut self, fsync_ms: u16) -> Self {
        self.config.fsync_ms = fsync_ms;
        self
    }

    pub fn cache_size(mut self, cache_size: u64) -> Self {
        self.config.cache_size = cache_size;
        self
    }

    pub fn config(&self) -> &FjallNodeStoreConfig {
        &self.config
    }

    /// Opens (or creates) the keyspace and partition.
    pub fn build(self) -> CacheResult<FjallNodeStore> {
        FjallNodeStore::open(self.config)
    }
}

impl Default for FjallNodeStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
