use std::fmt::Display;
use std::ops::RangeFull;
use std::sync::Arc;

use feature_cache::{CacheError, CacheResult, NodeId, NodeStore};
use fjall::{Keyspace, PartitionHandle, PersistMode};

use crate::config::{FjallNodeStoreBuilder, FjallNodeStoreConfig};

/// A persistent node store backed by a fjall LSM keyspace.
///
/// Nodes are kept in one partition, keyed by the big-endian bytes of their
/// id. Cloning is cheap; clones share the keyspace. The keyspace is
/// persisted when the last clone is dropped.
#[derive(Clone)]
pub struct FjallNodeStore {
    inner: Arc<FjallNodeStoreInner>,
}

struct FjallNodeStoreInner {
    keyspace: Keyspace,
    partition: PartitionHandle,
    config: FjallNodeStoreConfig,
}

impl FjallNodeStore {
    pub fn builder() -> FjallNodeStoreBuilder {
        FjallNodeStoreBuilder::new()
    }

    /// Opens (or creates) the keyspace at the configured path.
    pub fn open(config: FjallNodeStoreConfig) -> CacheResult<FjallNodeStore> {
        config.validate()?;

        let keyspace = Keyspace::open(config.keyspace_config()).map_err(|err| {
            log::error!("Failed to open keyspace at {}: {}", config.db_path(), err);
            to_cache_error(err)
        })?;
        let partition = keyspace
            .open_partition(config.partition_name(), config.partition_config())
            .map_err(|err| {
                log::error!(
                    "Failed to open partition {}: {}",
                    config.partition_name(),
                    err
                );
                to_cache_error(err)
            })?;

        log::debug!(
            "Opened fjall node store at {} (partition {})",
            config.db_path(),
            config.partition_name()
        );
        Ok(FjallNodeStore {
            inner: Arc::new(FjallNodeStoreInner {
                keyspace,
                partition,
                config,
            }),
        })
    }

    pub fn config(&self) -> &FjallNodeStoreConfig {
        &self.inner.config
    }

    /// Number of stored nodes. Scans the partition.
    pub fn len(&self) -> CacheResult<usize> {
        self.inner.partition.len().map_err(to_cache_error)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        self.inner.partition.is_empty().map_err(to_cache_error)
    }
}

impl NodeStore for FjallNodeStore {
    fn read(&self, id: NodeId) -> CacheResult<Option<Vec<u8>>> {
        match self.inner.partition.get(id.to_key()) {
            Ok(value) => Ok(value.map(|bytes| bytes.to_vec())),
            Err(err) => {
                log::error!("Failed to read {}: {}", id, err);
                Err(to_cache_error(err))
            }
        }
    }

    fn write(&self, id: NodeId, bytes: &[u8]) -> CacheResult<()> {
        let key = id.to_key();
        self.inner
            .partition
            .insert(&key[..], bytes)
            .map_err(|err| {
                log::error!("Failed to write {}: {}", id, err);
                to_cache_error(err)
            })
    }

    fn remove(&self, id: NodeId) -> CacheResult<()> {
        let key = id.to_key();
        self.inner
            .partition
            .remove(&key[..])
            .map_err(to_cache_error)
    }

    fn clear(&self) -> CacheResult<()> {
        for result in self.inner.partition.range::<Vec<u8>, RangeFull>(..) {
            let (key, _) = result.map_err(|err| {
                log::error!("Failed to clear fjall node store: {}", err);
                to_cache_error(err)
            })?;
            self.inner.partition.remove(key).map_err(to_cache_error)?;
        }
        Ok(())
    }

    fn flush(&self) -> CacheResult<()> {
        self.inner
            .keyspace
            .persist(PersistMode::SyncAll)
            .map_err(to_cache_error)
    }
}

impl Drop for FjallNodeStoreInner {
    fn drop(&mut self) {
        if let Err(err) = self.keyspace.persist(PersistMode::SyncAll) {
            log::error!("Failed to persist keyspace: {}", err);
        }
    }
}

fn to_cache_error(err: impl Display) -> CacheError {
    CacheError::Store(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{run_test, Context};

    fn create_context() -> Context {
        let ctx = Context::new();
        let store = FjallNodeStore::builder()
            .db_path(ctx.path())
            .build()
            .unwrap();
        ctx.with_store(store)
    }

    #[test]
    fn test_write_read_remove() {
        run_test(
            create_context,
            |ctx| {
                let store = ctx.store();
                let id = NodeId::new(3);

                assert_eq!(store.read(id).unwrap(), None);
                store.write(id, b"node three").unwrap();
                assert_eq!(store.read(id).unwrap(), Some(b"node three".to_vec()));

                store.write(id, b"updated").unwrap();
                assert_eq!(store.read(id).unwrap(), Some(b"updated".to_vec()));
                assert_eq!(store.len().unwrap(), 1);

                store.remove(id).unwrap();
                assert_eq!(store.read(id).unwrap(), None);
                assert!(store.is_empty().unwrap());
            },
            |_| {},
        );
    }

    #[test]
    fn test_clear() {
        run_test(
            create_context,
            |ctx| {
                let store = ctx.store();
                for i in 0..50 {
                    store.write(NodeId::new(i), &[i as u8; 16]).unwrap();
                }
                assert_eq!(store.len().unwrap(), 50);

                store.clear().unwrap();
                assert!(store.is_empty().unwrap());
                assert_eq!(store.read(NodeId::new(7)).unwrap(), None);
            },
            |_| {},
        );
    }

    #[test]
    fn test_flush_and_reopen() {
        run_test(
            create_context,
            |ctx| {
                let path = ctx.path();
                {
                    let store = ctx.store();
                    store.write(NodeId::new(1), b"persisted").unwrap();
                    store.flush().unwrap();
                }
                let ctx = ctx.without_store();

                let reopened = FjallNodeStore::builder().db_path(path).build().unwrap();
                assert_eq!(
                    reopened.read(NodeId::new(1)).unwrap(),
                    Some(b"persisted".to_vec())
                );
                drop(reopened);
                drop(ctx);
            },
            |_| {},
        );
    }

    #[test]
    fn test_partitions_are_separate() {
        run_test(
            create_context,
            |ctx| {
                let store = ctx.store();
                store.write(NodeId::new(1), b"default").unwrap();
                assert_eq!(store.config().partition_name(), "grid_nodes");
                drop(store);
                let path = ctx.path();
                let ctx = ctx.without_store();

                let other = FjallNodeStore::builder()
                    .db_path(path)
                    .partition_name("other_nodes")
                    .build()
                    .unwrap();
                assert_eq!(other.read(NodeId::new(1)).unwrap(), None);
                drop(other);
                drop(ctx);
            },
            |_| {},
        );
    }
}
