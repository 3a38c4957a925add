use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::{NodeId, NodeStore};
use crate::errors::{CacheError, CacheResult};

/// A buffered node with its dirty flag
struct BufferedPage {
    bytes: Vec<u8>,
    dirty: bool,
}

/// A write-back LRU buffer in front of another node store.
///
/// Reads are served from the buffer when possible and loaded from the
/// underlying store on a miss. Writes only touch the buffer; dirty nodes
/// reach the underlying store when they are pushed out of the buffer or on
/// [`flush`](NodeStore::flush).
pub struct BufferedNodeStore<S: NodeStore> {
    inner: S,
    buffer: Mutex<LruCache<NodeId, BufferedPage>>,
}

impl<S: NodeStore> BufferedNodeStore<S> {
    /// Wraps `inner` with a buffer holding at most `capacity` nodes.
    pub fn new(inner: S, capacity: usize) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| CacheError::Config("buffer capacity must be positive".into()))?;
        Ok(Self {
            inner,
            buffer: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of nodes currently held in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Number of buffered nodes not yet written to the underlying store.
    pub fn dirty(&self) -> usize {
        self.buffer.lock().iter().filter(|(_, page)| page.dirty).count()
    }

    /// Inserts into the buffer, first writing back the dirty node the insert
    /// would push out. If that write-back fails the buffer is left as it was.
    fn buffer_page(
        &self,
        buffer: &mut LruCache<NodeId, BufferedPage>,
        id: NodeId,
        page: BufferedPage,
    ) -> CacheResult<()> {
        if !buffer.contains(&id) && buffer.len() == buffer.cap().get() {
            if let Some((lru_id, lru_page)) = buffer.peek_lru() {
                if lru_page.dirty {
                    self.inner.write(*lru_id, &lru_page.bytes).inspect_err(|err| {
                        log::error!("Failed to write back {}: {}", lru_id, err);
                    })?;
                }
            }
        }
        buffer.push(id, page);
        Ok(())
    }
}

impl<S: NodeStore> NodeStore for BufferedNodeStore<S> {
    fn read(&self, id: NodeId) -> CacheResult<Option<Vec<u8>>> {
        let mut buffer = self.buffer.lock();
        if let Some(page) = buffer.get(&id) {
            return Ok(Some(page.bytes.clone()));
        }

        match self.inner.read(id)? {
            Some(bytes) => {
                let page = BufferedPage {
                    bytes: bytes.clone(),
                    dirty: false,
                };
                self.buffer_page(&mut buffer, id, page)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    fn write(&self, id: NodeId, bytes: &[u8]) -> CacheResult<()> {
        let mut buffer = self.buffer.lock();
        let page = BufferedPage {
            bytes: bytes.to_vec(),
            dirty: true,
        };
        self.buffer_page(&mut buffer, id, page)
    }

    fn remove(&self, id: NodeId) -> CacheResult<()> {
        let mut buffer = self.buffer.lock();
        buffer.pop(&id);
        self.inner.remove(id)
    }

    fn clear(&self) -> CacheResult<()> {
        let mut buffer = self.buffer.lock();
        buffer.clear();
        self.inner.clear()
    }

    fn flush(&self) -> CacheResult<()> {
        let mut buffer = self.buffer.lock();
        for (id, page) in buffer.iter_mut() {
            if page.dirty {
                self.inner.write(*id, &page.bytes)?;
                page.dirty = false;
            }
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryNodeStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// An in-memory store whose writes can be switched to fail.
    struct FlakyStore {
        inner: InMemoryNodeStore,
        failing: AtomicBool,
    }

    impl NodeStore for FlakyStore {
        fn read(&self, id: NodeId) -> CacheResult<Option<Vec<u8>>> {
            self.inner.read(id)
        }

        fn write(&self, id: NodeId, bytes: &[u8]) -> CacheResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CacheError::Store("disk full".into()));
            }
            self.inner.write(id, bytes)
        }

        fn remove(&self, id: NodeId) -> CacheResult<()> {
            self.inner.remove(id)
        }

        fn clear(&self) -> CacheResult<()> {
            self.inner.clear()
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(BufferedNodeStore::new(InMemoryNodeStore::new(), 0).is_err());
    }

    #[test]
    fn test_writes_stay_buffered_until_flush() {
        let store = BufferedNodeStore::new(InMemoryNodeStore::new(), 4).unwrap();
        store.write(NodeId::new(1), b"one").unwrap();

        assert_eq!(store.read(NodeId::new(1)).unwrap(), Some(b"one".to_vec()));
        assert!(store.inner().is_empty());
        assert_eq!(store.dirty(), 1);

        store.flush().unwrap();
        assert_eq!(store.inner().len(), 1);
        assert_eq!(store.dirty(), 0);
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() {
        let store = BufferedNodeStore::new(InMemoryNodeStore::new(), 2).unwrap();
        store.write(NodeId::new(1), b"one").unwrap();
        store.write(NodeId::new(2), b"two").unwrap();

        // Touch 1 so that 2 becomes the least recently used page
        store.read(NodeId::new(1)).unwrap();
        store.write(NodeId::new(3), b"three").unwrap();

        assert_eq!(store.buffered(), 2);
        assert_eq!(
            store.inner().read(NodeId::new(2)).unwrap(),
            Some(b"two".to_vec())
        );
        assert_eq!(store.inner().read(NodeId::new(1)).unwrap(), None);
        assert_eq!(store.read(NodeId::new(2)).unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn test_rewrite_same_node_does_not_write_back() {
        let store = BufferedNodeStore::new(InMemoryNodeStore::new(), 2).unwrap();
        store.write(NodeId::new(1), b"v1").unwrap();
        store.write(NodeId::new(1), b"v2").unwrap();

        assert!(store.inner().is_empty());
        assert_eq!(store.read(NodeId::new(1)).unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_read_through_on_miss() {
        let inner = InMemoryNodeStore::new();
        inner.write(NodeId::new(5), b"stored").unwrap();
        let store = BufferedNodeStore::new(inner, 2).unwrap();

        assert_eq!(store.read(NodeId::new(5)).unwrap(), Some(b"stored".to_vec()));
        assert_eq!(store.buffered(), 1);
        assert_eq!(store.dirty(), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = BufferedNodeStore::new(InMemoryNodeStore::new(), 4).unwrap();
        store.write(NodeId::new(1), b"a").unwrap();
        store.write(NodeId::new(2), b"b").unwrap();
        store.flush().unwrap();

        store.remove(NodeId::new(1)).unwrap();
        assert_eq!(store.read(NodeId::new(1)).unwrap(), None);

        store.clear().unwrap();
        assert_eq!(store.read(NodeId::new(2)).unwrap(), None);
        assert_eq!(store.buffered(), 0);
    }

    #[test]
    fn test_failed_write_back_keeps_dirty_page() {
        let inner = FlakyStore {
            inner: InMemoryNodeStore::new(),
            failing: AtomicBool::new(false),
        };
        let store = BufferedNodeStore::new(inner, 1).unwrap();
        store.write(NodeId::new(1), b"one").unwrap();

        store.inner().failing.store(true, Ordering::SeqCst);
        assert!(store.write(NodeId::new(2), b"two").is_err());
        assert_eq!(store.read(NodeId::new(1)).unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.dirty(), 1);

        store.inner().failing.store(false, Ordering::SeqCst);
        store.write(NodeId::new(2), b"two").unwrap();
        assert_eq!(
            store.inner().inner.read(NodeId::new(1)).unwrap(),
            Some(b"one".to_vec())
        );
    }
}
