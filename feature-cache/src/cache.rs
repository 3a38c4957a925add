//! The public cache component.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{CacheMode, FeatureCacheBuilder, FeatureCacheConfig};
use crate::errors::{CacheError, CacheResult};
use crate::eviction::EvictionPolicy;
use crate::feature::FeatureCollection;
use crate::filter::BoundsFilter;
use crate::grid::Visitor;
use crate::inflight::InFlightFetches;
use crate::region::Region;
use crate::source::FeatureSource;
use crate::stats::CacheStats;
use crate::store::{NodeId, NodeStore};
use crate::tracker::GridTracker;

/// A region-indexed cache in front of a slow [`FeatureSource`].
///
/// Queries are answered from the grid when every cell they overlap is
/// cached. Otherwise the missing cells are fetched from the source with one
/// bounding-box filter, stored, marked valid and merged into the result.
///
/// Cloning is cheap; clones share the same cache.
///
/// # Locking
///
/// One reader/writer lock guards the grid. Cache hits, [`peek`] and
/// [`match_region`] take the read lock. Storing fetched data, [`put`],
/// [`remove`] and [`clear`] take the write lock. No lock is held while the
/// source is queried. In blocking mode a miss claims the cells it fetches;
/// a miss overlapping claimed cells waits for that fetch and is then served
/// from the cache, while misses over other cells fetch at the same time.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use feature_cache::{Feature, FeatureCache, MemoryFeatureSource, Region};
///
/// let source = Arc::new(MemoryFeatureSource::new(Region::rect(0.0, 0.0, 10.0, 10.0)));
/// source.add(Feature::new("a", Region::rect(1.0, 1.0, 1.0, 1.0), vec![]));
///
/// let cache = FeatureCache::builder().index_capacity(4).build(source).unwrap();
/// let query = Region::rect(0.0, 0.0, 2.0, 2.0);
///
/// assert!(!cache.match_region(&query).is_empty());
/// assert_eq!(cache.get(&query).unwrap().len(), 1);
/// assert!(cache.match_region(&query).is_empty());
/// ```
///
/// [`peek`]: FeatureCache::peek
/// [`match_region`]: FeatureCache::match_region
/// [`put`]: FeatureCache::put
/// [`remove`]: FeatureCache::remove
/// [`clear`]: FeatureCache::clear
#[derive(Clone)]
pub struct FeatureCache {
    inner: Arc<FeatureCacheInner>,
}

struct FeatureCacheInner {
    tracker: RwLock<GridTracker>,
    source: Arc<dyn FeatureSource>,
    config: FeatureCacheConfig,
    /// Cells being fetched in blocking mode
    in_flight: InFlightFetches,
    counters: AccessCounters,
}

/// Counters updated outside the write lock
struct AccessCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    source_accesses: AtomicU64,
}

impl AccessCounters {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            source_accesses: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.source_accesses.store(0, Ordering::Relaxed);
    }
}

impl FeatureCache {
    pub fn builder() -> FeatureCacheBuilder {
        FeatureCacheBuilder::new()
    }

    /// Creates a cache with an in-memory node store and LRU eviction.
    pub fn new(source: Arc<dyn FeatureSource>, config: FeatureCacheConfig) -> CacheResult<Self> {
        FeatureCache::builder().config(config).build(source)
    }

    pub(crate) fn with_parts(
        source: Arc<dyn FeatureSource>,
        config: FeatureCacheConfig,
        store: Arc<dyn NodeStore>,
        policy: Box<dyn EvictionPolicy>,
    ) -> CacheResult<Self> {
        let bounds = source.bounds()?;
        let tracker = GridTracker::new(bounds, config.index_capacity, store, policy)?;

        log::info!(
            "Created {} feature cache over {} with {:?} grid cells, capacity {}",
            config.mode,
            tracker.root_region(),
            tracker.index().layout().cells_per_axis(),
            config.capacity
        );

        Ok(FeatureCache {
            inner: Arc::new(FeatureCacheInner {
                tracker: RwLock::new(tracker),
                source,
                config,
                in_flight: InFlightFetches::new(),
                counters: AccessCounters::new(),
            }),
        })
    }

    pub fn config(&self) -> &FeatureCacheConfig {
        &self.inner.config
    }

    pub fn source(&self) -> &Arc<dyn FeatureSource> {
        &self.inner.source
    }

    /// Full extent of the source, as reported when the cache was built.
    pub fn bounds(&self) -> Region {
        self.inner.tracker.read().root_region().clone()
    }

    /// Returns every feature intersecting `envelope`, fetching whatever part
    /// of it is not cached yet.
    pub fn get(&self, envelope: &Region) -> CacheResult<FeatureCollection> {
        self.check_dimension(envelope)?;

        let (missing, from_cache) = self.lookup(envelope)?;
        if missing.is_empty() {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(from_cache);
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Cache miss for {}: {} missing tiles",
            envelope,
            missing.len()
        );

        match self.inner.config.mode {
            CacheMode::Blocking => self.get_blocking(envelope),
            CacheMode::NonBlocking => self.get_non_blocking(envelope, missing, from_cache),
        }
    }

    fn get_blocking(&self, envelope: &Region) -> CacheResult<FeatureCollection> {
        let _claim = loop {
            let cells = self.missing_cells(envelope);
            if cells.is_empty() {
                break None;
            }
            if let Some(claim) = self.inner.in_flight.claim(cells) {
                break Some(claim);
            }
        };

        // a released claim may have fetched what we are missing
        let (missing, from_cache) = self.lookup(envelope)?;
        if missing.is_empty() {
            return Ok(from_cache);
        }

        let fetched = self.fetch(&missing).inspect_err(|err| {
            log::error!("Failed to fetch missing data for {}: {}", envelope, err);
        })?;
        self.store_fetched(&missing, &fetched)?;
        Ok(merge_result(envelope, from_cache, fetched))
    }

    fn get_non_blocking(
        &self,
        envelope: &Region,
        missing: Vec<Region>,
        from_cache: FeatureCollection,
    ) -> CacheResult<FeatureCollection> {
        let fetched = match self.fetch(&missing) {
            Ok(fetched) => fetched,
            Err(err) => {
                log::warn!(
                    "Failed to fetch missing data for {}, returning cached data only: {}",
                    envelope,
                    err
                );
                return Ok(from_cache);
            }
        };
        self.store_fetched(&missing, &fetched)?;
        Ok(merge_result(envelope, from_cache, fetched))
    }

    /// Returns the cached features intersecting `envelope` without
    /// contacting the source.
    pub fn peek(&self, envelope: &Region) -> CacheResult<FeatureCollection> {
        self.check_dimension(envelope)?;
        self.inner.tracker.read().query(envelope)
    }

    /// Regions that would have to be fetched to answer `envelope`.
    ///
    /// The query is clipped to the cache bounds first. More than
    /// `max_tiles` missing tiles are collapsed into their combined region.
    pub fn match_region(&self, envelope: &Region) -> Vec<Region> {
        let tracker = self.inner.tracker.read();
        self.match_locked(&tracker, envelope)
    }

    /// Stores `features` and marks the cells contained by `envelope` as
    /// cached.
    ///
    /// Fails with [`CacheError::CapacityExceeded`] if `features` alone does
    /// not fit in the cache, and with [`CacheError::InvalidRegion`] if
    /// `envelope` contains no whole grid cell, since nothing could be marked
    /// cached and the features would be dropped. Nothing is changed in either
    /// case.
    pub fn put(&self, features: &FeatureCollection, envelope: &Region) -> CacheResult<()> {
        self.check_dimension(envelope)?;
        let capacity = self.inner.config.capacity;
        check_size(capacity, features.len())?;

        let mut tracker = self.inner.tracker.write();
        let region = tracker
            .root_region()
            .intersection(envelope)
            .filter(|clipped| tracker.contained_cell_count(clipped) > 0)
            .ok_or_else(|| {
                CacheError::InvalidRegion(format!("{} contains no grid cell", envelope))
            })?;
        tracker.make_room(capacity, features.len())?;
        register_batch(&mut tracker, &[region], features)
    }

    /// Stores `features` into cells that are already cached, without marking
    /// anything valid. Returns how many features were accepted.
    pub fn put_features(&self, features: &FeatureCollection) -> CacheResult<usize> {
        let capacity = self.inner.config.capacity;
        check_size(capacity, features.len())?;

        let mut tracker = self.inner.tracker.write();
        tracker.make_room(capacity, features.len())?;
        let mut accepted = 0;
        for feature in features {
            if tracker.insert(feature.clone())? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Marks the cells contained by `envelope` as cached without storing
    /// any data.
    pub fn register(&self, envelope: &Region) -> CacheResult<()> {
        self.check_dimension(envelope)?;
        let mut tracker = self.inner.tracker.write();
        if let Some(region) = tracker.root_region().intersection(envelope) {
            tracker.accept(&Visitor::Validating(region))?;
        }
        Ok(())
    }

    /// Drops the cells contained by `envelope` from the cache.
    pub fn remove(&self, envelope: &Region) -> CacheResult<()> {
        self.check_dimension(envelope)?;
        let mut tracker = self.inner.tracker.write();
        if let Some(region) = tracker.root_region().intersection(envelope) {
            let removed = tracker.accept(&Visitor::Invalidating(Some(region)))?;
            log::debug!("Removed {} cells under {}", removed, envelope);
        }
        Ok(())
    }

    /// Returns the cache to its freshly built state, statistics included.
    pub fn clear(&self) -> CacheResult<()> {
        let mut tracker = self.inner.tracker.write();
        tracker.clear()?;
        self.inner.counters.reset();
        log::info!("Cleared feature cache");
        Ok(())
    }

    /// Counts the features intersecting `envelope`, from the cache when it is
    /// fully cached and from the source otherwise.
    pub fn count(&self, envelope: &Region) -> CacheResult<usize> {
        self.check_dimension(envelope)?;
        {
            let tracker = self.inner.tracker.read();
            if self.match_locked(&tracker, envelope).is_empty() {
                return Ok(tracker.query(envelope)?.len());
            }
        }

        self.inner
            .counters
            .source_accesses
            .fetch_add(1, Ordering::Relaxed);
        self.inner
            .source
            .count(&BoundsFilter::Bbox(envelope.clone()))
    }

    pub fn stats(&self) -> CacheStats {
        let tracker = self.inner.tracker.read();
        let counters = &self.inner.counters;
        CacheStats {
            nodes: tracker.node_count(),
            valid_nodes: tracker.valid_node_count(),
            data: tracker.data_count(),
            evictions: tracker.evictions(),
            rejected_inserts: tracker.rejected_inserts(),
            source_accesses: counters.source_accesses.load(Ordering::Relaxed),
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
        }
    }

    /// Human-readable counters.
    pub fn stats_string(&self) -> String {
        self.stats().to_string()
    }

    /// Flushes the node store.
    pub fn flush(&self) -> CacheResult<()> {
        self.inner.tracker.read().flush()
    }

    fn check_dimension(&self, envelope: &Region) -> CacheResult<()> {
        let expected = self.inner.tracker.read().root_region().dimension();
        if envelope.dimension() != expected {
            return Err(CacheError::InvalidRegion(format!(
                "{} has {} dimensions, cache has {}",
                envelope,
                envelope.dimension(),
                expected
            )));
        }
        Ok(())
    }

    fn lookup(&self, envelope: &Region) -> CacheResult<(Vec<Region>, FeatureCollection)> {
        let tracker = self.inner.tracker.read();
        let missing = self.match_locked(&tracker, envelope);
        let from_cache = tracker.query(envelope)?;
        Ok((missing, from_cache))
    }

    fn missing_cells(&self, envelope: &Region) -> Vec<NodeId> {
        let tracker = self.inner.tracker.read();
        match tracker.root_region().intersection(envelope) {
            Some(clipped) => tracker.missing_cells(&clipped),
            None => Vec::new(),
        }
    }

    fn match_locked(&self, tracker: &GridTracker, envelope: &Region) -> Vec<Region> {
        let Some(clipped) = tracker.root_region().intersection(envelope) else {
            return Vec::new();
        };

        let missing = tracker.search_missing_tiles(&clipped);
        if missing.len() > self.inner.config.max_tiles {
            let combined = missing
                .iter()
                .skip(1)
                .fold(missing[0].clone(), |acc, r| acc.combined_region(r));
            return vec![combined];
        }
        missing
    }

    fn fetch(&self, missing: &[Region]) -> CacheResult<FeatureCollection> {
        let filter = BoundsFilter::from_regions(missing);
        self.inner
            .counters
            .source_accesses
            .fetch_add(1, Ordering::Relaxed);
        log::debug!("Fetching {} from source", filter);
        self.inner.source.features(&filter)
    }

    fn store_fetched(&self, missing: &[Region], fetched: &FeatureCollection) -> CacheResult<()> {
        let capacity = self.inner.config.capacity;
        check_size(capacity, fetched.len())?;

        let mut tracker = self.inner.tracker.write();
        tracker.make_room(capacity, fetched.len())?;
        register_batch(&mut tracker, missing, fetched)
    }
}

fn check_size(capacity: usize, requested: usize) -> CacheResult<()> {
    if requested > capacity {
        log::warn!(
            "Refusing batch of {} features, cache capacity is {}",
            requested,
            capacity
        );
        return Err(CacheError::CapacityExceeded {
            requested,
            capacity,
        });
    }
    Ok(())
}

/// Marks `regions` valid and stores `features`. On failure the regions are
/// marked invalid again so a later query fetches them anew.
fn register_batch(
    tracker: &mut GridTracker,
    regions: &[Region],
    features: &FeatureCollection,
) -> CacheResult<()> {
    if let Err(err) = validate_and_insert(tracker, regions, features) {
        log::error!("Failed to register {} regions: {}", regions.len(), err);
        for region in regions {
            if let Err(unregister_err) = tracker.accept(&Visitor::Invalidating(Some(region.clone()))) {
                log::error!("Failed to unregister {}: {}", region, unregister_err);
            }
        }
        return Err(err);
    }
    Ok(())
}

fn validate_and_insert(
    tracker: &mut GridTracker,
    regions: &[Region],
    features: &FeatureCollection,
) -> CacheResult<()> {
    for region in regions {
        tracker.accept(&Visitor::Validating(region.clone()))?;
    }
    for feature in features {
        tracker.insert(feature.clone())?;
    }
    Ok(())
}

fn merge_result(
    envelope: &Region,
    mut from_cache: FeatureCollection,
    fetched: FeatureCollection,
) -> FeatureCollection {
    from_cache.merge(fetched);
    from_cache.retain_intersecting(envelope);
    from_cache
}
