use feature_cache::{
    BoundsFilter, CacheError, CacheResult, Feature, FeatureCache, FeatureCacheConfig,
    FeatureCollection, FeatureSource, MemoryFeatureSource, NodeStore, Region,
};
use parking_lot::Mutex;
use rand::Rng;
use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs, thread};

/// Runs a test with retry logic and error handling.
/// `after` runs whether the test body fails or not.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> CacheResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> CacheResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> CacheResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    const MAX_RETRIES: u32 = 3;
    let mut last_error: Option<String> = None;
    let mut last_backtrace: Option<String> = None;

    for attempt in 1..=MAX_RETRIES {
        let start_time = Instant::now();

        let result = std::panic::catch_unwind(|| {
            let backtrace = Backtrace::capture();
            match before() {
                Ok(ctx) => match test(ctx.clone()) {
                    Ok(_) => after(ctx).map_err(|e| {
                        (format!("After run failed: {:?}", e), backtrace.to_string())
                    }),
                    Err(e) => {
                        let _ = after(ctx);
                        Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                    }
                },
                Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
            }
        });

        let elapsed = start_time.elapsed();

        let (error, backtrace) = match result {
            Ok(Ok(_)) => return,
            Ok(Err((e, bt))) => (e, bt),
            Err(panic_err) => {
                let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                (format!("Panic: {}", err_msg), Backtrace::capture().to_string())
            }
        };

        if attempt < MAX_RETRIES {
            eprintln!(
                "\n========== Test Attempt {}/{} Failed (took {:?}) ==========",
                attempt, MAX_RETRIES, elapsed
            );
            eprintln!("Error: {}", error);
            eprintln!("Retrying in {}ms...\n", 100 * attempt);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
        last_error = Some(error);
        last_backtrace = Some(backtrace);
    }

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {} attempts", MAX_RETRIES);
    eprintln!("Last error: {}", last_error.as_deref().unwrap_or("Unknown"));
    if let Some(bt) = &last_backtrace {
        if !bt.is_empty() && !bt.contains("disabled") {
            eprintln!("\nBacktrace:\n{}", bt);
        }
    }
    eprintln!("=====================================================\n");

    panic!(
        "Test failed after {} attempts. Last error: {}",
        MAX_RETRIES,
        last_error.unwrap_or_default()
    );
}

/// A feature source that records how it is used.
///
/// Wraps a [`MemoryFeatureSource`]; can be told to fail or to stall each
/// fetch so concurrent callers overlap.
pub struct CountingSource {
    inner: MemoryFeatureSource,
    fetches: AtomicUsize,
    counts: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    filters: Mutex<Vec<BoundsFilter>>,
}

impl CountingSource {
    pub fn new(bounds: Region, features: Vec<Feature>) -> Self {
        CountingSource {
            inner: MemoryFeatureSource::with_features(bounds, features),
            fetches: AtomicUsize::new(0),
            counts: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            filters: Mutex::new(Vec::new()),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn counts(&self) -> usize {
        self.counts.load(Ordering::SeqCst)
    }

    /// Most fetches ever in progress at the same time.
    pub fn peak_concurrent_fetches(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Filters received so far, oldest first.
    pub fn filters(&self) -> Vec<BoundsFilter> {
        self.filters.lock().clone()
    }

    pub fn add(&self, feature: Feature) {
        self.inner.add(feature);
    }
}

impl FeatureSource for CountingSource {
    fn bounds(&self) -> CacheResult<Region> {
        self.inner.bounds()
    }

    fn features(&self, filter: &BoundsFilter) -> CacheResult<FeatureCollection> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.filters.lock().push(filter.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::SourceFetch("source unavailable".into()))
        } else {
            self.inner.features(filter)
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn count(&self, filter: &BoundsFilter) -> CacheResult<usize> {
        self.counts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::SourceFetch("source unavailable".into()));
        }
        self.inner.count(filter)
    }
}

#[derive(Clone)]
pub struct TestContext {
    path: String,
    cache: FeatureCache,
    source: Arc<CountingSource>,
}

impl TestContext {
    pub fn new(path: String, cache: FeatureCache, source: Arc<CountingSource>) -> Self {
        Self {
            path,
            cache,
            source,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn cache(&self) -> FeatureCache {
        self.cache.clone()
    }

    pub fn source(&self) -> Arc<CountingSource> {
        self.source.clone()
    }
}

pub fn random_path() -> String {
    let id = uuid::Uuid::new_v4();
    env::temp_dir()
        .join("feature-cache-int-test")
        .join(id.to_string())
        .to_string_lossy()
        .to_string()
}

/// The 10 x 10 world most tests run in.
pub fn world() -> Region {
    Region::rect(0.0, 0.0, 10.0, 10.0)
}

/// A point feature at (x, y).
pub fn point(id: &str, x: f64, y: f64) -> Feature {
    Feature::new(id, Region::rect(x, y, x, y), id.as_bytes().to_vec())
}

/// `count` point features spread uniformly over the interior of `bounds`,
/// keeping clear of its border.
pub fn random_points(count: usize, bounds: &Region) -> Vec<Feature> {
    let mut rng = rand::rng();
    (0..count)
        .map(|i| {
            let x = rng.random_range(bounds.low(0) + 0.01..bounds.high(0) - 0.01);
            let y = rng.random_range(bounds.low(1) + 0.01..bounds.high(1) - 0.01);
            point(&format!("p{}", i), x, y)
        })
        .collect()
}

/// Two point features strictly inside each quadrant of [`world`].
pub fn quadrant_points() -> Vec<Feature> {
    vec![
        point("sw1", 1.0, 1.0),
        point("sw2", 3.0, 2.0),
        point("nw1", 1.0, 6.0),
        point("nw2", 2.0, 8.0),
        point("se1", 6.0, 1.0),
        point("se2", 8.0, 3.0),
        point("ne1", 6.0, 6.0),
        point("ne2", 9.0, 9.0),
    ]
}

#[cfg(feature = "fjall")]
fn node_store(path: &str) -> CacheResult<Arc<dyn NodeStore>> {
    use feature_cache_fjall_adapter::FjallNodeStore;

    let store = FjallNodeStore::builder().db_path(path).build()?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "fjall"))]
fn node_store(_path: &str) -> CacheResult<Arc<dyn NodeStore>> {
    Ok(Arc::new(feature_cache::InMemoryNodeStore::new()))
}

/// Builds a cache with `config` over a source holding `features` in
/// [`world`]. The node store follows the crate features.
pub fn create_context_with(
    config: FeatureCacheConfig,
    features: Vec<Feature>,
) -> CacheResult<TestContext> {
    let path = random_path();
    let source = Arc::new(CountingSource::new(world(), features));
    let cache = FeatureCache::builder()
        .config(config)
        .node_store(node_store(&path)?)
        .build(source.clone())?;
    Ok(TestContext::new(path, cache, source))
}

/// A 2 x 2 grid over [`world`] holding [`quadrant_points`].
pub fn create_test_context() -> CacheResult<TestContext> {
    create_context_with(
        FeatureCacheConfig {
            capacity: 100,
            index_capacity: 4,
            ..Default::default()
        },
        quadrant_points(),
    )
}

pub fn cleanup(ctx: TestContext) -> CacheResult<()> {
    ctx.cache().flush()?;
    let path = ctx.path().to_string();
    drop(ctx);

    let mut retry = 0;
    while std::path::Path::new(&path).exists() && fs::remove_dir_all(&path).is_err() && retry < 3 {
        thread::sleep(Duration::from_millis(50));
        retry += 1;
    }
    Ok(())
}
