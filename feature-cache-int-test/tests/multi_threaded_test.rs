use feature_cache::{CacheMode, CacheResult, FeatureCacheConfig, FeatureCollection, Region};
use feature_cache_int_test::test_util::{
    cleanup, create_context_with, create_test_context, point, quadrant_points, random_points,
    run_test, world,
};
use rand::Rng;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[ctor::ctor]
fn init() {
    colog::init();
}

#[test]
fn test_blocking_concurrent_misses_fetch_once() {
    run_test(
        create_test_context,
        |ctx| {
            let cache = ctx.cache();
            // keep the first fetch in flight while the others arrive
            ctx.source().set_delay(Duration::from_millis(50));

            let num_threads = 8;
            let barrier = Arc::new(Barrier::new(num_threads));
            let mut handles = vec![];

            for _ in 0..num_threads {
                let cache_clone = cache.clone();
                let barrier_clone = Arc::clone(&barrier);

                let handle = thread::spawn(move || {
                    barrier_clone.wait();
                    cache_clone.get(&world()).map(|found| found.len())
                });
                handles.push(handle);
            }

            for handle in handles {
                let found = handle.join().expect("reader thread panicked")?;
                assert_eq!(found, 8);
            }

            assert_eq!(ctx.source().fetches(), 1);
            let stats = cache.stats();
            assert_eq!(stats.source_accesses, 1);
            assert_eq!(stats.data, 8);
            assert_eq!(stats.hits + stats.misses, num_threads as u64);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_blocking_misses_on_separate_cells_fetch_together() {
    run_test(
        create_test_context,
        |ctx| {
            let cache = ctx.cache();
            ctx.source().set_delay(Duration::from_millis(200));

            let queries = [
                Region::rect(1.0, 1.0, 2.0, 2.0),
                Region::rect(6.0, 6.0, 7.0, 7.0),
            ];
            let barrier = Arc::new(Barrier::new(queries.len()));
            let mut handles = vec![];

            for query in queries {
                let cache_clone = cache.clone();
                let barrier_clone = Arc::clone(&barrier);

                let handle = thread::spawn(move || {
                    barrier_clone.wait();
                    cache_clone.get(&query).map(|found| found.len())
                });
                handles.push(handle);
            }

            for handle in handles {
                let found = handle.join().expect("reader thread panicked")?;
                assert_eq!(found, 1);
            }

            // neither miss waited for the other
            assert_eq!(ctx.source().fetches(), 2);
            assert_eq!(ctx.source().peak_concurrent_fetches(), 2);
            assert_eq!(cache.stats().valid_nodes, 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_blocking_overlapping_misses_fetch_once() {
    run_test(
        create_test_context,
        |ctx| {
            let cache = ctx.cache();
            ctx.source().set_delay(Duration::from_millis(100));

            // both overlap the south-west cell
            let queries = [
                Region::rect(1.0, 1.0, 2.0, 2.0),
                Region::rect(3.0, 1.0, 4.0, 4.0),
            ];
            let barrier = Arc::new(Barrier::new(queries.len()));
            let mut handles = vec![];

            for query in queries {
                let cache_clone = cache.clone();
                let barrier_clone = Arc::clone(&barrier);

                let handle = thread::spawn(move || {
                    barrier_clone.wait();
                    cache_clone.get(&query).map(|found| found.len())
                });
                handles.push(handle);
            }

            for handle in handles {
                handle.join().expect("reader thread panicked")?;
            }

            assert_eq!(ctx.source().fetches(), 1);
            assert_eq!(ctx.source().peak_concurrent_fetches(), 1);
            assert_eq!(cache.stats().data, 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_non_blocking_duplicate_fetches_keep_counts() {
    let config = FeatureCacheConfig {
        capacity: 100,
        index_capacity: 4,
        mode: CacheMode::NonBlocking,
        ..Default::default()
    };
    run_test(
        || create_context_with(config.clone(), quadrant_points()),
        |ctx| {
            let cache = ctx.cache();
            ctx.source().set_delay(Duration::from_millis(50));

            let num_threads = 8;
            let barrier = Arc::new(Barrier::new(num_threads));
            let mut handles = vec![];

            for _ in 0..num_threads {
                let cache_clone = cache.clone();
                let barrier_clone = Arc::clone(&barrier);

                let handle = thread::spawn(move || {
                    barrier_clone.wait();
                    cache_clone.get(&world()).map(|found| found.len())
                });
                handles.push(handle);
            }

            for handle in handles {
                let found = handle.join().expect("reader thread panicked")?;
                assert_eq!(found, 8);
            }

            // duplicate fetches are allowed, duplicate data is not
            let fetches = ctx.source().fetches();
            assert!(fetches >= 1 && fetches <= num_threads);
            let stats = cache.stats();
            assert_eq!(stats.source_accesses, fetches as u64);
            assert_eq!(stats.data, 8);
            assert_eq!(cache.peek(&world())?.len(), 8);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_concurrent_puts_into_separate_cells() {
    let config = FeatureCacheConfig {
        capacity: 1000,
        index_capacity: 16,
        ..Default::default()
    };
    run_test(
        || create_context_with(config.clone(), vec![]),
        |ctx| {
            let cache = ctx.cache();

            // one 2.5 x 2.5 cell per thread
            let num_threads = 16;
            let features_per_thread = 10;
            let barrier = Arc::new(Barrier::new(num_threads));
            let mut handles = vec![];

            for thread_id in 0..num_threads {
                let cache_clone = cache.clone();
                let barrier_clone = Arc::clone(&barrier);

                let handle = thread::spawn(move || {
                    let min_x = (thread_id / 4) as f64 * 2.5;
                    let min_y = (thread_id % 4) as f64 * 2.5;
                    let cell = Region::rect(min_x, min_y, min_x + 2.5, min_y + 2.5);
                    let features: FeatureCollection = (0..features_per_thread)
                        .map(|i| {
                            let offset = 0.2 + i as f64 * 0.2;
                            point(
                                &format!("t{}_f{}", thread_id, i),
                                min_x + offset,
                                min_y + offset,
                            )
                        })
                        .collect();

                    barrier_clone.wait();
                    cache_clone.put(&features, &cell)
                });
                handles.push(handle);
            }

            for handle in handles {
                handle.join().expect("writer thread panicked")?;
            }

            let stats = cache.stats();
            assert_eq!(stats.data, num_threads * features_per_thread);
            assert_eq!(stats.valid_nodes, 17);
            assert!(cache.match_region(&world()).is_empty());
            assert_eq!(cache.peek(&world())?.len(), num_threads * features_per_thread);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_concurrent_readers_and_removers() {
    let config = FeatureCacheConfig {
        capacity: 150,
        index_capacity: 16,
        ..Default::default()
    };
    run_test(
        || create_context_with(config.clone(), random_points(300, &world())),
        |ctx| {
            let cache = ctx.cache();

            let num_readers = 4;
            let queries_per_reader = 50;
            let barrier = Arc::new(Barrier::new(num_readers + 1));
            let mut handles = vec![];

            for _ in 0..num_readers {
                let cache_clone = cache.clone();
                let barrier_clone = Arc::clone(&barrier);

                let handle = thread::spawn(move || -> CacheResult<()> {
                    let mut rng = rand::rng();
                    barrier_clone.wait();

                    for _ in 0..queries_per_reader {
                        let x = rng.random_range(0.0..8.0);
                        let y = rng.random_range(0.0..8.0);
                        let size = rng.random_range(0.1..2.0);
                        let query = Region::rect(x, y, x + size, y + size);

                        let found = cache_clone.get(&query)?;
                        for feature in &found {
                            assert!(feature.bounds().intersects(&query));
                        }
                    }
                    Ok(())
                });
                handles.push(handle);
            }

            let cache_clone = cache.clone();
            let barrier_clone = Arc::clone(&barrier);
            let remover = thread::spawn(move || -> CacheResult<()> {
                let mut rng = rand::rng();
                barrier_clone.wait();

                for _ in 0..20 {
                    let x = rng.random_range(0.0..5.0);
                    let y = rng.random_range(0.0..5.0);
                    cache_clone.remove(&Region::rect(x, y, x + 5.0, y + 5.0))?;
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            });
            handles.push(remover);

            for handle in handles {
                handle.join().expect("worker thread panicked")?;
            }

            let stats = cache.stats();
            assert!(stats.data <= 150, "{}", stats);
            assert_eq!(cache.peek(&world())?.len(), stats.data);
            Ok(())
        },
        cleanup,
    )
}
