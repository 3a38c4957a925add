use feature_cache::{CacheResult, FeatureCacheConfig, Region};
use feature_cache_int_test::test_util::{cleanup, create_context_with, random_points, world};
use rand::Rng;

fn main() -> CacheResult<()> {
    println!("Starting stress test...");
    let config = FeatureCacheConfig {
        capacity: 20_000,
        index_capacity: 256,
        ..Default::default()
    };
    let ctx = create_context_with(config, random_points(100_000, &world()))?;
    let cache = ctx.cache();

    let count = 100_000;
    let mut rng = rand::rng();
    let start = std::time::Instant::now();
    let mut returned = 0;
    for _ in 0..count {
        let x = rng.random_range(0.0..9.5);
        let y = rng.random_range(0.0..9.5);
        let size = rng.random_range(0.05..0.5);
        returned += cache.get(&Region::rect(x, y, x + size, y + size))?.len();
    }
    let elapsed = start.elapsed();

    println!("Ran {} queries in {:?} ({} features returned)", count, elapsed, returned);
    println!("Source fetches: {}", ctx.source().fetches());
    println!("{}", cache.stats_string());
    println!("Hit ratio: {:.3}", cache.stats().hit_ratio());

    cleanup(ctx)?;
    println!("Stress test completed.");
    Ok(())
}
