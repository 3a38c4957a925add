//! # Feature Cache - Region-Indexed Caching for Spatial Feature Sources
//!
//! This crate provides a concurrency-safe cache that sits in front of a slow
//! spatial feature source (a remote service, a large file on disk) and
//! answers bounding-box queries from memory, fetching only the parts of a
//! query that are not cached yet.
//!
//! ## Features
//!
//! - **Grid Index**: The source extent is split once into a regular grid of cells
//! - **Validity Tracking**: Each cell is either fully cached or not cached at all
//! - **Partial Fetches**: Only the missing cells of a query are sent to the source
//! - **LRU Eviction**: Whole cells are evicted, least recently used first
//! - **Pluggable Storage**: Node contents live in any [`NodeStore`]
//! - **Thread Safe**: Cache hits only take a shared lock
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use feature_cache::{Feature, FeatureCache, MemoryFeatureSource, Region};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(MemoryFeatureSource::new(Region::rect(0.0, 0.0, 100.0, 100.0)));
//! source.add(Feature::new("well-17", Region::rect(12.0, 40.0, 12.0, 40.0), vec![]));
//!
//! let cache = FeatureCache::builder()
//!     .capacity(50_000)
//!     .index_capacity(256)
//!     .build(source)?;
//!
//! // first call fetches the overlapped cells, the second is served from memory
//! let query = Region::rect(10.0, 35.0, 15.0, 45.0);
//! assert_eq!(cache.get(&query)?.len(), 1);
//! assert_eq!(cache.get(&query)?.len(), 1);
//! assert_eq!(cache.stats().source_accesses, 1);
//! # Ok(())
//! # }
//! ```

// Value types
pub mod errors;
pub mod feature;
pub mod filter;
pub mod region;

// Collaborators
pub mod source;
pub mod store;

// Cache internals
pub mod eviction;
pub mod grid;
mod inflight;
pub mod stats;
pub mod tracker;

// Public surface
pub mod cache;
pub mod config;

pub use cache::FeatureCache;
pub use config::{CacheMode, FeatureCacheBuilder, FeatureCacheConfig};
pub use errors::{CacheError, CacheResult};
pub use eviction::{EvictionPolicy, LruEvictionPolicy};
pub use feature::{Feature, FeatureCollection, FeatureId};
pub use filter::BoundsFilter;
pub use region::Region;
pub use source::{FeatureSource, MemoryFeatureSource};
pub use stats::CacheStats;
pub use store::{BufferedNodeStore, DiskNodeStore, InMemoryNodeStore, NodeId, NodeStore};
pub use tracker::GridTracker;
