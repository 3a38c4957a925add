//! # Fjall Node Store
//!
//! A persistent [`NodeStore`](feature_cache::NodeStore) for the feature cache
//! grid, backed by a fjall LSM-tree keyspace.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feature_cache::{FeatureCache, MemoryFeatureSource, Region};
//! use feature_cache_fjall_adapter::FjallNodeStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FjallNodeStore::builder().db_path("/tmp/grid-cache").build()?;
//! let source = Arc::new(MemoryFeatureSource::new(Region::rect(0.0, 0.0, 10.0, 10.0)));
//!
//! let cache = FeatureCache::builder()
//!     .node_store(Arc::new(store))
//!     .build(source)?;
//! # Ok(())
//! # }
//! ```

mod config;
mod store;

pub use config::*;
pub use store::*;
