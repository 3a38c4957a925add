//! The slow collaborator the cache sits in front of.

use parking_lot::RwLock;

use crate::errors::CacheResult;
use crate::feature::{Feature, FeatureCollection};
use crate::filter::BoundsFilter;
use crate::region::Region;

/// A source of identifiable, geometry-bearing features that can be queried by
/// bounding-box filters.
///
/// Implementations are typically remote services or disk-backed datasets;
/// calls may block for a long time. Failures should be reported as
/// [`CacheError::SourceFetch`](crate::CacheError::SourceFetch).
pub trait FeatureSource: Send + Sync {
    /// Full extent of the data. Queried once when a cache is built.
    fn bounds(&self) -> CacheResult<Region>;

    /// Returns every feature matched by `filter`.
    fn features(&self, filter: &BoundsFilter) -> CacheResult<FeatureCollection>;

    /// Counts the features matched by `filter`.
    fn count(&self, filter: &BoundsFilter) -> CacheResult<usize>;
}

/// A feature source holding its features in memory.
///
/// Serves as a reference implementation and as a stand-in for real sources
/// in tests and benchmarks.
pub struct MemoryFeatureSource {
    bounds: Region,
    features: RwLock<Vec<Feature>>,
}

impl MemoryFeatureSource {
    pub fn new(bounds: Region) -> Self {
        MemoryFeatureSource {
            bounds,
            features: RwLock::new(Vec::new()),
        }
    }

    pub fn with_features(bounds: Region, features: impl IntoIterator<Item = Feature>) -> Self {
        MemoryFeatureSource {
            bounds,
            features: RwLock::new(features.into_iter().collect()),
        }
    }

    pub fn add(&self, feature: Feature) {
        self.features.write().push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.read().is_empty()
    }
}

impl FeatureSource for MemoryFeatureSource {
    fn bounds(&self) -> CacheResult<Region> {
        Ok(self.bounds.clone())
    }

    fn features(&self, filter: &BoundsFilter) -> CacheResult<FeatureCollection> {
        Ok(self
            .features
            .read()
            .iter()
            .filter(|f| filter.matches(f.bounds()))
            .cloned()
            .collect())
    }

    fn count(&self, filter: &BoundsFilter) -> CacheResult<usize> {
        Ok(self
            .features
            .read()
            .iter()
            .filter(|f| filter.matches(f.bounds()))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_filters_by_bbox() {
        let source = MemoryFeatureSource::new(Region::rect(0.0, 0.0, 10.0, 10.0));
        source.add(Feature::new("a", Region::rect(1.0, 1.0, 1.0, 1.0), vec![]));
        source.add(Feature::new("b", Region::rect(8.0, 8.0, 9.0, 9.0), vec![]));

        let filter = BoundsFilter::Bbox(Region::rect(0.0, 0.0, 5.0, 5.0));
        let found = source.features(&filter).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found.iter().next().unwrap().id().as_str(), "a");
        assert_eq!(source.count(&filter).unwrap(), 1);
        assert_eq!(source.count(&BoundsFilter::All).unwrap(), 2);
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_memory_source_bounds() {
        let source = MemoryFeatureSource::with_features(Region::rect(0.0, 0.0, 4.0, 4.0), vec![]);
        assert_eq!(source.bounds().unwrap(), Region::rect(0.0, 0.0, 4.0, 4.0));
        assert!(source.is_empty());
    }
}
