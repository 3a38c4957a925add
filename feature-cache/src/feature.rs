//! Identifiable, geometry-bearing records and collections of them.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::region::Region;

/// Identifier of a feature, unique within its source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        FeatureId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        FeatureId::new(value)
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        FeatureId(value)
    }
}

/// A record served by a feature source: an id, the bounds of its geometry and
/// an opaque payload the cache never looks into.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    id: FeatureId,
    bounds: Region,
    payload: Vec<u8>,
}

impl Feature {
    pub fn new(id: impl Into<FeatureId>, bounds: Region, payload: Vec<u8>) -> Self {
        Feature {
            id: id.into(),
            bounds,
            payload,
        }
    }

    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    pub fn bounds(&self) -> &Region {
        &self.bounds
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// An ordered collection of features.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        FeatureCollection {
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn contains_id(&self, id: &FeatureId) -> bool {
        self.features.iter().any(|f| f.id() == id)
    }

    /// Combined bounds of all features, or `None` for an empty collection.
    pub fn bounds(&self) -> Option<Region> {
        let mut iter = self.features.iter();
        let first = iter.next()?.bounds().clone();
        Some(iter.fold(first, |acc, f| acc.combined_region(f.bounds())))
    }

    /// Appends the features of `other` whose id is not already present.
    pub fn merge(&mut self, other: FeatureCollection) {
        let mut seen: HashSet<FeatureId> =
            self.features.iter().map(|f| f.id().clone()).collect();
        for feature in other.features {
            if seen.insert(feature.id().clone()) {
                self.features.push(feature);
            }
        }
    }

    /// Drops every feature whose bounds do not intersect `region`.
    pub fn retain_intersecting(&mut self, region: &Region) {
        self.features.retain(|f| f.bounds().intersects(region));
    }
}

impl From<Vec<Feature>> for FeatureCollection {
    fn from(features: Vec<Feature>) -> Self {
        FeatureCollection { features }
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        FeatureCollection {
            features: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl<'a> IntoIterator for &'a FeatureCollection {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, x: f64, y: f64) -> Feature {
        Feature::new(id, Region::rect(x, y, x, y), id.as_bytes().to_vec())
    }

    #[test]
    fn test_bounds_of_collection() {
        let fc: FeatureCollection = vec![point("a", 1.0, 2.0), point("b", 7.0, -3.0)].into();
        assert_eq!(fc.bounds(), Some(Region::rect(1.0, -3.0, 7.0, 2.0)));
        assert_eq!(FeatureCollection::new().bounds(), None);
    }

    #[test]
    fn test_merge_keeps_first_occurrence() {
        let mut fc: FeatureCollection = vec![point("a", 1.0, 1.0), point("b", 2.0, 2.0)].into();
        let other: FeatureCollection =
            vec![point("b", 9.0, 9.0), point("c", 3.0, 3.0)].into();

        fc.merge(other);

        assert_eq!(fc.len(), 3);
        let b = fc.iter().find(|f| f.id().as_str() == "b").unwrap();
        assert_eq!(b.bounds(), &Region::rect(2.0, 2.0, 2.0, 2.0));
        assert!(fc.contains_id(&FeatureId::new("c")));
    }

    #[test]
    fn test_retain_intersecting() {
        let mut fc: FeatureCollection =
            vec![point("a", 1.0, 1.0), point("b", 6.0, 6.0), point("c", 5.0, 5.0)].into();
        fc.retain_intersecting(&Region::rect(0.0, 0.0, 5.0, 5.0));

        let ids: Vec<&str> = fc.iter().map(|f| f.id().as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_payload_is_opaque() {
        let feature = Feature::new("x", Region::rect(0.0, 0.0, 1.0, 1.0), vec![1, 2, 3]);
        assert_eq!(feature.payload(), &[1, 2, 3]);
        assert_eq!(feature.id().to_string(), "x");
    }
}
