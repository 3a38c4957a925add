use serde::{Deserialize, Serialize};

use crate::errors::CacheResult;
use crate::feature::{Feature, FeatureId};
use crate::region::Region;

/// Contents of a grid node: the features cached in that node's region.
///
/// Nodes are never held by the grid itself. They are encoded with bincode
/// and kept in the node store between accesses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GridNode {
    entries: Vec<Feature>,
}

impl GridNode {
    pub fn new() -> Self {
        GridNode {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Feature] {
        &self.entries
    }

    /// Stores `feature`, replacing an entry with the same id.
    ///
    /// Returns `true` if the node holds one more entry afterwards.
    pub fn insert(&mut self, feature: Feature) -> bool {
        match self.entries.iter_mut().find(|e| e.id() == feature.id()) {
            Some(existing) => {
                *existing = feature;
                false
            }
            None => {
                self.entries.push(feature);
                true
            }
        }
    }

    pub fn remove(&mut self, id: &FeatureId) -> Option<Feature> {
        let pos = self.entries.iter().position(|e| e.id() == id)?;
        Some(self.entries.swap_remove(pos))
    }

    /// Keeps only the entries accepted by `keep`, returning how many were dropped.
    pub fn retain(&mut self, keep: impl FnMut(&Feature) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(keep);
        before - self.entries.len()
    }

    /// Entries whose bounds intersect `region`.
    pub fn intersecting<'a>(&'a self, region: &'a Region) -> impl Iterator<Item = &'a Feature> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.bounds().intersects(region))
    }

    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    pub fn decode(bytes: &[u8]) -> CacheResult<GridNode> {
        let (node, _) =
            bincode::serde::decode_from_slice::<GridNode, _>(bytes, bincode::config::standard())?;
        Ok(node)
    }
}
