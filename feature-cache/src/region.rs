use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::errors::{CacheError, CacheResult};

/// A D-dimensional axis-aligned box given by its `low` and `high` corners.
///
/// `Region` is the envelope type used everywhere in the cache: query
/// envelopes, grid cell shapes and feature bounds. A region always satisfies
/// `low[i] <= high[i]` on every axis; degenerate (zero-extent) regions are
/// allowed so point geometries can be represented.
///
/// # Examples
///
/// ```rust
/// use feature_cache::Region;
///
/// let world = Region::rect(0.0, 0.0, 10.0, 10.0);
/// let quadrant = Region::rect(0.0, 0.0, 5.0, 5.0);
///
/// assert!(world.contains(&quadrant));
/// assert!(quadrant.intersects(&Region::rect(5.0, 5.0, 6.0, 6.0)));
/// assert_eq!(quadrant.combined_region(&Region::rect(5.0, 5.0, 10.0, 10.0)), world);
/// ```
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Region {
    low: Vec<f64>,
    high: Vec<f64>,
}

impl Eq for Region {}

impl Hash for Region {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for v in self.low.iter().chain(self.high.iter()) {
            v.to_bits().hash(state);
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({:?} - {:?})", self.low, self.high)
    }
}

impl Region {
    /// Creates a region from its low and high corners.
    ///
    /// Fails if the corners have different (or zero) dimensions, contain a
    /// NaN, or if `low[i] > high[i]` on any axis.
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> CacheResult<Region> {
        if low.is_empty() || low.len() != high.len() {
            return Err(CacheError::InvalidRegion(format!(
                "corner dimensions differ or are empty: {} vs {}",
                low.len(),
                high.len()
            )));
        }
        for (axis, (l, h)) in low.iter().zip(high.iter()).enumerate() {
            if l.is_nan() || h.is_nan() {
                return Err(CacheError::InvalidRegion(format!(
                    "NaN coordinate on axis {}",
                    axis
                )));
            }
            if l > h {
                return Err(CacheError::InvalidRegion(format!(
                    "low {} exceeds high {} on axis {}",
                    l, h, axis
                )));
            }
        }
        Ok(Region { low, high })
    }

    /// Creates a two-dimensional region. Corners are normalized, so the
    /// arguments may be given in either order.
    pub fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Region {
        Region {
            low: vec![min_x.min(max_x), min_y.min(max_y)],
            high: vec![min_x.max(max_x), min_y.max(max_y)],
        }
    }

    /// Creates a degenerate region covering a single point.
    pub fn point(coords: &[f64]) -> CacheResult<Region> {
        Region::new(coords.to_vec(), coords.to_vec())
    }

    pub fn dimension(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self, axis: usize) -> f64 {
        self.low[axis]
    }

    pub fn high(&self, axis: usize) -> f64 {
        self.high[axis]
    }

    pub fn lows(&self) -> &[f64] {
        &self.low
    }

    pub fn highs(&self) -> &[f64] {
        &self.high
    }

    /// Length of the region along `axis`.
    pub fn extent(&self, axis: usize) -> f64 {
        self.high[axis] - self.low[axis]
    }

    /// Product of the extents along every axis.
    pub fn volume(&self) -> f64 {
        (0..self.dimension()).map(|axis| self.extent(axis)).product()
    }

    /// Checks whether every axis has zero extent.
    pub fn is_point(&self) -> bool {
        self.low == self.high
    }

    /// Checks whether `other` lies entirely within this region, borders
    /// included.
    pub fn contains(&self, other: &Region) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        (0..self.dimension()).all(|axis| {
            other.low[axis] >= self.low[axis] && other.high[axis] <= self.high[axis]
        })
    }

    /// Checks whether the two regions share at least one point. Touching
    /// borders count as an intersection.
    pub fn intersects(&self, other: &Region) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        (0..self.dimension()).all(|axis| {
            self.low[axis] <= other.high[axis] && self.high[axis] >= other.low[axis]
        })
    }

    /// Returns the smallest region containing both regions.
    pub fn combined_region(&self, other: &Region) -> Region {
        debug_assert_eq!(self.dimension(), other.dimension());
        Region {
            low: self
                .low
                .iter()
                .zip(other.low.iter())
                .map(|(a, b)| a.min(*b))
                .collect(),
            high: self
                .high
                .iter()
                .zip(other.high.iter())
                .map(|(a, b)| a.max(*b))
                .collect(),
        }
    }

    /// Returns the overlap of the two regions, if they intersect.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        if !self.intersects(other) {
            return None;
        }
        Some(Region {
            low: self
                .low
                .iter()
                .zip(other.low.iter())
                .map(|(a, b)| a.max(*b))
                .collect(),
            high: self
                .high
                .iter()
                .zip(other.high.iter())
                .map(|(a, b)| a.min(*b))
                .collect(),
        })
    }
}
