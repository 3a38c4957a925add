//! Bounding-box predicates sent to the feature source.
//!
//! Only bounding-box intersection is needed by the cache: a fetch for one
//! missing region becomes a single [`BoundsFilter::Bbox`], a fetch for several
//! disjoint regions becomes an [`BoundsFilter::Or`] of them.

use std::fmt::{self, Display};

use crate::region::Region;

#[derive(Clone, Debug, PartialEq)]
pub enum BoundsFilter {
    /// Matches every feature.
    All,
    /// Matches features whose bounds intersect the region.
    Bbox(Region),
    /// Matches features accepted by any of the inner filters.
    Or(Vec<BoundsFilter>),
}

impl BoundsFilter {
    /// Builds the filter covering `regions`: a single bbox for one region, an
    /// OR of bboxes for several. An empty slice yields an OR that matches
    /// nothing.
    pub fn from_regions(regions: &[Region]) -> BoundsFilter {
        match regions {
            [single] => BoundsFilter::Bbox(single.clone()),
            _ => BoundsFilter::Or(regions.iter().cloned().map(BoundsFilter::Bbox).collect()),
        }
    }

    pub fn matches(&self, bounds: &Region) -> bool {
        match self {
            BoundsFilter::All => true,
            BoundsFilter::Bbox(region) => region.intersects(bounds),
            BoundsFilter::Or(filters) => filters.iter().any(|f| f.matches(bounds)),
        }
    }

    /// The smallest region enclosing everything the filter can match, or
    /// `None` when the filter is unbounded or matches nothing.
    pub fn envelope(&self) -> Option<Region> {
        match self {
            BoundsFilter::All => None,
            BoundsFilter::Bbox(region) => Some(region.clone()),
            BoundsFilter::Or(filters) => {
                let mut acc: Option<Region> = None;
                for filter in filters {
                    let envelope = filter.envelope()?;
                    acc = Some(match acc {
                        Some(region) => region.combined_region(&envelope),
                        None => envelope,
                    });
                }
                acc
            }
        }
    }
}

impl Display for BoundsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundsFilter::All => write!(f, "ALL"),
            BoundsFilter::Bbox(region) => write!(f, "BBOX({})", region),
            BoundsFilter::Or(filters) => {
                write!(f, "OR(")?;
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
        }
    }
}
