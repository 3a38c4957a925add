use std::fmt;

use crate::region::Region;

/// Node-level traversal intent.
///
/// Visitors never look at individual features, only at node shapes and
/// validity flags. A node is visited when its shape is contained by the
/// visitor's region; revisiting a node already in the target state is a
/// no-op.
#[derive(Clone, Debug, PartialEq)]
pub enum Visitor {
    /// Marks nodes as fully cached.
    Validating(Region),
    /// Marks nodes as not cached and drops their contents. `None` visits
    /// every node.
    Invalidating(Option<Region>),
}

impl Visitor {
    /// Checks whether a node of the given shape is in this visitor's scope.
    pub fn visits(&self, shape: &Region) -> bool {
        match self {
            Visitor::Validating(region) => region.contains(shape),
            Visitor::Invalidating(Some(region)) => region.contains(shape),
            Visitor::Invalidating(None) => true,
        }
    }

    /// Validity flag a visited node ends up with.
    pub fn target_validity(&self) -> bool {
        matches!(self, Visitor::Validating(_))
    }

    /// Checks whether a visited node with flag `valid` needs a change.
    pub fn changes(&self, valid: bool) -> bool {
        valid != self.target_validity()
    }
}

impl fmt::Display for Visitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visitor::Validating(region) => write!(f, "Validating({})", region),
            Visitor::Invalidating(Some(region)) => write!(f, "Invalidating({})", region),
            Visitor::Invalidating(None) => write!(f, "Invalidating(all)"),
        }
    }
}
