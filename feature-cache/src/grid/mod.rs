//! The spatial grid: a root node over the source extent split once into a
//! regular grid of cells, the serialized node contents, and the visitors
//! that flip node validity.

mod index;
mod node;
mod visitor;

pub use index::{AxisVec, GridIndex, GridLayout, NodeRecord};
pub use node::GridNode;
pub use visitor::Visitor;
