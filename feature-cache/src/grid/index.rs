//! Fixed-depth grid index.
//!
//! The root node covers the full extent of the feature source and splits,
//! once, into a regular grid of equal-size cells. Nodes live in an arena:
//! the root takes slot 0 and cell `n` (in row-major order, last axis
//! fastest) takes slot `n + 1`. A [`NodeId`] is the arena slot.

use smallvec::{smallvec, SmallVec};

use crate::errors::{CacheError, CacheResult};
use crate::region::Region;
use crate::store::NodeId;

/// Per-axis values. Almost every grid is two or three dimensional.
pub type AxisVec<T> = SmallVec<[T; 4]>;

/// Arena entry of a node: its shape and validity flag.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub region: Region,
    pub valid: bool,
}

/// How the root region is divided into cells.
#[derive(Clone, Debug, PartialEq)]
pub struct GridLayout {
    origin: AxisVec<f64>,
    cell_size: AxisVec<f64>,
    cells: AxisVec<usize>,
}

impl GridLayout {
    /// Derives a layout of at most `index_capacity` cells with tiles as close
    /// to square as the root's aspect ratio allows.
    pub fn compute(root: &Region, index_capacity: usize) -> CacheResult<GridLayout> {
        if index_capacity == 0 {
            return Err(CacheError::Config(
                "index capacity must be positive".into(),
            ));
        }

        let dims = root.dimension();
        let mut cells: AxisVec<usize> = smallvec![1; dims];
        let mut active: AxisVec<usize> = (0..dims).filter(|&a| root.extent(a) > 0.0).collect();

        // Axes too short for a whole tile collapse to one cell; the tile is
        // then recomputed over the axes that remain.
        while !active.is_empty() {
            let volume: f64 = active.iter().map(|&a| root.extent(a)).product();
            let tile = (volume / index_capacity as f64).powf(1.0 / active.len() as f64);
            let before = active.len();
            active.retain(|a| root.extent(*a) / tile + 1e-9 >= 1.0);
            if active.len() == before {
                for &a in &active {
                    let n = (root.extent(a) / tile + 1e-9).floor();
                    cells[a] = if n.is_finite() && n >= 1.0 { n as usize } else { 1 };
                }
                break;
            }
        }

        let cell_size = (0..dims)
            .map(|a| root.extent(a) / cells[a] as f64)
            .collect();

        Ok(GridLayout {
            origin: root.lows().iter().copied().collect(),
            cell_size,
            cells,
        })
    }

    pub fn dimension(&self) -> usize {
        self.cells.len()
    }

    /// Number of cells along each axis.
    pub fn cells_per_axis(&self) -> &[usize] {
        &self.cells
    }

    pub fn cell_size(&self) -> &[f64] {
        &self.cell_size
    }

    pub fn cell_count(&self) -> usize {
        self.cells.iter().product()
    }

    /// Grid coordinate of `value` along `axis`, clamped into the grid.
    pub fn coordinate(&self, axis: usize, value: f64) -> usize {
        let size = self.cell_size[axis];
        if size <= 0.0 {
            return 0;
        }
        let c = ((value - self.origin[axis]) / size).floor();
        if c <= 0.0 {
            0
        } else {
            (c as usize).min(self.cells[axis] - 1)
        }
    }
}

/// The root node and its grid of cells.
pub struct GridIndex {
    root_region: Region,
    layout: GridLayout,
    records: Vec<NodeRecord>,
}

impl GridIndex {
    /// Creates an unsplit index over `root_region`.
    pub fn new(root_region: Region, index_capacity: usize) -> CacheResult<GridIndex> {
        let layout = GridLayout::compute(&root_region, index_capacity)?;
        let records = vec![NodeRecord {
            region: root_region.clone(),
            valid: false,
        }];
        Ok(GridIndex {
            root_region,
            layout,
            records,
        })
    }

    pub fn root_region(&self) -> &Region {
        &self.root_region
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn is_split(&self) -> bool {
        self.records.len() > 1
    }

    /// Partitions the root into its cells, all invalid. Only the first call
    /// has an effect; returns whether this call split the root.
    pub fn split(&mut self) -> bool {
        if self.is_split() {
            return false;
        }

        let count = self.layout.cell_count();
        self.records.reserve(count);
        for slot in 0..count {
            let region = self.cell_region(slot);
            self.records.push(NodeRecord {
                region,
                valid: false,
            });
        }
        log::debug!(
            "Split grid root {} into {:?} cells",
            self.root_region,
            self.layout.cells_per_axis()
        );
        true
    }

    /// Drops every cell and returns the root to its unsplit, invalid state.
    pub fn reset(&mut self) {
        self.records.truncate(1);
        self.records[0].valid = false;
    }

    /// Number of nodes in the arena, root included.
    pub fn node_count(&self) -> usize {
        self.records.len()
    }

    pub fn cell_count(&self) -> usize {
        self.records.len() - 1
    }

    /// Every node id, root first.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.records.len() as u64).map(NodeId::new)
    }

    /// Every cell id in row-major order.
    pub fn cell_ids(&self) -> impl Iterator<Item = NodeId> {
        (1..self.records.len() as u64).map(NodeId::new)
    }

    pub fn record(&self, id: NodeId) -> Option<&NodeRecord> {
        self.records.get(id.index())
    }

    pub fn region(&self, id: NodeId) -> Option<&Region> {
        self.records.get(id.index()).map(|r| &r.region)
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        self.records.get(id.index()).is_some_and(|r| r.valid)
    }

    /// Sets the validity flag of `id`, returning the previous value.
    pub fn set_valid(&mut self, id: NodeId, valid: bool) -> bool {
        match self.records.get_mut(id.index()) {
            Some(record) => std::mem::replace(&mut record.valid, valid),
            None => false,
        }
    }

    pub fn all_cells_valid(&self) -> bool {
        self.is_split() && self.records[1..].iter().all(|r| r.valid)
    }

    /// Linear slot of a grid coordinate, or `None` outside the grid.
    pub fn grid_index_to_slot(&self, cursor: &[usize]) -> Option<usize> {
        let cells = self.layout.cells_per_axis();
        if cursor.len() != cells.len() {
            return None;
        }
        let mut slot = 0;
        for (c, n) in cursor.iter().zip(cells.iter()) {
            if c >= n {
                return None;
            }
            slot = slot * n + c;
        }
        Some(slot)
    }

    /// Node id of the cell at a grid coordinate.
    pub fn grid_index_to_node_id(&self, cursor: &[usize]) -> Option<NodeId> {
        let slot = self.grid_index_to_slot(cursor)?;
        self.child_identifier(slot)
    }

    /// Node id of the cell in `slot`, valid or not. `None` until split.
    pub fn child_identifier(&self, slot: usize) -> Option<NodeId> {
        if slot < self.cell_count() {
            Some(NodeId::new(slot as u64 + 1))
        } else {
            None
        }
    }

    /// Inclusive range of grid coordinates `region` overlaps, per axis.
    pub fn cell_range(&self, region: &Region) -> (AxisVec<usize>, AxisVec<usize>) {
        let dims = self.layout.dimension();
        let mins = (0..dims)
            .map(|a| self.layout.coordinate(a, region.low(a)))
            .collect();
        let maxs = (0..dims)
            .map(|a| self.layout.coordinate(a, region.high(a)))
            .collect();
        (mins, maxs)
    }

    /// Cell ids for every coordinate in the inclusive range, row-major.
    pub fn cells_in_range(&self, mins: &[usize], maxs: &[usize]) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.is_split() || mins.is_empty() {
            return out;
        }

        let mut cursor: AxisVec<usize> = mins.iter().copied().collect();
        loop {
            if let Some(id) = self.grid_index_to_node_id(&cursor) {
                out.push(id);
            }

            let mut axis = cursor.len();
            loop {
                if axis == 0 {
                    return out;
                }
                axis -= 1;
                if cursor[axis] < maxs[axis] {
                    cursor[axis] += 1;
                    break;
                }
                cursor[axis] = mins[axis];
            }
        }
    }

    /// Cells overlapped by `region`.
    pub fn overlapping_cells(&self, region: &Region) -> Vec<NodeId> {
        if region.dimension() != self.layout.dimension() {
            return Vec::new();
        }
        let (mins, maxs) = self.cell_range(region);
        self.cells_in_range(&mins, &maxs)
    }

    /// Cells whose region contains `bounds`. Bounds on a cell border may
    /// be contained by more than one cell.
    pub fn containing_cells(&self, bounds: &Region) -> Vec<NodeId> {
        if region_dims_differ(&self.root_region, bounds) {
            return Vec::new();
        }
        // widen the search by one cell so border cells are considered
        let (mut mins, mut maxs) = self.cell_range(bounds);
        let cells = self.layout.cells_per_axis();
        for axis in 0..mins.len() {
            mins[axis] = mins[axis].saturating_sub(1);
            maxs[axis] = (maxs[axis] + 1).min(cells[axis] - 1);
        }
        self.cells_in_range(&mins, &maxs)
            .into_iter()
            .filter(|id| self.region(*id).is_some_and(|r| r.contains(bounds)))
            .collect()
    }

    fn cell_region(&self, slot: usize) -> Region {
        let cells = self.layout.cells_per_axis();
        let dims = cells.len();

        let mut cursor: AxisVec<usize> = smallvec![0; dims];
        let mut rest = slot;
        for axis in (0..dims).rev() {
            cursor[axis] = rest % cells[axis];
            rest /= cells[axis];
        }

        let mut low = Vec::with_capacity(dims);
        let mut high = Vec::with_capacity(dims);
        for axis in 0..dims {
            let origin = self.root_region.low(axis);
            let size = self.layout.cell_size()[axis];
            low.push(origin + cursor[axis] as f64 * size);
            if cursor[axis] + 1 == cells[axis] {
                high.push(self.root_region.high(axis));
            } else {
                high.push(origin + (cursor[axis] + 1) as f64 * size);
            }
        }
        // corners come from a valid root, so low <= high holds
        Region::new(low, high).unwrap_or_else(|_| self.root_region.clone())
    }
}

fn region_dims_differ(a: &Region, b: &Region) -> bool {
    a.dimension() != b.dimension()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_index(root: Region, capacity: usize) -> GridIndex {
        let mut index = GridIndex::new(root, capacity).unwrap();
        assert!(index.split());
        index
    }

    #[test]
    fn test_layout_square() {
        let root = Region::rect(0.0, 0.0, 10.0, 10.0);
        let layout = GridLayout::compute(&root, 4).unwrap();
        assert_eq!(layout.cells_per_axis(), &[2, 2]);
        assert_eq!(layout.cell_size(), &[5.0, 5.0]);

        let layout = GridLayout::compute(&root, 64).unwrap();
        assert_eq!(layout.cells_per_axis(), &[8, 8]);
    }

    #[test]
    fn test_layout_never_exceeds_capacity() {
        let root = Region::rect(0.0, 0.0, 10.0, 10.0);
        let layout = GridLayout::compute(&root, 10).unwrap();
        assert_eq!(layout.cells_per_axis(), &[3, 3]);

        let wide = Region::rect(0.0, 0.0, 20.0, 10.0);
        assert_eq!(GridLayout::compute(&wide, 8).unwrap().cells_per_axis(), &[4, 2]);

        let thin = Region::rect(0.0, 0.0, 1000.0, 0.001);
        let layout = GridLayout::compute(&thin, 4).unwrap();
        assert_eq!(layout.cells_per_axis(), &[4, 1]);
    }

    #[test]
    fn test_layout_degenerate_root() {
        let line = Region::rect(0.0, 5.0, 10.0, 5.0);
        let layout = GridLayout::compute(&line, 5).unwrap();
        assert_eq!(layout.cells_per_axis(), &[5, 1]);
        assert_eq!(layout.coordinate(1, 5.0), 0);

        let point = Region::rect(1.0, 1.0, 1.0, 1.0);
        assert_eq!(GridLayout::compute(&point, 16).unwrap().cell_count(), 1);

        assert!(GridLayout::compute(&line, 0).is_err());
    }

    #[test]
    fn test_split_is_one_shot() {
        let mut index = GridIndex::new(Region::rect(0.0, 0.0, 10.0, 10.0), 4).unwrap();
        assert!(!index.is_split());
        assert_eq!(index.child_identifier(0), None);

        assert!(index.split());
        assert!(!index.split());
        assert_eq!(index.node_count(), 5);
        assert_eq!(index.cell_count(), 4);
    }

    #[test]
    fn test_cell_regions_row_major() {
        let index = split_index(Region::rect(0.0, 0.0, 10.0, 10.0), 4);

        let id = index.grid_index_to_node_id(&[0, 1]).unwrap();
        assert_eq!(id, NodeId::new(2));
        assert_eq!(index.region(id).unwrap(), &Region::rect(0.0, 5.0, 5.0, 10.0));

        let id = index.grid_index_to_node_id(&[1, 0]).unwrap();
        assert_eq!(index.region(id).unwrap(), &Region::rect(5.0, 0.0, 10.0, 5.0));

        assert_eq!(index.grid_index_to_node_id(&[2, 0]), None);
        assert_eq!(index.child_identifier(3), Some(NodeId::new(4)));
        assert_eq!(index.child_identifier(4), None);
    }

    #[test]
    fn test_last_cell_ends_on_root_edge() {
        let index = split_index(Region::rect(0.0, 0.0, 1.0, 1.0), 9);
        let last = index.grid_index_to_node_id(&[2, 2]).unwrap();
        assert_eq!(index.region(last).unwrap().highs(), &[1.0, 1.0]);
    }

    #[test]
    fn test_cell_range_clamps() {
        let index = split_index(Region::rect(0.0, 0.0, 10.0, 10.0), 4);

        let (mins, maxs) = index.cell_range(&Region::rect(0.0, 0.0, 10.0, 10.0));
        assert_eq!((mins.as_slice(), maxs.as_slice()), (&[0, 0][..], &[1, 1][..]));

        let (mins, maxs) = index.cell_range(&Region::rect(2.0, 2.0, 3.0, 3.0));
        assert_eq!((mins.as_slice(), maxs.as_slice()), (&[0, 0][..], &[0, 0][..]));

        let (mins, maxs) = index.cell_range(&Region::rect(5.0, 5.0, 10.0, 10.0));
        assert_eq!((mins.as_slice(), maxs.as_slice()), (&[1, 1][..], &[1, 1][..]));
    }

    #[test]
    fn test_cells_in_range() {
        let index = split_index(Region::rect(0.0, 0.0, 9.0, 9.0), 9);
        let ids = index.cells_in_range(&[1, 0], &[2, 1]);
        assert_eq!(
            ids,
            vec![NodeId::new(4), NodeId::new(5), NodeId::new(7), NodeId::new(8)]
        );
    }

    #[test]
    fn test_containing_cells() {
        let index = split_index(Region::rect(0.0, 0.0, 10.0, 10.0), 4);

        let inside = Region::rect(1.0, 1.0, 2.0, 2.0);
        assert_eq!(index.containing_cells(&inside), vec![NodeId::new(1)]);

        let corner = Region::rect(5.0, 5.0, 5.0, 5.0);
        assert_eq!(index.containing_cells(&corner).len(), 4);

        let spanning = Region::rect(4.0, 4.0, 6.0, 6.0);
        assert!(index.containing_cells(&spanning).is_empty());
        assert_eq!(index.overlapping_cells(&spanning).len(), 4);
    }

    #[test]
    fn test_validity_and_reset() {
        let mut index = split_index(Region::rect(0.0, 0.0, 10.0, 10.0), 4);
        assert!(!index.all_cells_valid());

        for id in index.cell_ids().collect::<Vec<_>>() {
            assert!(!index.set_valid(id, true));
        }
        assert!(index.all_cells_valid());
        assert!(index.set_valid(NodeId::new(2), false));
        assert!(!index.all_cells_valid());

        index.reset();
        assert!(!index.is_split());
        assert_eq!(index.node_count(), 1);
        assert!(index.split());
        assert!(index.cell_ids().all(|id| !index.is_valid(id)));
    }
}
