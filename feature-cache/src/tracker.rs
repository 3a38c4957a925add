//! Cache bookkeeping on top of the grid index.
//!
//! The tracker owns the grid, the node store and the eviction policy. All
//! node contents pass through [`GridTracker::read_node`] and
//! [`GridTracker::write_node`], which report the access to the policy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{CacheError, CacheResult};
use crate::eviction::EvictionPolicy;
use crate::feature::{Feature, FeatureCollection, FeatureId};
use crate::grid::{GridIndex, GridNode, Visitor};
use crate::region::Region;
use crate::store::{NodeId, NodeStore};

pub struct GridTracker {
    index: GridIndex,
    store: Arc<dyn NodeStore>,
    policy: Mutex<Box<dyn EvictionPolicy>>,
    record_access: bool,
    /// Features held by valid cells and the root overflow list
    data: usize,
    /// Features held by the root because they span cells
    overflow: usize,
    /// Node holding each cached feature, so a re-fetched feature replaces
    /// its earlier copy wherever that copy lives
    locations: HashMap<FeatureId, NodeId>,
    evictions: u64,
    rejected_inserts: u64,
}

impl GridTracker {
    /// Creates a tracker over `root_region`, split into at most
    /// `index_capacity` cells. The store is cleared.
    pub fn new(
        root_region: Region,
        index_capacity: usize,
        store: Arc<dyn NodeStore>,
        policy: Box<dyn EvictionPolicy>,
    ) -> CacheResult<GridTracker> {
        let mut index = GridIndex::new(root_region, index_capacity)?;
        index.split();
        store.clear()?;

        Ok(GridTracker {
            index,
            store,
            policy: Mutex::new(policy),
            record_access: true,
            data: 0,
            overflow: 0,
            locations: HashMap::new(),
            evictions: 0,
            rejected_inserts: 0,
        })
    }

    pub fn root_region(&self) -> &Region {
        self.index.root_region()
    }

    pub fn index(&self) -> &GridIndex {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn data_count(&self) -> usize {
        self.data
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn rejected_inserts(&self) -> u64 {
        self.rejected_inserts
    }

    pub fn node_count(&self) -> usize {
        self.index.node_count()
    }

    pub fn valid_node_count(&self) -> usize {
        self.index
            .node_ids()
            .filter(|id| self.index.is_valid(*id))
            .count()
    }

    pub fn is_valid(&self, id: NodeId) -> bool {
        self.index.is_valid(id)
    }

    pub fn is_recording_access(&self) -> bool {
        self.record_access
    }

    /// Ids tracked by the eviction policy.
    pub fn tracked_nodes(&self) -> usize {
        self.policy.lock().len()
    }

    /// Runs `f` with access recording suspended.
    pub fn without_access_recording<R>(
        &mut self,
        f: impl FnOnce(&mut GridTracker) -> CacheResult<R>,
    ) -> CacheResult<R> {
        let recording = std::mem::replace(&mut self.record_access, false);
        let result = f(self);
        self.record_access = recording;
        result
    }

    /// Reads and decodes a node. Missing nodes read as empty.
    pub fn read_node(&self, id: NodeId) -> CacheResult<GridNode> {
        let node = self.load_node(id)?;
        self.touch(id);
        Ok(node)
    }

    pub fn write_node(&self, id: NodeId, node: &GridNode) -> CacheResult<()> {
        self.store.write(id, &node.encode()?)?;
        self.touch(id);
        Ok(())
    }

    fn load_node(&self, id: NodeId) -> CacheResult<GridNode> {
        match self.store.read(id)? {
            Some(bytes) => GridNode::decode(&bytes),
            None => Ok(GridNode::new()),
        }
    }

    fn touch(&self, id: NodeId) {
        if self.record_access {
            self.policy.lock().access(id);
        }
    }

    /// Regions of the cells overlapped by `search_region` that are not
    /// cached.
    ///
    /// `search_region` must lie within the root region. While no valid cell
    /// has been met, the first two missing regions are folded into their
    /// combined region as soon as a second one is collected, so a query that
    /// misses entirely yields a single region. Once a valid cell is met the
    /// remaining missing cells are reported individually.
    pub fn search_missing_tiles(&self, search_region: &Region) -> Vec<Region> {
        if self.index.is_valid(NodeId::ROOT)
            || search_region.dimension() != self.root_region().dimension()
        {
            return Vec::new();
        }

        let (mins, maxs) = self.index.cell_range(search_region);
        let mut missing: Vec<Region> = Vec::new();
        let mut found_valid = false;

        for id in self.index.cells_in_range(&mins, &maxs) {
            let Some(record) = self.index.record(id) else {
                continue;
            };
            if record.valid {
                found_valid = true;
                continue;
            }

            missing.push(record.region.clone());
            if !found_valid && missing.len() > 1 {
                let combined = missing[0].combined_region(&missing[1]);
                missing.clear();
                missing.push(combined);
            }
        }
        missing
    }

    /// Number of cells lying entirely within `region`.
    pub fn contained_cell_count(&self, region: &Region) -> usize {
        self.index
            .overlapping_cells(region)
            .into_iter()
            .filter(|id| self.index.region(*id).is_some_and(|r| region.contains(r)))
            .count()
    }

    /// Ids of the cells overlapped by `search_region` that are not cached.
    pub fn missing_cells(&self, search_region: &Region) -> Vec<NodeId> {
        if self.index.is_valid(NodeId::ROOT)
            || search_region.dimension() != self.root_region().dimension()
        {
            return Vec::new();
        }

        let (mins, maxs) = self.index.cell_range(search_region);
        self.index
            .cells_in_range(&mins, &maxs)
            .into_iter()
            .filter(|id| !self.index.is_valid(*id))
            .collect()
    }

    /// Drops the contents of cell `id` and marks it invalid, returning the
    /// number of features freed. Evicting an invalid cell does nothing.
    pub fn evict(&mut self, id: NodeId) -> CacheResult<usize> {
        if id.is_root() {
            return Err(CacheError::InvalidOperation(
                "the grid root cannot be evicted".into(),
            ));
        }
        if !self.index.is_valid(id) {
            return Ok(0);
        }

        let freed = self.drop_node(id)?;
        let trimmed = self.trim_overflow()?;
        self.evictions += 1;
        log::debug!(
            "Evicted {} ({} features, {} spanning features dropped)",
            id,
            freed,
            trimmed
        );
        Ok(freed + trimmed)
    }

    /// Evicts the least recently used valid cell, if there is one.
    pub fn evict_lru(&mut self) -> CacheResult<Option<NodeId>> {
        let victim = {
            let index = &self.index;
            self.policy
                .lock()
                .select_victim(&|id| !id.is_root() && index.is_valid(id))
        };

        match victim {
            Some(id) => {
                self.evict(id)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Evicts least recently used cells until `incoming` more features fit
    /// within `capacity`. Returns the number of evicted cells.
    ///
    /// Each cell can be evicted at most once, so the loop ends after as many
    /// rounds as there are nodes even if the data count cannot be brought
    /// down far enough.
    pub fn make_room(&mut self, capacity: usize, incoming: usize) -> CacheResult<usize> {
        let limit = capacity.saturating_sub(incoming);
        let rounds = self.index.node_count();

        self.without_access_recording(|tracker| {
            let mut evicted = 0;
            for _ in 0..rounds {
                if tracker.data <= limit {
                    break;
                }
                match tracker.evict_lru()? {
                    Some(_) => evicted += 1,
                    None => {
                        log::debug!(
                            "No eviction candidate left with {} cached features",
                            tracker.data
                        );
                        break;
                    }
                }
            }
            Ok(evicted)
        })
    }

    /// Applies `visitor` to every node in its scope, returning how many
    /// nodes changed state.
    pub fn accept(&mut self, visitor: &Visitor) -> CacheResult<usize> {
        let targets: Vec<NodeId> = self
            .index
            .cell_ids()
            .filter(|id| {
                self.index
                    .record(*id)
                    .is_some_and(|r| visitor.visits(&r.region) && visitor.changes(r.valid))
            })
            .collect();

        match visitor {
            Visitor::Validating(_) => {
                for id in &targets {
                    self.write_node(*id, &GridNode::new())?;
                    self.index.set_valid(*id, true);
                }
                if self.index.all_cells_valid() {
                    self.index.set_valid(NodeId::ROOT, true);
                }
            }
            Visitor::Invalidating(_) => {
                let whole_grid = visitor.visits(self.index.root_region());
                self.without_access_recording(|tracker| {
                    for id in &targets {
                        tracker.drop_node(*id)?;
                    }
                    if whole_grid {
                        tracker.index.set_valid(NodeId::ROOT, false);
                        tracker.clear_overflow()?;
                    } else {
                        tracker.trim_overflow()?;
                    }
                    Ok(())
                })?;
            }
        }

        if !targets.is_empty() {
            log::debug!("{} changed {} nodes", visitor, targets.len());
        }
        Ok(targets.len())
    }

    /// Routes `feature` to the cell containing its bounds, preferring a valid
    /// cell when the bounds lie on a border. Features spanning several cells
    /// go to the root's overflow list. Returns `false` if the feature was
    /// refused.
    pub fn insert(&mut self, feature: Feature) -> CacheResult<bool> {
        if !self.index.root_region().contains(feature.bounds()) {
            return Ok(self.reject(&feature, "outside the grid root"));
        }

        let candidates = self.index.containing_cells(feature.bounds());
        if let Some(first) = candidates.first().copied() {
            let target = candidates
                .iter()
                .copied()
                .find(|id| self.index.is_valid(*id))
                .unwrap_or(first);
            return self.insert_data(target, feature);
        }

        if self.any_overlapped_cell_valid(feature.bounds()) {
            self.insert_overflow(feature)
        } else {
            Ok(self.reject(&feature, "spans only uncached cells"))
        }
    }

    /// Stores `feature` in cell `id`, replacing an entry with the same id in
    /// this or any other node.
    ///
    /// A cell that is not valid refuses the insert and `false` is returned.
    pub fn insert_data(&mut self, id: NodeId, feature: Feature) -> CacheResult<bool> {
        if id.is_root() {
            return Err(CacheError::InvalidOperation(
                "features are inserted into cells, not the root".into(),
            ));
        }
        if !self.index.is_valid(id) {
            let reason = format!("{} is not valid", id);
            return Ok(self.reject(&feature, &reason));
        }

        self.forget_stale_copy(feature.id(), id)?;
        let feature_id = feature.id().clone();
        let mut node = self.read_node(id)?;
        let added = node.insert(feature);
        self.write_node(id, &node)?;
        if added {
            self.data += 1;
        }
        self.locations.insert(feature_id, id);
        Ok(true)
    }

    /// Cached features intersecting `region`.
    pub fn query(&self, region: &Region) -> CacheResult<FeatureCollection> {
        let mut result = FeatureCollection::new();

        for id in self.index.cell_ids() {
            let Some(record) = self.index.record(id) else {
                continue;
            };
            if !record.valid || !record.region.intersects(region) {
                continue;
            }
            let node = self.read_node(id)?;
            for feature in node.intersecting(region) {
                result.push(feature.clone());
            }
        }

        if self.overflow > 0 {
            let root = self.read_node(NodeId::ROOT)?;
            for feature in root.intersecting(region) {
                result.push(feature.clone());
            }
        }
        Ok(result)
    }

    /// Resets the grid to its freshly split state.
    pub fn clear(&mut self) -> CacheResult<()> {
        self.store.clear()?;
        self.policy.lock().clear();
        self.index.reset();
        self.index.split();

        self.data = 0;
        self.overflow = 0;
        self.locations.clear();
        self.evictions = 0;
        self.rejected_inserts = 0;
        log::debug!("Cleared grid over {}", self.index.root_region());
        Ok(())
    }

    pub fn flush(&self) -> CacheResult<()> {
        self.store.flush()
    }

    fn reject(&mut self, feature: &Feature, reason: &str) -> bool {
        self.rejected_inserts += 1;
        log::debug!("Rejected insert of feature {}: {}", feature.id(), reason);
        false
    }

    fn any_overlapped_cell_valid(&self, bounds: &Region) -> bool {
        self.index
            .overlapping_cells(bounds)
            .iter()
            .any(|id| self.index.is_valid(*id))
    }

    fn insert_overflow(&mut self, feature: Feature) -> CacheResult<bool> {
        self.forget_stale_copy(feature.id(), NodeId::ROOT)?;
        let feature_id = feature.id().clone();
        let mut root = self.read_node(NodeId::ROOT)?;
        let added = root.insert(feature);
        self.write_node(NodeId::ROOT, &root)?;
        if added {
            self.overflow += 1;
            self.data += 1;
        }
        self.locations.insert(feature_id, NodeId::ROOT);
        Ok(true)
    }

    /// Removes the copy of `feature_id` held by a node other than `target`.
    fn forget_stale_copy(&mut self, feature_id: &FeatureId, target: NodeId) -> CacheResult<()> {
        let Some(previous) = self.locations.get(feature_id).copied() else {
            return Ok(());
        };
        if previous == target {
            return Ok(());
        }

        let mut node = self.load_node(previous)?;
        if node.remove(feature_id).is_some() {
            self.store.write(previous, &node.encode()?)?;
            self.data = self.data.saturating_sub(1);
            if previous.is_root() {
                self.overflow = self.overflow.saturating_sub(1);
            }
            log::debug!("Moved feature {} out of {}", feature_id, previous);
        }
        self.locations.remove(feature_id);
        Ok(())
    }

    fn forget_locations<'a>(&mut self, id: NodeId, features: impl IntoIterator<Item = &'a Feature>) {
        for feature in features {
            if self.locations.get(feature.id()) == Some(&id) {
                self.locations.remove(feature.id());
            }
        }
    }

    /// Clears a cell and marks it (and with it the root) invalid.
    fn drop_node(&mut self, id: NodeId) -> CacheResult<usize> {
        let node = self.load_node(id)?;
        let count = node.len();
        self.forget_locations(id, node.entries());
        self.store.remove(id)?;
        self.index.set_valid(id, false);
        self.index.set_valid(NodeId::ROOT, false);
        self.policy.lock().forget(id);
        self.data = self.data.saturating_sub(count);
        Ok(count)
    }

    /// Drops overflow features none of whose cells is still valid.
    fn trim_overflow(&mut self) -> CacheResult<usize> {
        if self.overflow == 0 {
            return Ok(0);
        }

        let mut root = self.load_node(NodeId::ROOT)?;
        let mut gone = Vec::new();
        let dropped = root.retain(|f| {
            let keep = self.any_overlapped_cell_valid(f.bounds());
            if !keep {
                gone.push(f.clone());
            }
            keep
        });
        if dropped > 0 {
            self.forget_locations(NodeId::ROOT, &gone);
            self.write_node(NodeId::ROOT, &root)?;
            self.overflow = self.overflow.saturating_sub(dropped);
            self.data = self.data.saturating_sub(dropped);
        }
        Ok(dropped)
    }

    fn clear_overflow(&mut self) -> CacheResult<()> {
        if self.overflow > 0 {
            let root = self.load_node(NodeId::ROOT)?;
            self.forget_locations(NodeId::ROOT, root.entries());
            self.store.remove(NodeId::ROOT)?;
            self.data = self.data.saturating_sub(self.overflow);
            self.overflow = 0;
        }
        Ok(())
    }
}
