//! Bookkeeping of the grid cells currently being fetched from the source.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

use crate::store::NodeId;

/// Cells claimed by fetches in progress.
///
/// A fetch claims the cells it is about to load. A second fetch overlapping
/// any claimed cell waits until the claim is released; fetches over other
/// cells proceed at once. No lock is held while the claim is outstanding.
pub(crate) struct InFlightFetches {
    cells: Mutex<HashSet<NodeId>>,
    released: Condvar,
}

/// Releases its cells and wakes waiting fetches when dropped.
pub(crate) struct FetchClaim<'a> {
    owner: &'a InFlightFetches,
    cells: Vec<NodeId>,
}

impl InFlightFetches {
    pub(crate) fn new() -> Self {
        InFlightFetches {
            cells: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    /// Claims `cells`, or waits for a conflicting claim to be released.
    ///
    /// Returns `None` after waiting: what the caller was missing may have
    /// been fetched meanwhile, so it has to look again before claiming.
    pub(crate) fn claim(&self, cells: Vec<NodeId>) -> Option<FetchClaim<'_>> {
        let mut claimed = self.cells.lock();
        if cells.iter().any(|id| claimed.contains(id)) {
            self.released.wait(&mut claimed);
            return None;
        }

        claimed.extend(cells.iter().copied());
        Some(FetchClaim { owner: self, cells })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cells.lock().len()
    }
}

impl Drop for FetchClaim<'_> {
    fn drop(&mut self) {
        let mut claimed = self.owner.cells.lock();
        for id in &self.cells {
            claimed.remove(id);
        }
        self.owner.released.notify_all();
    }
}
