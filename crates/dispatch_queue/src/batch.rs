//! Batch / PathGroup / PathLease - dequeue results

use std::fmt;
use std::sync::Arc;

use contracts::{ChangeEvent, ResourcePath};

use crate::queue::OrderedDispatchQueue;

/// Exclusive hold on one path.
///
/// Dropping it releases the path and finishes every event of the group not
/// already reported through [`PathLease::complete`].
pub struct PathLease {
    queue: Arc<OrderedDispatchQueue>,
    path: ResourcePath,
    unfinished: Vec<u64>,
}

impl PathLease {
    pub(crate) fn new(
        queue: Arc<OrderedDispatchQueue>,
        path: ResourcePath,
        unfinished: Vec<u64>,
    ) -> Self {
        Self {
            queue,
            path,
            unfinished,
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Report one event of this group as finished, so events on other
    /// paths that wait for it can be handed out before the lease drops.
    pub fn complete(&mut self, sequence: u64) {
        if let Some(pos) = self.unfinished.iter().position(|&s| s == sequence) {
            self.unfinished.swap_remove(pos);
            self.queue.complete(sequence);
        }
    }
}

impl Drop for PathLease {
    fn drop(&mut self) {
        self.queue.release(&self.path, &self.unfinished);
    }
}

impl fmt::Debug for PathLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathLease")
            .field("path", &self.path)
            .field("unfinished", &self.unfinished)
            .finish()
    }
}

/// Events of a single path, in sequence order, plus the lease on that path
#[derive(Debug)]
pub struct PathGroup {
    path: ResourcePath,
    events: Vec<ChangeEvent>,
    lease: PathLease,
}

impl PathGroup {
    pub(crate) fn new(path: ResourcePath, events: Vec<ChangeEvent>, lease: PathLease) -> Self {
        Self {
            path,
            events,
            lease,
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Split into events and lease. Keep the lease alive until the events
    /// have been fully handled.
    pub fn into_parts(self) -> (Vec<ChangeEvent>, PathLease) {
        (self.events, self.lease)
    }
}

/// One dequeue result: one group per leased path
#[derive(Debug)]
pub struct Batch {
    groups: Vec<PathGroup>,
}

impl Batch {
    pub(crate) fn new(groups: Vec<PathGroup>) -> Self {
        Self { groups }
    }

    /// Total events
    pub fn len(&self) -> usize {
        self.groups.iter().map(PathGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path_count(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[PathGroup] {
        &self.groups
    }

    pub fn into_groups(self) -> Vec<PathGroup> {
        self.groups
    }
}

impl IntoIterator for Batch {
    type Item = PathGroup;
    type IntoIter = std::vec::IntoIter<PathGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}
