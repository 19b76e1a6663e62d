//! OrderedDispatchQueue - per-path ordered buffer with leases and backpressure
//!
//! Layout:
//! - `pending`: path -> events ordered by sequence
//! - `ready`: round-robin ring of paths that have events and no lease
//! - `leased`: paths currently held by a consumer
//! - `parked`: paths whose head event waits on an unfinished sequence
//! - `dispatched`: highest sequence handed out per path; anything at or
//!   below it is refused, so a late producer cannot reorder a path
//!
//! A path with pending events and no lease is either in `ready` or parked.
//! An event stays `outstanding` from acceptance until its lease reports it
//! finished; events depending on it are not handed out before that.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{ChangeEvent, NotifierConfig, ResourcePath};
use tokio::sync::Notify;
use tracing::{debug, instrument, trace};

use crate::batch::{Batch, PathGroup, PathLease};
use crate::error::EnqueueError;

/// Backpressure thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Buffered events at which producers are throttled
    pub high_water: usize,
    /// Buffered events at which throttling is lifted
    pub low_water: usize,
}

impl QueueConfig {
    pub fn new(high_water: usize, low_water: usize) -> Self {
        Self {
            high_water: high_water.max(1),
            low_water: low_water.min(high_water.saturating_sub(1)),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

impl From<&NotifierConfig> for QueueConfig {
    fn from(config: &NotifierConfig) -> Self {
        Self::new(config.queue_high_water, config.low_water())
    }
}

/// Result of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Same (path, sequence) already buffered; not stored twice
    Duplicate,
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub buffered: usize,
    pub ready_paths: usize,
    pub leased_paths: usize,
    pub parked_paths: usize,
    pub accepted: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub throttled: bool,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<ResourcePath, BTreeMap<u64, ChangeEvent>>,
    ready: VecDeque<ResourcePath>,
    leased: HashSet<ResourcePath>,
    /// Accepted, unfinished sequences (count per sequence)
    outstanding: HashMap<u64, u32>,
    /// Dependency sequence -> paths waiting for it
    parked: HashMap<u64, Vec<ResourcePath>>,
    parked_on: HashMap<ResourcePath, u64>,
    dispatched: HashMap<ResourcePath, u64>,
    len: usize,
    throttled: bool,
    closed: bool,
    accepted: u64,
    duplicates: u64,
    out_of_order: u64,
}

impl QueueState {
    /// Unfinished dependency of the head event of `path`
    fn head_blocker(&self, path: &ResourcePath) -> Option<u64> {
        let (_, head) = self.pending.get(path)?.first_key_value()?;
        head.after().filter(|dep| self.outstanding.contains_key(dep))
    }

    /// Route an unleased path with pending events. True if it became ready.
    fn schedule(&mut self, path: ResourcePath) -> bool {
        self.unpark(&path);
        match self.head_blocker(&path) {
            Some(dep) => {
                self.park(path, dep);
                false
            }
            None => {
                self.ready.push_back(path);
                true
            }
        }
    }

    fn park(&mut self, path: ResourcePath, dep: u64) {
        trace!(path = %path, after = dep, "Path parked behind unfinished event");
        self.parked.entry(dep).or_default().push(path.clone());
        self.parked_on.insert(path, dep);
    }

    fn unpark(&mut self, path: &ResourcePath) {
        let Some(dep) = self.parked_on.remove(path) else {
            return;
        };
        if let Some(paths) = self.parked.get_mut(&dep) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.parked.remove(&dep);
            }
        }
    }

    /// Mark one acceptance of `sequence` finished. True if a path became ready.
    fn finish(&mut self, sequence: u64) -> bool {
        match self.outstanding.get_mut(&sequence) {
            Some(count) if *count > 1 => {
                *count -= 1;
                return false;
            }
            Some(_) => {
                self.outstanding.remove(&sequence);
            }
            None => return false,
        }

        let mut woke = false;
        for path in self.parked.remove(&sequence).unwrap_or_default() {
            self.parked_on.remove(&path);
            woke |= self.schedule(path);
        }
        woke
    }
}

/// Multi-producer, multi-consumer queue preserving per-path order
#[derive(Debug)]
pub struct OrderedDispatchQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Throttle lifted or queue closed
    space_available: Notify,
    /// A path became ready or the queue closed
    events_ready: Notify,
}

impl OrderedDispatchQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            space_available: Notify::new(),
            events_ready: Notify::new(),
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Enqueue, waiting while the queue is throttled.
    ///
    /// # Errors
    /// `EnqueueError::Closed` once the queue is closed (including while waiting)
    #[instrument(
        name = "dispatch_queue_enqueue",
        skip(self, event),
        fields(path = %event.path(), sequence = event.sequence()),
        level = "trace"
    )]
    pub async fn enqueue(&self, event: ChangeEvent) -> Result<Enqueued, EnqueueError> {
        let mut event = event;
        loop {
            // Register interest before checking state so a concurrent
            // notify_waiters() between the check and the await is not lost.
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_enqueue(event) {
                Err(EnqueueError::QueueFull(rejected)) => {
                    trace!(sequence = rejected.sequence(), "Queue throttled, producer waiting");
                    event = rejected;
                    notified.await;
                }
                other => return other,
            }
        }
    }

    /// Enqueue without waiting.
    ///
    /// A sequence equal to the last one handed out for its path counts as a
    /// duplicate; a lower one is refused.
    ///
    /// # Errors
    /// - `QueueFull` while throttled
    /// - `Closed` after `close()`
    /// - `OutOfOrder` when a later event for the path was already dequeued
    pub fn try_enqueue(&self, event: ChangeEvent) -> Result<Enqueued, EnqueueError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.closed {
            return Err(EnqueueError::Closed(event));
        }

        let last_dispatched = state.dispatched.get(event.path().as_str()).copied();
        if last_dispatched.is_some_and(|last| event.sequence() < last) {
            state.out_of_order += 1;
            return Err(EnqueueError::OutOfOrder(event));
        }

        let is_duplicate = last_dispatched == Some(event.sequence())
            || state
                .pending
                .get(event.path().as_str())
                .is_some_and(|events| events.contains_key(&event.sequence()));
        if is_duplicate {
            state.duplicates += 1;
            debug!(
                path = %event.path(),
                sequence = event.sequence(),
                "Duplicate event ignored"
            );
            return Ok(Enqueued::Duplicate);
        }

        if state.throttled {
            return Err(EnqueueError::QueueFull(event));
        }

        let path = event.path().clone();
        let sequence = event.sequence();
        let events = state.pending.entry(path.clone()).or_default();
        let was_empty = events.is_empty();
        let is_new_head = events
            .first_key_value()
            .map_or(true, |(&head, _)| sequence < head);
        events.insert(sequence, event);

        state.len += 1;
        state.accepted += 1;
        *state.outstanding.entry(sequence).or_default() += 1;

        // a ready path re-checks its head when it is popped
        let reroute = !state.leased.contains(&path)
            && is_new_head
            && (was_empty || state.parked_on.contains_key(&path));
        let became_ready = reroute && state.schedule(path);
        if state.len >= self.config.high_water && !state.throttled {
            state.throttled = true;
            debug!(
                buffered = state.len,
                high_water = self.config.high_water,
                "Queue reached high water, throttling producers"
            );
        }
        drop(guard);

        if became_ready {
            self.events_ready.notify_one();
        }
        Ok(Enqueued::Accepted)
    }

    /// Wait for the next batch.
    ///
    /// Returns `None` once the queue is closed and nothing is buffered.
    pub async fn dequeue_batch(self: &Arc<Self>, max_n: usize) -> Option<Batch> {
        loop {
            let notified = self.events_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(batch) = self.try_dequeue_batch(max_n) {
                return Some(batch);
            }
            {
                let state = self.lock();
                if state.closed && state.len == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take up to `max_n` events without waiting.
    ///
    /// Selection is round-robin: one event from each ready path per round,
    /// paths taken in ring order. A path's group stops at the first event
    /// whose dependency is still unfinished. Every path touched is leased to
    /// the returned batch until its `PathLease` drops.
    pub fn try_dequeue_batch(self: &Arc<Self>, max_n: usize) -> Option<Batch> {
        if max_n == 0 {
            return None;
        }

        let mut guard = self.lock();
        let state = &mut *guard;

        let mut paths = Vec::new();
        while paths.len() < max_n {
            let Some(path) = state.ready.pop_front() else {
                break;
            };
            if let Some(dep) = state.head_blocker(&path) {
                state.park(path, dep);
                continue;
            }
            state.leased.insert(path.clone());
            paths.push(path);
        }
        if paths.is_empty() {
            return None;
        }

        let mut groups: Vec<Vec<ChangeEvent>> = paths.iter().map(|_| Vec::new()).collect();
        let mut taken = 0;
        'rounds: loop {
            let mut progressed = false;
            for (path, group) in paths.iter().zip(groups.iter_mut()) {
                if taken == max_n {
                    break 'rounds;
                }
                let Some(next) = state
                    .pending
                    .get_mut(path)
                    .and_then(|events| events.first_entry())
                else {
                    continue;
                };
                let blocked = next.get().after().is_some_and(|dep| {
                    state.outstanding.contains_key(&dep)
                        && !group.iter().any(|e| e.sequence() == dep)
                });
                if blocked {
                    continue;
                }
                group.push(next.remove());
                taken += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        for (path, group) in paths.iter().zip(&groups) {
            if let Some(last) = group.last() {
                state.dispatched.insert(path.clone(), last.sequence());
            }
        }

        state.len -= taken;
        let lifted = state.throttled && state.len <= self.config.low_water;
        if lifted {
            state.throttled = false;
        }
        let more_ready = !state.ready.is_empty();
        let drained = state.closed && state.len == 0;
        let remaining = state.len;
        drop(guard);

        if lifted {
            debug!(
                buffered = remaining,
                low_water = self.config.low_water,
                "Queue drained to low water, releasing producers"
            );
            self.space_available.notify_waiters();
        }
        if more_ready {
            self.events_ready.notify_one();
        }
        if drained {
            self.events_ready.notify_waiters();
        }

        let groups = paths
            .into_iter()
            .zip(groups)
            .map(|(path, events)| {
                let sequences = events.iter().map(ChangeEvent::sequence).collect();
                let lease = PathLease::new(Arc::clone(self), path.clone(), sequences);
                PathGroup::new(path, events, lease)
            })
            .collect();
        Some(Batch::new(groups))
    }

    /// Mark a dequeued event finished; called by `PathLease::complete`
    pub(crate) fn complete(&self, sequence: u64) {
        let woke = self.lock().finish(sequence);
        if woke {
            self.events_ready.notify_one();
        }
    }

    /// Release a path lease, finishing `unfinished`; called by `PathLease::drop`
    pub(crate) fn release(&self, path: &ResourcePath, unfinished: &[u64]) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let mut woke = false;
        for &sequence in unfinished {
            woke |= state.finish(sequence);
        }
        if state.leased.remove(path) {
            if state.pending.get(path).is_some_and(|events| !events.is_empty()) {
                woke |= state.schedule(path.clone());
            } else {
                state.pending.remove(path);
            }
        }
        drop(guard);

        if woke {
            self.events_ready.notify_one();
        }
    }

    /// Stop accepting events. Buffered events stay drainable.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let buffered = state.len;
        drop(state);

        debug!(buffered, "Dispatch queue closed");
        self.space_available.notify_waiters();
        self.events_ready.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Buffered (not yet dequeued) events
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_throttled(&self) -> bool {
        self.lock().throttled
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            buffered: state.len,
            ready_paths: state.ready.len(),
            leased_paths: state.leased.len(),
            parked_paths: state.parked_on.len(),
            accepted: state.accepted,
            duplicates: state.duplicates,
            out_of_order: state.out_of_order,
            throttled: state.throttled,
            closed: state.closed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OrderedDispatchQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
