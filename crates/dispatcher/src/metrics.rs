//! Dispatch metrics for observability
//!
//! In-process counters, readable at any time. Prometheus export happens
//! separately through `observability::metrics`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{DeliveryOutcome, DeliveryStatus, ResourcePath};
use observability::{RunningStats, StatsSummary};

/// Counters shared by the notifier and all workers
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Events accepted by the queue
    enqueued: AtomicU64,
    /// Events already buffered under the same (path, sequence)
    duplicates: AtomicU64,
    /// Events refused because the queue was closed
    rejected: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    /// Extra attempts beyond the first
    retries: AtomicU64,
    /// Dequeued events without a terminal outcome yet
    in_flight: AtomicU64,
    /// Last error per path, for Dropped/Failed outcomes
    last_errors: Mutex<HashMap<ResourcePath, String>>,
    /// Attempts per terminal outcome
    attempts: Mutex<RunningStats>,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch of `n` events left the queue
    pub fn add_in_flight(&self, n: usize) {
        self.in_flight.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Count a terminal outcome and move it out of `in_flight`
    pub fn record_outcome(&self, outcome: &DeliveryOutcome) {
        let counter = match outcome.status {
            DeliveryStatus::Delivered => &self.delivered,
            DeliveryStatus::Dropped => &self.dropped,
            DeliveryStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.retries.fetch_add(
            u64::from(outcome.attempts.saturating_sub(1)),
            Ordering::Relaxed,
        );
        // never below zero even if an outcome is recorded without add_in_flight
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });

        if let Some(error) = &outcome.last_error {
            self.lock_errors()
                .insert(outcome.path.clone(), error.clone());
        }
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(f64::from(outcome.attempts));
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Last recorded error for `path`
    pub fn last_error(&self, path: &str) -> Option<String> {
        self.lock_errors().get(path).cloned()
    }

    pub fn last_errors(&self) -> HashMap<ResourcePath, String> {
        self.lock_errors().clone()
    }

    /// Distribution of attempts per finished event
    pub fn attempts_summary(&self) -> StatsSummary {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }

    fn lock_errors(&self) -> MutexGuard<'_, HashMap<ResourcePath, String>> {
        self.last_errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
    pub retries: u64,
    pub in_flight: u64,
}
