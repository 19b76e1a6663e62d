//! Delivery outcomes and shutdown report
//!
//! Dispatcher output, consumed by operators (logs/metrics) and tests.

use serde::{Deserialize, Serialize};

use crate::{ChangeEvent, ChangeKind, ResourcePath};

/// Terminal status of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Broker accepted the job
    Delivered,
    /// Retryable failure, but the retry budget was cut short by shutdown
    Failed,
    /// Rejected by the broker, or retry budget exhausted
    Dropped,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Dropped => "dropped",
        }
    }
}

/// Result of delivering a single event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Event sequence number
    pub event_id: u64,
    pub path: ResourcePath,
    pub kind: ChangeKind,
    pub status: DeliveryStatus,
    /// Number of submit attempts made (0 only if never attempted)
    pub attempts: u32,
    /// Error message of the last failed attempt
    pub last_error: Option<String>,
}

impl DeliveryOutcome {
    pub fn delivered(event: &ChangeEvent, attempts: u32) -> Self {
        Self::from_event(event, DeliveryStatus::Delivered, attempts, None)
    }

    pub fn dropped(event: &ChangeEvent, attempts: u32, last_error: impl Into<String>) -> Self {
        Self::from_event(
            event,
            DeliveryStatus::Dropped,
            attempts,
            Some(last_error.into()),
        )
    }

    pub fn failed(event: &ChangeEvent, attempts: u32, last_error: impl Into<String>) -> Self {
        Self::from_event(
            event,
            DeliveryStatus::Failed,
            attempts,
            Some(last_error.into()),
        )
    }

    fn from_event(
        event: &ChangeEvent,
        status: DeliveryStatus,
        attempts: u32,
        last_error: Option<String>,
    ) -> Self {
        Self {
            event_id: event.sequence(),
            path: event.path().clone(),
            kind: event.kind(),
            status,
            attempts,
            last_error,
        }
    }
}

/// Counts reported by a graceful shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub delivered: u64,
    pub dropped: u64,
    pub failed: u64,
    /// Events still buffered or never started when shutdown finished
    pub pending: u64,
}

impl DispatchReport {
    /// Total events accounted for
    pub fn total(&self) -> u64 {
        self.delivered + self.dropped + self.failed + self.pending
    }
}
