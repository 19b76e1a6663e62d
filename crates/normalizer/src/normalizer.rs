//! EventNormalizer - maps (method, path, destination) to change events

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::{ChangeEvent, ChangeKind, ResourcePath};
use tracing::{debug, instrument};

use crate::error::NormalizationError;
use crate::path::{canonicalize_path, destination_path};

/// Request methods that mutate resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Put,
    Delete,
    Copy,
    Move,
}

impl RequestMethod {
    /// Parse an HTTP method token (case-sensitive, as HTTP methods are)
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "COPY" => Some(Self::Copy),
            "MOVE" => Some(Self::Move),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Copy => "COPY",
            Self::Move => "MOVE",
        }
    }

    fn needs_destination(self) -> bool {
        matches!(self, Self::Copy | Self::Move)
    }
}

/// Stateless apart from the sequence counter shared by every caller.
#[derive(Debug)]
pub struct EventNormalizer {
    next_sequence: AtomicU64,
}

impl EventNormalizer {
    /// Sequences start at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start numbering at `first` (e.g. to continue after a restart)
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_sequence: AtomicU64::new(first),
        }
    }

    /// Sequence the next event would receive
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// Normalize one request into 0, 1 or 2 events.
    ///
    /// Sequences are only allocated after every input has been validated,
    /// so failed requests never burn sequence numbers. The two events of a
    /// MOVE get consecutive sequences, unregister first.
    ///
    /// # Errors
    /// - `MissingDestination` for COPY/MOVE without a usable Destination
    /// - `InvalidPath` when the request path does not canonicalize
    #[instrument(name = "normalize_request", skip(self), level = "debug")]
    pub fn normalize(
        &self,
        method: &str,
        path: &str,
        destination: Option<&str>,
    ) -> Result<Vec<ChangeEvent>, NormalizationError> {
        let Some(method) = RequestMethod::parse(method) else {
            return Ok(Vec::new());
        };

        let source =
            canonicalize_path(path).ok_or_else(|| NormalizationError::invalid_path(path))?;

        let target = if method.needs_destination() {
            let target = destination
                .and_then(destination_path)
                .ok_or_else(|| NormalizationError::missing_destination(method.as_str(), path))?;
            Some(target)
        } else {
            None
        };

        let plan: Vec<(ChangeKind, ResourcePath)> = match (method, target) {
            (RequestMethod::Put, _) => vec![(ChangeKind::Register, source)],
            (RequestMethod::Delete, _) => vec![(ChangeKind::Unregister, source)],
            (RequestMethod::Copy, Some(target)) => vec![(ChangeKind::Register, target)],
            (RequestMethod::Move, Some(target)) => vec![
                (ChangeKind::Unregister, source),
                (ChangeKind::Register, target),
            ],
            // needs_destination() guarantees a target for COPY/MOVE
            (RequestMethod::Copy | RequestMethod::Move, None) => Vec::new(),
        };

        let first = self.allocate(plan.len() as u64);
        // a MOVE's register must not be observed before its unregister
        let events: Vec<ChangeEvent> = plan
            .into_iter()
            .zip(first..)
            .map(|((kind, path), sequence)| {
                let event = ChangeEvent::new(kind, path, sequence);
                if sequence > first {
                    event.with_dependency(sequence - 1)
                } else {
                    event
                }
            })
            .collect();

        debug!(
            method = method.as_str(),
            events = events.len(),
            first_sequence = first,
            "Request normalized"
        );
        Ok(events)
    }

    /// Reserve `count` consecutive sequence numbers, returning the first
    fn allocate(&self, count: u64) -> u64 {
        self.next_sequence.fetch_add(count, Ordering::SeqCst)
    }
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
