//! ChangeEvent - Normalizer output
//!
//! Canonical path change events flowing through the dispatch queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ResourcePath;

/// What the downstream index should do with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Add (or refresh) the path in the index
    Register,
    /// Remove the path from the index
    Unregister,
}

impl ChangeKind {
    /// Broker job name for this kind
    pub fn job_name(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Unregister => "unregister",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

/// A single path change notification.
///
/// Immutable once created: fields are private and only exposed by reference
/// or copy, so events can be handed across tasks without defensive cloning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    kind: ChangeKind,
    path: ResourcePath,
    sequence: u64,
    /// Sequence that must finish delivery before this event may start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after: Option<u64>,
    enqueued_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create an event stamped with the current time
    pub fn new(kind: ChangeKind, path: ResourcePath, sequence: u64) -> Self {
        Self::with_timestamp(kind, path, sequence, Utc::now())
    }

    /// Create an event with an explicit timestamp
    pub fn with_timestamp(
        kind: ChangeKind,
        path: ResourcePath,
        sequence: u64,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            path,
            sequence,
            after: None,
            enqueued_at,
        }
    }

    /// Order this event after `sequence`, which may live on another path.
    ///
    /// Only lower sequences are accepted, so dependencies can never form a
    /// cycle.
    pub fn with_dependency(mut self, sequence: u64) -> Self {
        if sequence < self.sequence {
            self.after = Some(sequence);
        }
        self
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Globally unique, strictly increasing sequence number (also the event id)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Cross-path predecessor, see [`ChangeEvent::with_dependency`]
    pub fn after(&self) -> Option<u64> {
        self.after
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})#{}", self.kind, self.path, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_names() {
        assert_eq!(ChangeKind::Register.job_name(), "register");
        assert_eq!(ChangeKind::Unregister.job_name(), "unregister");
    }

    #[test]
    fn test_display() {
        let event = ChangeEvent::new(ChangeKind::Unregister, "/a".into(), 7);
        assert_eq!(event.to_string(), "unregister(/a)#7");
    }

    #[test]
    fn test_dependency_must_precede() {
        let event = ChangeEvent::new(ChangeKind::Register, "/b".into(), 8).with_dependency(7);
        assert_eq!(event.after(), Some(7));

        let event = ChangeEvent::new(ChangeKind::Register, "/b".into(), 8).with_dependency(9);
        assert_eq!(event.after(), None);
    }

    #[test]
    fn test_kind_serde_snake_case() {
        let json = serde_json::to_string(&ChangeKind::Unregister).unwrap();
        assert_eq!(json, "\"unregister\"");
    }
}
