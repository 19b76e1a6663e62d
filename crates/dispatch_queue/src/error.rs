//! Dispatch queue error types

use contracts::ChangeEvent;
use thiserror::Error;

/// Enqueue refused. The event is handed back so the caller still owns it.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// Buffer above high water (only from `try_enqueue`)
    #[error("queue full, event {0} not accepted")]
    QueueFull(ChangeEvent),

    /// Queue closed for shutdown
    #[error("queue closed, event {0} not accepted")]
    Closed(ChangeEvent),

    /// A later sequence for the same path was already handed out
    #[error("event {0} arrived after a later event for its path was dispatched")]
    OutOfOrder(ChangeEvent),
}

impl EnqueueError {
    /// Take back the rejected event
    pub fn into_event(self) -> ChangeEvent {
        match self {
            Self::QueueFull(event) | Self::Closed(event) | Self::OutOfOrder(event) => event,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}
