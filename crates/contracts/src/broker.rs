//! JobBroker trait - Delivery client interface
//!
//! Defines the abstract interface for submitting background jobs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Handle assigned by the broker to an accepted job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Submit failure, classified for the retry policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Broker unreachable, connection broken or answered garbage
    #[error("broker connect failed ({addr}): {message}")]
    ConnectFailed { addr: String, message: String },

    /// Broker refused the job
    #[error("broker rejected job: [{code}] {message}")]
    RejectedByBroker { code: String, message: String },

    /// Connect or round-trip took too long
    #[error("broker {operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl DeliveryError {
    pub fn connect_failed(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            addr: addr.into(),
            message: message.into(),
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RejectedByBroker {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        Self::Timeout { operation, after }
    }

    /// Whether a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. } | Self::Timeout { .. })
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } => "connect_failed",
            Self::RejectedByBroker { .. } => "rejected",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Background job submission trait
///
/// Implementations are shared by all dispatcher workers, so `submit` takes
/// `&self`; connection reuse is an internal concern.
#[trait_variant::make(JobBroker: Send)]
pub trait LocalJobBroker {
    /// Broker name (used for logging)
    fn name(&self) -> &str;

    /// Submit a fire-and-forget job
    ///
    /// Returns once the broker has confirmed it queued the job. Nothing is
    /// awaited from the job itself.
    ///
    /// # Errors
    /// Returns a classified [`DeliveryError`]
    async fn submit(&self, job_name: &str, payload: &[u8]) -> Result<JobHandle, DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(DeliveryError::connect_failed("h:1", "refused").is_retryable());
        assert!(DeliveryError::timeout("submit", Duration::from_millis(5)).is_retryable());
        assert!(!DeliveryError::rejected("ERR", "bad payload").is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let err = DeliveryError::timeout("connect", Duration::from_millis(250));
        assert_eq!(err.to_string(), "broker connect timed out after 250ms");
    }
}
