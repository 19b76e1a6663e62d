//! Dispatcher error types

use contracts::DeliveryError;
use thiserror::Error;

/// Startup errors. Nothing after startup is surfaced as an error.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Settings the dispatcher cannot run with
    #[error("invalid dispatcher config '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    /// Broker check at startup failed
    #[error("broker unavailable: {0}")]
    Delivery(#[from] DeliveryError),
}

impl DispatcherError {
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}
