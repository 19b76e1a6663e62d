//! Normalizer error types

use thiserror::Error;

/// Request could not be turned into events.
///
/// Never fatal: the originating request proceeds unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    /// COPY/MOVE without a usable Destination header
    #[error("{method} request for '{path}' has no usable Destination header")]
    MissingDestination { method: String, path: String },

    /// Request path is not an absolute, decodable path
    #[error("invalid request path '{path}'")]
    InvalidPath { path: String },
}

impl NormalizationError {
    pub fn missing_destination(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::MissingDestination {
            method: method.into(),
            path: path.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }
}
