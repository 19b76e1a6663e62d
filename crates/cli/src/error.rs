//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Stdin line that is not `METHOD PATH [DESTINATION]`
    #[error("Malformed request on line {line}: {content:?}")]
    MalformedRequest { line: usize, content: String },
}

impl CliError {
    pub fn config_not_found(path: &std::path::Path) -> Self {
        Self::ConfigNotFound {
            path: path.display().to_string(),
        }
    }
}
