//! CLI-specific error types

use thiserror::Error;

/// Errors that can occur during CLI operations
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] strata_core::ConfigError),

    /// Migration engine error
    #[error("{0}")]
    Migration(#[from] strata_core::Error),

    /// JSON output error
    #[error("Output error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (filesystem, stdout, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            _ => 1,
        }
    }
}
