//! Error types for migration operations

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while loading, applying or administering migrations
#[derive(Debug, Error)]
pub enum Error {
    /// The configured migration directory does not exist
    #[error("Migration directory does not exist: {0}")]
    MissingMigrationDirectory(PathBuf),

    /// The ledger table does not exist and bootstrapping was disabled
    #[error("Migration table '{0}' does not exist")]
    MissingMigrationTable(String),

    /// The requested id is unknown to the registry
    #[error("Migration not found: {0}")]
    MigrationNotFound(String),

    /// A migration (or one of its dependencies) has no definition
    #[error("Migration '{0}' has no definition")]
    MissingMigration(String),

    /// A dependency is defined but has not been applied
    #[error("Migration '{migration}' depends on '{dependency}', which has not been applied")]
    UnmetDependency {
        migration: String,
        dependency: String,
    },

    /// Non-transactional migrations cannot be tested
    #[error("Migration '{0}' is not transactional and cannot be tested")]
    UntestableMigration(String),

    /// The migration does not support rollback
    #[error("Migration '{id}' cannot be rolled back{}", reason_suffix(.reason))]
    IrreversibleMigration { id: String, reason: Option<String> },

    /// A transactional body committed or rolled back the transaction it runs in
    #[error("Migration '{id}' ends the transaction it runs in{}", reason_suffix(.statement))]
    TransactionEnded {
        id: String,
        statement: Option<String>,
    },

    /// Compiled-in migrations cannot be removed
    #[error("Migration '{0}' is compiled in and cannot be removed")]
    RegisteredMigration(String),

    /// The migration is already applied
    #[error("Migration '{0}' has already been applied")]
    AlreadyApplied(String),

    /// The migration is not applied, so there is nothing to roll back
    #[error("Migration '{0}' has not been applied")]
    NotApplied(String),

    /// A newly generated id is already taken
    #[error("Migration id '{0}' already exists")]
    DuplicateMigrationId(String),

    /// A generated id does not match the configured id format
    #[error("Migration id '{id}' does not match the configured format '{pattern}'")]
    InvalidMigrationId { id: String, pattern: String },

    /// A definition file could not be parsed
    #[error("Invalid migration definition '{path}': {message}")]
    InvalidDefinition { path: PathBuf, message: String },

    /// A ledger row holds a run date that cannot be parsed
    #[error("Invalid run date '{value}' recorded for migration '{id}'")]
    InvalidRunDate { id: String, value: String },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generic SQLite error wrapper
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

impl Error {
    /// Returns true if the error reports an unknown migration id
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::MigrationNotFound(_))
    }
}
