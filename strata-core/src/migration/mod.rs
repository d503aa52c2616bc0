//! Migration definitions and their in-memory state
//!
//! A definition is any value implementing [`Migration`]: the SQL files parsed by
//! [`SqlMigration`], the built-in [`RootMigration`], or compiled-in migrations
//! registered through [`crate::MigratorBuilder::register`]. The registry wraps each
//! definition in a [`MigrationUnit`] together with its ledger run date. Ids known to
//! the ledger but without a definition become [`MigrationUnit::Missing`].

mod root;
mod sql;

pub use root::{RootMigration, ROOT_MIGRATION_ID};
pub use sql::{SqlMigration, DEFAULT_TEMPLATE};
pub(crate) use sql::render_template;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::Arc;

/// Description shown for ids that have no definition
pub const MISSING_DESCRIPTION: &str = "Missing migration file.";

/// Descriptive metadata shared by every definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    pub id: String,
    pub description: String,
    pub author: String,
    pub ticket: String,
    /// Whether apply/rollback run inside a transaction
    pub transactional: bool,
    /// Ids that must be applied first
    pub dependencies: Vec<String>,
}

impl MigrationInfo {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            author: String::new(),
            ticket: String::new(),
            transactional: true,
            dependencies: Vec::new(),
        }
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn ticket(mut self, ticket: impl Into<String>) -> Self {
        self.ticket = ticket.into();
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// A migration definition: metadata plus forward and backward behavior
///
/// The connection passed to [`apply`](Migration::apply) and
/// [`rollback`](Migration::rollback) is an open transaction for transactional
/// migrations and the bare connection otherwise.
pub trait Migration: Send + Sync {
    /// Metadata for this migration
    fn info(&self) -> &MigrationInfo;

    /// Apply the change
    fn apply(&self, conn: &Connection) -> Result<()>;

    /// Undo the change.
    ///
    /// Implementations without an undo path return [`Error::IrreversibleMigration`].
    fn rollback(&self, conn: &Connection) -> Result<()>;
}

/// Run state of a migration, derived from its ledger run date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Unapplied,
    Applied,
}

/// A definition known to the registry, with its run date
#[derive(Clone)]
pub struct ConcreteMigration {
    definition: Arc<dyn Migration>,
    run_date: Option<DateTime<Utc>>,
}

/// An id present in the ledger with no definition
#[derive(Debug, Clone)]
pub struct MissingMigration {
    id: String,
    run_date: Option<DateTime<Utc>>,
}

/// Registry entry for one migration id
#[derive(Clone)]
pub enum MigrationUnit {
    Concrete(ConcreteMigration),
    Missing(MissingMigration),
}

impl MigrationUnit {
    /// Wrap a definition as an unapplied unit
    pub fn concrete(definition: Arc<dyn Migration>) -> Self {
        Self::Concrete(ConcreteMigration {
            definition,
            run_date: None,
        })
    }

    /// Create a placeholder for an id without a definition
    pub fn missing(id: impl Into<String>) -> Self {
        Self::Missing(MissingMigration {
            id: id.into(),
            run_date: None,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Concrete(c) => &c.definition.info().id,
            Self::Missing(m) => &m.id,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Concrete(c) => &c.definition.info().description,
            Self::Missing(_) => MISSING_DESCRIPTION,
        }
    }

    pub fn author(&self) -> &str {
        match self {
            Self::Concrete(c) => &c.definition.info().author,
            Self::Missing(_) => "",
        }
    }

    pub fn ticket(&self) -> &str {
        match self {
            Self::Concrete(c) => &c.definition.info().ticket,
            Self::Missing(_) => "",
        }
    }

    pub fn is_transactional(&self) -> bool {
        match self {
            Self::Concrete(c) => c.definition.info().transactional,
            Self::Missing(_) => false,
        }
    }

    pub fn dependencies(&self) -> &[String] {
        match self {
            Self::Concrete(c) => &c.definition.info().dependencies,
            Self::Missing(_) => &[],
        }
    }

    pub fn run_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Concrete(c) => c.run_date,
            Self::Missing(m) => m.run_date,
        }
    }

    pub(crate) fn set_run_date(&mut self, run_date: Option<DateTime<Utc>>) {
        match self {
            Self::Concrete(c) => c.run_date = run_date,
            Self::Missing(m) => m.run_date = run_date,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.run_date().is_some()
    }

    pub fn state(&self) -> MigrationState {
        if self.is_applied() {
            MigrationState::Applied
        } else {
            MigrationState::Unapplied
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }

    /// The definition to execute.
    ///
    /// Fails with [`Error::MissingMigration`] for ids without a definition.
    pub fn definition(&self) -> Result<Arc<dyn Migration>> {
        match self {
            Self::Concrete(c) => Ok(Arc::clone(&c.definition)),
            Self::Missing(m) => Err(Error::MissingMigration(m.id.clone())),
        }
    }

    /// Serializable view of this unit
    pub fn summary(&self) -> MigrationSummary {
        MigrationSummary {
            id: self.id().to_string(),
            description: self.description().to_string(),
            author: self.author().to_string(),
            ticket: self.ticket().to_string(),
            transactional: self.is_transactional(),
            dependencies: self.dependencies().to_vec(),
            state: self.state(),
            run_date: self.run_date(),
            missing: self.is_missing(),
        }
    }
}

impl std::fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("id", &self.id())
            .field("missing", &self.is_missing())
            .field("run_date", &self.run_date())
            .finish()
    }
}

/// Flat, serializable description of a unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationSummary {
    pub id: String,
    pub description: String,
    pub author: String,
    pub ticket: String,
    pub transactional: bool,
    pub dependencies: Vec<String>,
    pub state: MigrationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_date: Option<DateTime<Utc>>,
    pub missing: bool,
}
