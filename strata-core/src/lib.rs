//! # Strata
//!
//! A schema migration engine for SQLite.
//!
//! Strata keeps migration definitions (SQL files or compiled-in [`Migration`]
//! values) in step with a ledger table that records which of them have been
//! applied, and offers the lifecycle operations on top: apply, rollback, test,
//! mark, unmark, create and remove. The ledger installs itself on first use.
//!
//! ## Quick Start
//!
//! ```no_run
//! use strata_core::{Configuration, MigrationFilter, Migrator, NewMigration};
//!
//! fn main() -> strata_core::Result<()> {
//!     let config = Configuration::from_path("strata.yaml")?;
//!     let mut migrator = Migrator::open(config)?;
//!
//!     // Write a new definition file from the template
//!     let id = migrator
//!         .create(NewMigration::new("Create users table").author("Alice"))?
//!         .id()
//!         .to_string();
//!
//!     // Apply everything that has not run yet, oldest first
//!     let pending: Vec<String> = migrator
//!         .query(&MigrationFilter::new())
//!         .iter()
//!         .rev()
//!         .map(|unit| unit.id().to_string())
//!         .collect();
//!     for id in pending {
//!         migrator.apply(&id)?;
//!     }
//!
//!     migrator.rollback(&id)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Compiled-in Migrations
//!
//! Anything implementing [`Migration`] can be registered alongside the files:
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_core::{Configuration, MigrationInfo, Migrator, SqlMigration};
//!
//! # fn example(config: Configuration) -> strata_core::Result<()> {
//! let audit = SqlMigration::new(
//!     MigrationInfo::new("20240101_000000", "Audit log"),
//!     "CREATE TABLE audit_log (id INTEGER PRIMARY KEY, entry TEXT);",
//! )
//! .with_rollback("DROP TABLE audit_log;");
//!
//! let migrator = Migrator::builder(config)
//!     .register(Arc::new(audit))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod dependency;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod migrator;
pub mod query;
pub mod registry;
pub mod store;

pub use config::{ConfigError, ConfigFormat, Configuration, ConfigurationBuilder, OptionValue};
pub use connection::connect;
pub use dependency::check_dependencies;
pub use error::{Error, Result};
pub use ledger::{Ledger, LedgerRow};
pub use migration::{
    Migration, MigrationInfo, MigrationState, MigrationSummary, MigrationUnit, RootMigration,
    SqlMigration, DEFAULT_TEMPLATE, MISSING_DESCRIPTION, ROOT_MIGRATION_ID,
};
pub use migrator::{
    bootstrap, init_state, BootstrapPolicy, InitState, Migrator, MigratorBuilder, NewMigration,
    ID_TIMESTAMP_FORMAT,
};
pub use query::{MigrationFilter, RunFilter};
pub use registry::{DefinitionTable, Loader, Registry};
pub use store::{DirectoryStore, MigrationStore};
