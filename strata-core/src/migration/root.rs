//! The root migration, which installs the ledger table

use super::{Migration, MigrationInfo};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use rusqlite::Connection;

/// Fixed id of the root migration
pub const ROOT_MIGRATION_ID: &str = "00000000_000000";

/// Creates the ledger table. Always registered.
///
/// Rolling it back would drop the ledger holding every other migration's state,
/// so it is irreversible.
#[derive(Debug, Clone)]
pub struct RootMigration {
    info: MigrationInfo,
    ledger: Ledger,
}

impl RootMigration {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            info: MigrationInfo::new(ROOT_MIGRATION_ID, "Root migration: create the ledger table")
                .author("strata"),
            ledger,
        }
    }
}

impl Migration for RootMigration {
    fn info(&self) -> &MigrationInfo {
        &self.info
    }

    fn apply(&self, conn: &Connection) -> Result<()> {
        self.ledger.create(conn)
    }

    fn rollback(&self, _conn: &Connection) -> Result<()> {
        Err(Error::IrreversibleMigration {
            id: ROOT_MIGRATION_ID.to_string(),
            reason: Some(format!(
                "dropping '{}' would discard the migration ledger",
                self.ledger.table()
            )),
        })
    }
}
