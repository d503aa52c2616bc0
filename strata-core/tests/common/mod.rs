//! Common test utilities shared across test files.
//!
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_core::{
    BootstrapPolicy, Configuration, DirectoryStore, Migration, MigrationInfo, MigrationStore,
    Migrator, MigratorBuilder,
};
use tempfile::TempDir;

// ===== Project Fixture =====

/// A temporary project: an on-disk database plus a migration directory.
///
/// The database lives on disk so a fresh [`Migrator`] can re-read state
/// written by an earlier one.
pub struct Project {
    root: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("migrations")).unwrap();
        Self { root }
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.path().join("app.db")
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.root.path().join("migrations")
    }

    pub fn config(&self) -> Configuration {
        Configuration::builder(self.db_path().to_string_lossy())
            .directory(self.migrations_dir())
            .build()
            .unwrap()
    }

    pub fn builder(&self) -> MigratorBuilder {
        Migrator::builder(self.config())
    }

    pub fn open(&self) -> Migrator {
        Migrator::open(self.config()).unwrap()
    }

    pub fn open_without_bootstrap(&self) -> strata_core::Result<Migrator> {
        self.builder().bootstrap(BootstrapPolicy::Never).build()
    }

    /// Writes `<id>.sql` into the migration directory
    pub fn write_migration(&self, id: &str, contents: &str) {
        std::fs::write(self.definition_path(id), contents).unwrap();
    }

    pub fn definition_path(&self, id: &str) -> PathBuf {
        self.migrations_dir().join(format!("{id}.sql"))
    }

    /// Opens a second connection to inspect the database
    pub fn inspect(&self) -> Connection {
        Connection::open(self.db_path()).unwrap()
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

// ===== Definition Builders =====

/// A reversible migration that creates `table`
pub fn create_table(table: &str) -> String {
    format!(
        "-- strata:description Create {table}\n\
         -- strata:author Alice\n\
         -- strata:apply\n\
         CREATE TABLE {table} (id INTEGER PRIMARY KEY);\n\
         -- strata:rollback\n\
         DROP TABLE {table};\n"
    )
}

/// Like [`create_table`], with declared dependencies
pub fn create_table_after(table: &str, dependencies: &[&str]) -> String {
    format!(
        "-- strata:description Create {table}\n\
         -- strata:depends {}\n\
         -- strata:apply\n\
         CREATE TABLE {table} (id INTEGER PRIMARY KEY);\n\
         -- strata:rollback\n\
         DROP TABLE {table};\n",
        dependencies.join(" ")
    )
}

/// Creates `table` and then fails, leaving nothing behind if run in a transaction
pub fn failing_after_create(table: &str) -> String {
    format!(
        "-- strata:description Broken\n\
         -- strata:apply\n\
         CREATE TABLE {table} (id INTEGER PRIMARY KEY);\n\
         INSERT INTO no_such_table VALUES (1);\n\
         -- strata:rollback\n\
         DROP TABLE {table};\n"
    )
}

// ===== Schema Helpers =====

pub fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        > 0
}

/// The stored run date for `id`; outer `None` if the row is absent
pub fn ledger_run_date(conn: &Connection, id: &str) -> Option<Option<String>> {
    conn.query_row(
        "SELECT run_date FROM migrations WHERE id = ?1",
        [id],
        |row| row.get::<_, Option<String>>(0),
    )
    .ok()
}

pub fn ledger_ids(conn: &Connection) -> Vec<String> {
    let mut stmt = conn.prepare("SELECT id FROM migrations ORDER BY id").unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap()
}

// ===== Compiled-in Migration =====

/// A compiled-in migration that counts how often its bodies run
pub struct CountingMigration {
    info: MigrationInfo,
    pub applies: AtomicUsize,
    pub rollbacks: AtomicUsize,
}

impl CountingMigration {
    pub fn new(info: MigrationInfo) -> Arc<Self> {
        Arc::new(Self {
            info,
            applies: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
        })
    }

    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

impl Migration for CountingMigration {
    fn info(&self) -> &MigrationInfo {
        &self.info
    }

    fn apply(&self, conn: &Connection) -> strata_core::Result<()> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        conn.execute_batch("CREATE TABLE counted (id INTEGER PRIMARY KEY);")?;
        Ok(())
    }

    fn rollback(&self, conn: &Connection) -> strata_core::Result<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        conn.execute_batch("DROP TABLE counted;")?;
        Ok(())
    }
}

/// A compiled-in migration whose body commits the transaction it is given
pub struct CommittingMigration {
    info: MigrationInfo,
}

impl CommittingMigration {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            info: MigrationInfo::new(id, "Commits mid-body"),
        })
    }
}

impl Migration for CommittingMigration {
    fn info(&self) -> &MigrationInfo {
        &self.info
    }

    fn apply(&self, conn: &Connection) -> strata_core::Result<()> {
        conn.execute_batch("CREATE TABLE leaked (id INTEGER PRIMARY KEY); COMMIT;")?;
        Ok(())
    }

    fn rollback(&self, conn: &Connection) -> strata_core::Result<()> {
        conn.execute_batch("DROP TABLE leaked;")?;
        Ok(())
    }
}

// ===== Stores =====

/// A directory store whose deletes always fail
pub struct UndeletableStore {
    inner: DirectoryStore,
}

impl UndeletableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: DirectoryStore::new(path),
        }
    }
}

impl MigrationStore for UndeletableStore {
    fn location(&self) -> &Path {
        self.inner.location()
    }

    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn entries(&self) -> strata_core::Result<Vec<String>> {
        self.inner.entries()
    }

    fn contains(&self, id: &str) -> strata_core::Result<bool> {
        self.inner.contains(id)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.inner.path_for(id)
    }

    fn read(&self, id: &str) -> strata_core::Result<Option<String>> {
        self.inner.read(id)
    }

    fn read_template(&self) -> strata_core::Result<Option<String>> {
        self.inner.read_template()
    }

    fn write(&self, id: &str, contents: &str) -> strata_core::Result<()> {
        self.inner.write(id, contents)
    }

    fn delete(&self, _id: &str) -> strata_core::Result<()> {
        Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only store").into())
    }
}
