//! The migration orchestrator
//!
//! [`Migrator`] owns the database connection, the definition store and the
//! reconciled [`Registry`], and drives every lifecycle transition:
//!
//! ```text
//! Unapplied --apply/mark--> Applied --rollback/unmark--> Unapplied
//!     \                        /
//!      `------- remove -------'  (unit leaves registry, ledger and store)
//! ```
//!
//! Transactional migrations run inside a [`rusqlite::Transaction`]; dropping it on
//! an error path rolls it back, so a failed body never leaves partial changes.
//! The ledger row is only written after the body has committed.

use crate::config::Configuration;
use crate::connection::connect;
use crate::dependency::check_dependencies;
use crate::error::{Error, Result};
use crate::ledger::{self, Ledger};
use crate::migration::{
    render_template, Migration, MigrationUnit, RootMigration, SqlMigration, DEFAULT_TEMPLATE,
    ROOT_MIGRATION_ID,
};
use crate::query::MigrationFilter;
use crate::registry::{DefinitionTable, Loader, Registry};
use crate::store::{DirectoryStore, MigrationStore};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Instant;

/// `strftime` pattern for ids generated by `create`
pub const ID_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What to do when the ledger table does not exist yet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// Install the ledger by applying the root migration
    #[default]
    Auto,
    /// Fail with [`Error::MissingMigrationTable`]
    Never,
}

/// Whether the database already carries a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Ready,
    NeedsBootstrap,
}

/// Inspects the database for the ledger table
pub fn init_state(conn: &Connection, ledger: &Ledger) -> Result<InitState> {
    if ledger.exists(conn)? {
        Ok(InitState::Ready)
    } else {
        Ok(InitState::NeedsBootstrap)
    }
}

/// Installs the ledger table.
///
/// The root migration creates the table and records itself as applied in the
/// same transaction, since the regular mark path needs the table to exist.
pub fn bootstrap(conn: &mut Connection, ledger: &Ledger) -> Result<()> {
    info!("Bootstrapping migration table '{}'", ledger.table());
    let root = RootMigration::new(ledger.clone());

    let tx = conn.transaction()?;
    root.apply(&tx)?;
    ledger.insert_applied(&tx, ROOT_MIGRATION_ID, crate::ledger::now())?;
    tx.commit()?;
    Ok(())
}

/// Fields substituted into the template by [`Migrator::create`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMigration {
    pub description: String,
    pub ticket: String,
    pub author: String,
}

impl NewMigration {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn ticket(mut self, ticket: impl Into<String>) -> Self {
        self.ticket = ticket.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Apply,
    Rollback,
}

impl Direction {
    fn invoke(self, definition: &dyn Migration, conn: &Connection) -> Result<()> {
        match self {
            Direction::Apply => definition.apply(conn),
            Direction::Rollback => definition.rollback(conn),
        }
    }
}

/// Builder for [`Migrator`]
pub struct MigratorBuilder {
    config: Configuration,
    connection: Option<Connection>,
    store: Option<Box<dyn MigrationStore>>,
    definitions: DefinitionTable,
    bootstrap: BootstrapPolicy,
}

impl MigratorBuilder {
    fn new(config: Configuration) -> Self {
        Self {
            config,
            connection: None,
            store: None,
            definitions: DefinitionTable::new(),
            bootstrap: BootstrapPolicy::default(),
        }
    }

    /// Use an existing connection instead of opening the configured database
    pub fn connection(mut self, conn: Connection) -> Self {
        self.connection = Some(conn);
        self
    }

    /// Use a custom definition store instead of the configured directory
    pub fn store(mut self, store: impl MigrationStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Register a compiled-in migration
    pub fn register(mut self, migration: Arc<dyn Migration>) -> Self {
        self.definitions.register(migration);
        self
    }

    pub fn bootstrap(mut self, policy: BootstrapPolicy) -> Self {
        self.bootstrap = policy;
        self
    }

    /// Opens the database, installs the ledger if needed and reconciles.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingMigrationDirectory`] before anything is written
    /// - [`Error::MissingMigrationTable`] with [`BootstrapPolicy::Never`]
    /// - any error from parsing definitions or talking to the database
    pub fn build(self) -> Result<Migrator> {
        let MigratorBuilder {
            config,
            connection,
            store,
            mut definitions,
            bootstrap: policy,
        } = self;

        let store =
            store.unwrap_or_else(|| Box::new(DirectoryStore::new(config.directory())));
        if !store.exists() {
            return Err(Error::MissingMigrationDirectory(
                store.location().to_path_buf(),
            ));
        }

        let mut conn = match connection {
            Some(conn) => conn,
            None => connect(&config)?,
        };

        let ledger = Ledger::new(config.table());
        if definitions
            .register(Arc::new(RootMigration::new(ledger.clone())))
            .is_some()
        {
            warn!("Registered migration {ROOT_MIGRATION_ID} replaced by the root migration");
        }

        match (init_state(&conn, &ledger)?, policy) {
            (InitState::Ready, _) => {}
            (InitState::NeedsBootstrap, BootstrapPolicy::Auto) => bootstrap(&mut conn, &ledger)?,
            (InitState::NeedsBootstrap, BootstrapPolicy::Never) => {
                return Err(Error::MissingMigrationTable(ledger.table().to_string()))
            }
        }

        let registry = {
            let loader = Loader::new(&config, store.as_ref(), &definitions);
            Registry::reconcile(&mut conn, &ledger, &loader)?
        };
        debug!("Loaded {} migrations", registry.len());

        Ok(Migrator {
            config,
            conn,
            ledger,
            store,
            definitions,
            registry,
        })
    }
}

/// Reconciled view of all migrations plus the operations that change them
pub struct Migrator {
    config: Configuration,
    conn: Connection,
    ledger: Ledger,
    store: Box<dyn MigrationStore>,
    definitions: DefinitionTable,
    registry: Registry,
}

impl Migrator {
    /// Opens the configured database and directory with default settings
    pub fn open(config: Configuration) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: Configuration) -> MigratorBuilder {
        MigratorBuilder::new(config)
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The underlying connection, for inspecting the target schema
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Re-reads the ledger and the store, picking up files added since opening
    pub fn reload(&mut self) -> Result<()> {
        let loader = Loader::new(&self.config, self.store.as_ref(), &self.definitions);
        self.registry = Registry::reconcile(&mut self.conn, &self.ledger, &loader)?;
        Ok(())
    }

    /// Looks up a unit by id
    pub fn get(&self, id: &str) -> Result<&MigrationUnit> {
        self.registry.get(id)
    }

    /// All units in registry order
    pub fn units(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.registry.iter()
    }

    /// Units matching `filter`, in registry order
    pub fn query(&self, filter: &MigrationFilter) -> Vec<&MigrationUnit> {
        self.registry.query(filter)
    }

    /// Applies a migration and records its run date.
    ///
    /// # Errors
    ///
    /// - [`Error::MigrationNotFound`] for unknown ids
    /// - [`Error::MissingMigration`] if the unit has no definition
    /// - [`Error::AlreadyApplied`] if it is already applied
    /// - [`Error::MissingMigration`] / [`Error::UnmetDependency`] from the dependency check
    /// - whatever the migration body returns; the ledger is untouched in that case
    pub fn apply(&mut self, id: &str) -> Result<()> {
        let definition = {
            let unit = self.registry.get(id)?;
            let definition = unit.definition()?;
            if unit.is_applied() {
                return Err(Error::AlreadyApplied(id.to_string()));
            }
            check_dependencies(unit, &self.registry)?;
            definition
        };

        let started = Instant::now();
        execute(&mut self.conn, definition.as_ref(), Direction::Apply)?;
        self.mark(id)?;
        info!("Applied {id} in {:.2?}", started.elapsed());
        Ok(())
    }

    /// Rolls back a migration and clears its run date.
    ///
    /// Dependencies are not checked.
    pub fn rollback(&mut self, id: &str) -> Result<()> {
        let definition = {
            let unit = self.registry.get(id)?;
            let definition = unit.definition()?;
            if !unit.is_applied() {
                return Err(Error::NotApplied(id.to_string()));
            }
            definition
        };

        let started = Instant::now();
        execute(&mut self.conn, definition.as_ref(), Direction::Rollback)?;
        self.unmark(id)?;
        info!("Rolled back {id} in {:.2?}", started.elapsed());
        Ok(())
    }

    /// Runs a migration's apply body and always rolls it back.
    ///
    /// Neither the ledger nor the target schema change. Returns the outcome of
    /// the apply body.
    pub fn test(&mut self, id: &str) -> Result<()> {
        let definition = {
            let unit = self.registry.get(id)?;
            let definition = unit.definition()?;
            if !unit.is_transactional() {
                return Err(Error::UntestableMigration(id.to_string()));
            }
            check_dependencies(unit, &self.registry)?;
            definition
        };

        let started = Instant::now();
        let tx = self.conn.transaction()?;
        let outcome = definition
            .apply(&tx)
            .and_then(|()| ensure_transaction_open(&tx, id));
        let discarded = tx.rollback();
        outcome?;
        discarded?;
        info!("Tested {id} in {:.2?}", started.elapsed());
        Ok(())
    }

    /// Records a migration as applied without running it
    pub fn mark(&mut self, id: &str) -> Result<()> {
        let unit = self.registry.get_mut(id)?;
        let run_date = ledger::now();
        self.ledger.set_run_date(&self.conn, id, Some(run_date))?;
        unit.set_run_date(Some(run_date));
        debug!("Marked {id} as applied at {run_date}");
        Ok(())
    }

    /// Records a migration as unapplied without running it
    pub fn unmark(&mut self, id: &str) -> Result<()> {
        let unit = self.registry.get_mut(id)?;
        self.ledger.set_run_date(&self.conn, id, None)?;
        unit.set_run_date(None);
        debug!("Marked {id} as unapplied");
        Ok(())
    }

    /// Creates a migration file from the template, stamped with the current time
    pub fn create(&mut self, new: NewMigration) -> Result<&MigrationUnit> {
        self.create_at(Utc::now(), new)
    }

    /// Creates a migration file whose id is derived from `timestamp`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMigrationId`] if the generated id does not match the id format
    /// - [`Error::DuplicateMigrationId`] if the id is taken; nothing is written
    /// - [`Error::InvalidDefinition`] if the rendered template does not parse
    pub fn create_at(
        &mut self,
        timestamp: DateTime<Utc>,
        new: NewMigration,
    ) -> Result<&MigrationUnit> {
        let id = timestamp.format(ID_TIMESTAMP_FORMAT).to_string();
        if !self.config.is_valid_id(&id) {
            return Err(Error::InvalidMigrationId {
                id,
                pattern: self.config.id_format().as_str().to_string(),
            });
        }
        if self.registry.contains(&id) || self.store.contains(&id)? {
            return Err(Error::DuplicateMigrationId(id));
        }

        let template = self
            .store
            .read_template()?
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        let contents = render_template(&template, &id, &new.description, &new.author, &new.ticket);
        let migration = SqlMigration::parse(&id, &self.store.path_for(&id), &contents)?;

        self.store.write(&id, &contents)?;
        if let Err(e) = self.ledger.insert(&self.conn, &id) {
            if let Err(cleanup) = self.store.delete(&id) {
                warn!("Failed to delete {} after ledger error: {cleanup}", id);
            }
            return Err(e);
        }

        info!("Created {}", self.store.path_for(&id).display());
        self.registry
            .insert(MigrationUnit::concrete(Arc::new(migration)));
        self.registry.get(&id)
    }

    /// Removes a migration from the registry, the ledger and the store.
    ///
    /// An applied unit is rolled back first when `rollback_first` is set; if
    /// that fails nothing is removed. The ledger row is deleted in a transaction
    /// that commits only once the definition file is gone.
    ///
    /// Compiled-in migrations, the root included, fail with
    /// [`Error::RegisteredMigration`]; the next reconcile would only restore them.
    pub fn remove(&mut self, id: &str, rollback_first: bool) -> Result<()> {
        let applied = self.registry.get(id)?.is_applied();
        if self.definitions.contains(id) {
            return Err(Error::RegisteredMigration(id.to_string()));
        }
        if applied && rollback_first {
            self.rollback(id)?;
        }

        let tx = self.conn.transaction()?;
        self.ledger.delete(&tx, id)?;
        if self.store.contains(id)? {
            self.store.delete(id)?;
        }
        tx.commit()?;

        self.registry.remove(id);
        info!("Removed {id}");
        Ok(())
    }
}

/// Fails if a body ended the transaction it was handed.
///
/// File-backed definitions are stopped before such a statement runs; this
/// catches compiled-in ones, whose changes are already committed by then.
fn ensure_transaction_open(conn: &Connection, id: &str) -> Result<()> {
    if conn.is_autocommit() {
        return Err(Error::TransactionEnded {
            id: id.to_string(),
            statement: None,
        });
    }
    Ok(())
}

/// Runs one direction of a definition, inside a transaction when it asks for one
fn execute(conn: &mut Connection, definition: &dyn Migration, direction: Direction) -> Result<()> {
    if definition.info().transactional {
        let tx = conn.transaction()?;
        direction.invoke(definition, &tx)?;
        ensure_transaction_open(&tx, &definition.info().id)?;
        tx.commit()?;
    } else {
        direction.invoke(definition, conn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationInfo;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn migrator(dir: &TempDir) -> Migrator {
        let config = Configuration::builder(":memory:")
            .directory(dir.path())
            .build()
            .unwrap();
        Migrator::open(config).unwrap()
    }

    #[test]
    fn test_open_bootstraps_root() {
        let dir = TempDir::new().unwrap();
        let migrator = migrator(&dir);

        let units: Vec<&MigrationUnit> = migrator.units().collect();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id(), ROOT_MIGRATION_ID);
        assert!(units[0].is_applied());
    }

    #[test]
    fn test_init_state() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new("migrations");
        assert_eq!(init_state(&conn, &ledger).unwrap(), InitState::NeedsBootstrap);
        ledger.create(&conn).unwrap();
        assert_eq!(init_state(&conn, &ledger).unwrap(), InitState::Ready);
    }

    #[test]
    fn test_bootstrap_failure_leaves_no_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE VIEW migrations AS SELECT 1;")
            .unwrap();
        let ledger = Ledger::new("migrations");
        assert!(bootstrap(&mut conn, &ledger).is_err());
        assert!(!ledger.exists(&conn).unwrap());
    }

    #[test]
    fn test_create_at_uses_timestamp_id() {
        let dir = TempDir::new().unwrap();
        let mut migrator = migrator(&dir);
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 52).unwrap();

        let unit = migrator
            .create_at(at, NewMigration::new("Add users").author("Alice").ticket("T-1"))
            .unwrap();
        assert_eq!(unit.id(), "20240115_143052");
        assert_eq!(unit.author(), "Alice");
        assert!(!unit.is_applied());
        assert!(dir.path().join("20240115_143052.sql").exists());
    }

    #[test]
    fn test_create_rejects_id_outside_format() {
        let dir = TempDir::new().unwrap();
        let config = Configuration::builder(":memory:")
            .directory(dir.path())
            .id_format(r"\d{4}")
            .build()
            .unwrap();
        let mut migrator = Migrator::open(config).unwrap();

        let err = migrator.create(NewMigration::new("x")).unwrap_err();
        assert!(matches!(err, Error::InvalidMigrationId { .. }));
    }

    #[test]
    fn test_create_with_broken_template_writes_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("migration.template"), "-- nothing here\n").unwrap();
        let mut migrator = migrator(&dir);
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 52).unwrap();

        let err = migrator.create_at(at, NewMigration::new("x")).unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
        assert!(!dir.path().join("20240115_143052.sql").exists());
    }

    #[test]
    fn test_registered_migration_cannot_replace_root() {
        let dir = TempDir::new().unwrap();
        let config = Configuration::builder(":memory:")
            .directory(dir.path())
            .build()
            .unwrap();
        let impostor = SqlMigration::new(MigrationInfo::new(ROOT_MIGRATION_ID, "impostor"), "");
        let migrator = Migrator::builder(config)
            .register(Arc::new(impostor))
            .build()
            .unwrap();

        assert_ne!(migrator.get(ROOT_MIGRATION_ID).unwrap().description(), "impostor");
    }

    #[test]
    fn test_rollback_root_is_irreversible() {
        let dir = TempDir::new().unwrap();
        let mut migrator = migrator(&dir);
        let err = migrator.rollback(ROOT_MIGRATION_ID).unwrap_err();
        assert!(matches!(err, Error::IrreversibleMigration { .. }));
        assert!(migrator.get(ROOT_MIGRATION_ID).unwrap().is_applied());
    }
}
