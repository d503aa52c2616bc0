//! The in-memory migration registry and the loader that fills it
//!
//! [`Registry::reconcile`] merges the ledger with the definitions available from
//! the [`DefinitionTable`] and the [`MigrationStore`]:
//!
//! 1. every ledger row (newest id first) is loaded and given its run date;
//!    rows without a definition become [`MigrationUnit::Missing`]
//! 2. every registered or on-disk id absent from the ledger gets an unapplied
//!    ledger row and is appended, newest first
//!
//! Afterwards ledger and registry describe the same set of ids.

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::migration::{Migration, MigrationUnit, SqlMigration};
use crate::query::MigrationFilter;
use crate::store::{id_from_file_name, MigrationStore};
use indexmap::IndexMap;
use log::{debug, warn};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Compiled-in migration definitions, keyed by id
#[derive(Clone, Default)]
pub struct DefinitionTable {
    definitions: HashMap<String, Arc<dyn Migration>>,
}

impl DefinitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition, replacing any earlier one with the same id
    pub fn register(&mut self, migration: Arc<dyn Migration>) -> Option<Arc<dyn Migration>> {
        let id = migration.info().id.clone();
        self.definitions.insert(id, migration)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Migration>> {
        self.definitions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Resolves migration ids to definitions
pub struct Loader<'a> {
    config: &'a Configuration,
    store: &'a dyn MigrationStore,
    definitions: &'a DefinitionTable,
}

impl<'a> Loader<'a> {
    pub fn new(
        config: &'a Configuration,
        store: &'a dyn MigrationStore,
        definitions: &'a DefinitionTable,
    ) -> Self {
        Self {
            config,
            store,
            definitions,
        }
    }

    /// Loads the definition for `id`.
    ///
    /// A registered definition takes precedence over a file. An id with neither
    /// becomes [`MigrationUnit::Missing`]; that is not an error.
    pub fn load_definition(&self, id: &str) -> Result<MigrationUnit> {
        if let Some(definition) = self.definitions.get(id) {
            if self.store.contains(id)? {
                warn!(
                    "Definition file {} is shadowed by a registered migration",
                    self.store.path_for(id).display()
                );
            }
            return Ok(MigrationUnit::concrete(definition));
        }

        match self.store.read(id)? {
            Some(source) => {
                let path = self.store.path_for(id);
                let migration = SqlMigration::parse(id, &path, &source)?;
                Ok(MigrationUnit::concrete(Arc::new(migration)))
            }
            None => Ok(MigrationUnit::missing(id)),
        }
    }

    /// Ids available from files and registrations, newest first
    pub fn discover(&self) -> Result<Vec<String>> {
        let mut ids: BTreeSet<String> = self
            .definitions
            .ids()
            .map(str::to_string)
            .collect();

        for name in self.store.entries()? {
            if let Some(id) = id_from_file_name(&name, |stem| self.config.is_valid_id(stem)) {
                ids.insert(id.to_string());
            }
        }

        Ok(ids.into_iter().rev().collect())
    }
}

/// Ordered map of migration id to unit
#[derive(Debug, Default)]
pub struct Registry {
    units: IndexMap<String, MigrationUnit>,
}

impl Registry {
    /// Builds the registry from the ledger and the available definitions,
    /// inserting ledger rows for newly discovered ids.
    pub fn reconcile(conn: &mut Connection, ledger: &Ledger, loader: &Loader<'_>) -> Result<Self> {
        let mut registry = Registry::default();

        for row in ledger.rows(conn)? {
            let mut unit = loader.load_definition(&row.id)?;
            if unit.is_missing() {
                debug!("Ledger row {} has no definition", row.id);
            }
            unit.set_run_date(row.run_date);
            registry.insert(unit);
        }

        let discovered = loader
            .discover()?
            .into_iter()
            .filter(|id| !registry.contains(id))
            .map(|id| loader.load_definition(&id))
            .collect::<Result<Vec<_>>>()?;

        if !discovered.is_empty() {
            let tx = conn.transaction()?;
            for unit in &discovered {
                ledger.insert(&tx, unit.id())?;
            }
            tx.commit()?;

            for unit in discovered {
                debug!("Registered new migration {}", unit.id());
                registry.insert(unit);
            }
        }

        Ok(registry)
    }

    /// Looks up a unit
    pub fn find(&self, id: &str) -> Option<&MigrationUnit> {
        self.units.get(id)
    }

    /// Looks up a unit, failing with [`Error::MigrationNotFound`]
    pub fn get(&self, id: &str) -> Result<&MigrationUnit> {
        self.units
            .get(id)
            .ok_or_else(|| Error::MigrationNotFound(id.to_string()))
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut MigrationUnit> {
        self.units
            .get_mut(id)
            .ok_or_else(|| Error::MigrationNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// Adds a unit at the end of the iteration order
    pub(crate) fn insert(&mut self, unit: MigrationUnit) {
        self.units.insert(unit.id().to_string(), unit);
    }

    /// Removes a unit, keeping the order of the rest
    pub(crate) fn remove(&mut self, id: &str) -> Option<MigrationUnit> {
        self.units.shift_remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units matching `filter`, in registry order
    pub fn query(&self, filter: &MigrationFilter) -> Vec<&MigrationUnit> {
        self.iter().filter(|unit| filter.matches(unit)).collect()
    }
}
