//! Direct dependency checks
//!
//! Only a unit's own declared dependencies are inspected; nothing is resolved
//! transitively and cycles are not detected. Members of a cycle each report an
//! unmet dependency.

use crate::error::{Error, Result};
use crate::migration::MigrationUnit;
use crate::registry::Registry;

/// Verifies that every dependency of `unit` is known and applied.
///
/// # Errors
///
/// - [`Error::MissingMigration`] if a dependency id is not in the registry
/// - [`Error::UnmetDependency`] if a dependency is known but unapplied
pub fn check_dependencies(unit: &MigrationUnit, registry: &Registry) -> Result<()> {
    for dependency in unit.dependencies() {
        let Some(target) = registry.find(dependency) else {
            return Err(Error::MissingMigration(dependency.clone()));
        };
        if !target.is_applied() {
            return Err(Error::UnmetDependency {
                migration: unit.id().to_string(),
                dependency: dependency.clone(),
            });
        }
    }
    Ok(())
}
