//! Storage for migration definition files
//!
//! [`DirectoryStore`] keeps one `<id>.sql` file per migration in the configured
//! directory, plus an optional `migration.template` used by `create`.

use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Extension of migration definition files
pub const MIGRATION_EXTENSION: &str = "sql";

/// File name of the per-directory template
pub const TEMPLATE_FILE: &str = "migration.template";

/// File operations the engine needs for migration definitions
pub trait MigrationStore: Send {
    /// Location shown in messages
    fn location(&self) -> &Path;

    /// Whether the store itself exists
    fn exists(&self) -> bool;

    /// Names of all entries in the store
    fn entries(&self) -> Result<Vec<String>>;

    /// Whether a definition exists for `id`
    fn contains(&self, id: &str) -> Result<bool>;

    /// Path of the definition for `id`, whether or not it exists
    fn path_for(&self, id: &str) -> PathBuf;

    /// Contents of the definition for `id`, `None` if absent
    fn read(&self, id: &str) -> Result<Option<String>>;

    /// Contents of the template, `None` if the store has none
    fn read_template(&self) -> Result<Option<String>>;

    /// Write a new definition for `id`
    fn write(&self, id: &str, contents: &str) -> Result<()>;

    /// Delete the definition for `id`
    fn delete(&self, id: &str) -> Result<()>;
}

/// A [`MigrationStore`] backed by a directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    path: PathBuf,
}

impl DirectoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(Error::MissingMigrationDirectory(self.path.clone()))
        }
    }

    fn read_optional(&self, path: &Path) -> Result<Option<String>> {
        self.ensure_exists()?;
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl MigrationStore for DirectoryStore {
    fn location(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        self.path.is_dir()
    }

    fn entries(&self) -> Result<Vec<String>> {
        self.ensure_exists()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn contains(&self, id: &str) -> Result<bool> {
        self.ensure_exists()?;
        Ok(self.path_for(id).is_file())
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.path.join(format!("{id}.{MIGRATION_EXTENSION}"))
    }

    fn read(&self, id: &str) -> Result<Option<String>> {
        self.read_optional(&self.path_for(id))
    }

    fn read_template(&self) -> Result<Option<String>> {
        self.read_optional(&self.path.join(TEMPLATE_FILE))
    }

    fn write(&self, id: &str, contents: &str) -> Result<()> {
        self.ensure_exists()?;
        fs::write(self.path_for(id), contents)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.ensure_exists()?;
        fs::remove_file(self.path_for(id))?;
        Ok(())
    }
}

/// Extracts the migration id from a file name.
///
/// Only `.sql` files whose stem fully matches the id format qualify.
pub fn id_from_file_name<'a>(file_name: &'a str, is_valid_id: impl Fn(&str) -> bool) -> Option<&'a str> {
    let stem = file_name.strip_suffix(&format!(".{MIGRATION_EXTENSION}"))?;
    is_valid_id(stem).then_some(stem)
}
