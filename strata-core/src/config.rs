//! Engine configuration
//!
//! A [`Configuration`] is built once, either through [`ConfigurationBuilder`] or by
//! parsing a JSON/YAML document, and is immutable afterwards. Optional keys are
//! filled from defaults only when they are absent; a required key that is present
//! but `null` is reported as missing.
//!
//! # Example
//!
//! ```
//! use strata_core::Configuration;
//!
//! let config = Configuration::from_json_str(r#"{ "database": "app.db", "table": "schema_log" }"#)
//!     .unwrap();
//! assert_eq!(config.table(), "schema_log");
//! assert_eq!(config.directory().to_str(), Some("migrations"));
//! ```

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default ledger table name
pub const DEFAULT_TABLE: &str = "migrations";

/// Default migration directory
pub const DEFAULT_DIRECTORY: &str = "migrations";

/// Default id pattern: `YYYYMMDD_HHMMSS`
pub const DEFAULT_ID_FORMAT: &str = r"\d{8}_\d{6}";

/// Errors that can occur when loading or building a [`Configuration`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is absent after defaults were merged
    #[error("missing required configuration key '{0}'")]
    MissingKey(&'static str),

    /// The id format is not a valid regular expression
    #[error("invalid id format '{pattern}': {source}")]
    InvalidIdFormat {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The ledger table name is not a plain SQL identifier
    #[error("invalid table name '{0}': expected letters, digits and underscores")]
    InvalidTableName(String),

    /// A connection option name is not a plain identifier
    #[error("invalid connection option '{0}'")]
    InvalidOption(String),

    /// The configuration file extension is not recognised
    #[error("unsupported configuration format '{0}' (expected json, yaml or yml)")]
    UnsupportedFormat(String),

    /// Failed to read the configuration file
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed YAML
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Picks a format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A scalar connection option value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl fmt::Display for OptionValue {
    /// Renders the value as a SQLite PRAGMA argument
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(true) => f.write_str("ON"),
            OptionValue::Bool(false) => f.write_str("OFF"),
            OptionValue::Integer(n) => write!(f, "{n}"),
            OptionValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// Validated, immutable engine settings
#[derive(Debug, Clone)]
pub struct Configuration {
    database: String,
    user: Option<String>,
    password: Option<String>,
    options: BTreeMap<String, OptionValue>,
    table: String,
    directory: PathBuf,
    id_format: Regex,
    /// `id_format` anchored at both ends
    id_matcher: Regex,
}

impl Configuration {
    /// Create a builder for the given database location
    pub fn builder(database: impl Into<String>) -> ConfigurationBuilder {
        ConfigurationBuilder::new(database)
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfiguration = serde_json::from_str(input)?;
        raw.try_into()
    }

    /// Parse a YAML configuration document
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfiguration = serde_yaml::from_str(input)?;
        raw.try_into()
    }

    /// Load a configuration file, choosing the format from its extension
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match format {
            ConfigFormat::Json => Self::from_json_str(&content),
            ConfigFormat::Yaml => Self::from_yaml_str(&content),
        }
    }

    /// SQLite database path, or `:memory:`
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Connection options, applied as PRAGMAs after connecting
    pub fn options(&self) -> &BTreeMap<String, OptionValue> {
        &self.options
    }

    /// Ledger table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Directory holding migration definition files
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Pattern every migration id must match
    pub fn id_format(&self) -> &Regex {
        &self.id_format
    }

    /// Returns true if `candidate` matches the id format in full
    pub fn is_valid_id(&self, candidate: &str) -> bool {
        self.id_matcher.is_match(candidate)
    }
}

/// Builder for [`Configuration`]
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    database: String,
    user: Option<String>,
    password: Option<String>,
    options: BTreeMap<String, OptionValue>,
    table: String,
    directory: PathBuf,
    id_format: String,
}

impl ConfigurationBuilder {
    fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            user: None,
            password: None,
            options: BTreeMap::new(),
            table: DEFAULT_TABLE.to_string(),
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            id_format: DEFAULT_ID_FORMAT.to_string(),
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a connection option
    pub fn option(mut self, name: impl Into<String>, value: OptionValue) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    /// Set the ledger table name
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set the migration directory
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Set the id pattern
    pub fn id_format(mut self, pattern: impl Into<String>) -> Self {
        self.id_format = pattern.into();
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTableName`] or [`ConfigError::InvalidOption`]
    /// for names that cannot be interpolated into SQL, and
    /// [`ConfigError::InvalidIdFormat`] if the id pattern does not compile.
    pub fn build(self) -> Result<Configuration, ConfigError> {
        if !is_identifier(&self.table) {
            return Err(ConfigError::InvalidTableName(self.table));
        }
        if let Some(name) = self.options.keys().find(|name| !is_identifier(name)) {
            return Err(ConfigError::InvalidOption(name.clone()));
        }

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidIdFormat {
                pattern: self.id_format.clone(),
                source,
            })
        };
        let id_format = compile(&self.id_format)?;
        let id_matcher = compile(&format!("^(?:{})$", self.id_format))?;

        Ok(Configuration {
            database: self.database,
            user: self.user,
            password: self.password,
            options: self.options,
            table: self.table,
            directory: self.directory,
            id_format,
            id_matcher,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// On-disk configuration shape.
///
/// `serde(default)` only applies when a key is absent, so an explicit `null`
/// survives as `None` and is reported as a missing key.
#[derive(Debug, Deserialize)]
struct RawConfiguration {
    #[serde(alias = "dsn")]
    database: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    options: Option<BTreeMap<String, OptionValue>>,
    #[serde(default = "default_table", alias = "table_name")]
    table: Option<String>,
    #[serde(default = "default_directory")]
    directory: Option<PathBuf>,
    #[serde(default = "default_id_format", alias = "idFormat")]
    id_format: Option<String>,
}

fn default_table() -> Option<String> {
    Some(DEFAULT_TABLE.to_string())
}

fn default_directory() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_DIRECTORY))
}

fn default_id_format() -> Option<String> {
    Some(DEFAULT_ID_FORMAT.to_string())
}

impl TryFrom<RawConfiguration> for Configuration {
    type Error = ConfigError;

    fn try_from(raw: RawConfiguration) -> Result<Self, Self::Error> {
        let database = raw.database.ok_or(ConfigError::MissingKey("database"))?;
        let table = raw.table.ok_or(ConfigError::MissingKey("table"))?;
        let directory = raw.directory.ok_or(ConfigError::MissingKey("directory"))?;
        let id_format = raw.id_format.ok_or(ConfigError::MissingKey("id_format"))?;

        let mut builder = Configuration::builder(database)
            .table(table)
            .directory(directory)
            .id_format(id_format);
        if let Some(user) = raw.user {
            builder = builder.user(user);
        }
        if let Some(password) = raw.password {
            builder = builder.password(password);
        }
        for (name, value) in raw.options.unwrap_or_default() {
            builder = builder.option(name, value);
        }
        builder.build()
    }
}
