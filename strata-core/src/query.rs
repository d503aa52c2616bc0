//! Filters for listing migrations

use crate::migration::MigrationUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Filter on run state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunFilter {
    /// Only applied migrations
    Ran,
    /// Only unapplied migrations
    #[default]
    Unran,
    /// No filtering
    All,
}

impl RunFilter {
    pub fn matches(self, unit: &MigrationUnit) -> bool {
        match self {
            RunFilter::Ran => unit.is_applied(),
            RunFilter::Unran => !unit.is_applied(),
            RunFilter::All => true,
        }
    }
}

impl FromStr for RunFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ran" => Ok(Self::Ran),
            "unran" => Ok(Self::Unran),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown run filter '{other}' (expected ran, unran or all)"
            )),
        }
    }
}

impl fmt::Display for RunFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunFilter::Ran => "ran",
            RunFilter::Unran => "unran",
            RunFilter::All => "all",
        })
    }
}

/// Conjunction of substring and run-state filters
///
/// The default filter matches every unapplied migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationFilter {
    pub id: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub ticket: Option<String>,
    pub run: RunFilter,
}

impl MigrationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, needle: impl Into<String>) -> Self {
        self.id = Some(needle.into());
        self
    }

    pub fn description(mut self, needle: impl Into<String>) -> Self {
        self.description = Some(needle.into());
        self
    }

    pub fn author(mut self, needle: impl Into<String>) -> Self {
        self.author = Some(needle.into());
        self
    }

    pub fn ticket(mut self, needle: impl Into<String>) -> Self {
        self.ticket = Some(needle.into());
        self
    }

    pub fn run(mut self, run: RunFilter) -> Self {
        self.run = run;
        self
    }

    pub fn matches(&self, unit: &MigrationUnit) -> bool {
        contains(unit.id(), &self.id)
            && contains(unit.description(), &self.description)
            && contains(unit.author(), &self.author)
            && contains(unit.ticket(), &self.ticket)
            && self.run.matches(unit)
    }
}

fn contains(haystack: &str, needle: &Option<String>) -> bool {
    needle.as_deref().map_or(true, |needle| haystack.contains(needle))
}
