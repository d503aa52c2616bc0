//! Ledger table access
//!
//! The ledger records one row per known migration id:
//! - `id`: the migration id (primary key)
//! - `run_date`: when the migration was applied (NULL = unapplied)
//!
//! Run dates are written as RFC 3339 UTC text at whole-second precision.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection};

/// Format accepted for run dates written by other tools
const PLAIN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub id: String,
    pub run_date: Option<DateTime<Utc>>,
}

/// Statements against the ledger table.
///
/// The table name comes from a validated [`crate::Configuration`], so it is safe
/// to interpolate.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Checks whether the ledger table exists
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&self.table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Creates the ledger table
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE {} (
                id TEXT NOT NULL PRIMARY KEY,
                run_date TIMESTAMP DEFAULT NULL
            );
            "#,
            self.table
        ))?;
        Ok(())
    }

    /// All rows, newest id first
    pub fn rows(&self, conn: &Connection) -> Result<Vec<LedgerRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, run_date FROM {} ORDER BY id DESC",
            self.table
        ))?;

        let raw: Vec<(String, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, run_date)| {
                let run_date = run_date
                    .map(|value| parse_run_date(&id, &value))
                    .transpose()?;
                Ok(LedgerRow { id, run_date })
            })
            .collect()
    }

    /// Inserts an unapplied row
    pub fn insert(&self, conn: &Connection, id: &str) -> Result<()> {
        conn.execute(&format!("INSERT INTO {} (id) VALUES (?1)", self.table), [id])?;
        Ok(())
    }

    /// Inserts a row that is already applied.
    ///
    /// Only used while bootstrapping, when the root migration records itself in
    /// the table it has just created.
    pub fn insert_applied(&self, conn: &Connection, id: &str, run_date: DateTime<Utc>) -> Result<()> {
        conn.execute(
            &format!("INSERT INTO {} (id, run_date) VALUES (?1, ?2)", self.table),
            params![id, format_run_date(run_date)],
        )?;
        Ok(())
    }

    /// Sets or clears the run date of an existing row
    pub fn set_run_date(
        &self,
        conn: &Connection,
        id: &str,
        run_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        conn.execute(
            &format!("UPDATE {} SET run_date = ?1 WHERE id = ?2", self.table),
            params![run_date.map(format_run_date), id],
        )?;
        Ok(())
    }

    /// Deletes a row
    pub fn delete(&self, conn: &Connection, id: &str) -> Result<()> {
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", self.table), [id])?;
        Ok(())
    }
}

/// Current time at ledger precision
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn format_run_date(run_date: DateTime<Utc>) -> String {
    run_date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_run_date(id: &str, value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, PLAIN_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::InvalidRunDate {
            id: id.to_string(),
            value: value.to_string(),
        })
}
