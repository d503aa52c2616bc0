//! File-backed migrations
//!
//! A definition file carries its metadata as `-- strata:<key> <value>` directives,
//! followed by an `apply` section and an optional `rollback` section:
//!
//! ```text
//! -- strata:description Create users table
//! -- strata:author Alice
//! -- strata:ticket T-1
//! -- strata:transactional true
//! -- strata:depends 20240101_000000
//! -- strata:apply
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//! -- strata:rollback
//! DROP TABLE users;
//! ```
//!
//! Without a `rollback` section, or with `-- strata:irreversible <reason>`, rollback
//! fails with [`Error::IrreversibleMigration`].
//!
//! Inside a transaction, `BEGIN`, `COMMIT`, `END` and `ROLLBACK` (other than
//! `ROLLBACK TO`) are refused before they run with [`Error::TransactionEnded`].

use super::{Migration, MigrationInfo};
use crate::error::{Error, Result};
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::{Batch, Connection};
use std::path::Path;

const DIRECTIVE_PREFIX: &str = "-- strata:";

/// Template used by `create` when the migration directory has none of its own
pub const DEFAULT_TEMPLATE: &str = include_str!("migration.template");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Apply,
    Rollback,
}

/// A migration defined by a SQL file
#[derive(Debug, Clone)]
pub struct SqlMigration {
    info: MigrationInfo,
    apply_sql: String,
    rollback: Rollback,
}

#[derive(Debug, Clone)]
enum Rollback {
    Sql(String),
    Irreversible(Option<String>),
}

impl SqlMigration {
    /// Build a migration from SQL strings
    pub fn new(info: MigrationInfo, apply_sql: impl Into<String>) -> Self {
        Self {
            info,
            apply_sql: apply_sql.into(),
            rollback: Rollback::Irreversible(None),
        }
    }

    /// Set the SQL that undoes the migration
    pub fn with_rollback(mut self, rollback_sql: impl Into<String>) -> Self {
        self.rollback = Rollback::Sql(rollback_sql.into());
        self
    }

    /// Returns true if a rollback section is defined
    pub fn is_reversible(&self) -> bool {
        matches!(self.rollback, Rollback::Sql(_))
    }

    /// Parse a definition file's contents. `path` is only used in error messages.
    pub fn parse(id: &str, path: &Path, source: &str) -> Result<Self> {
        let invalid = |message: String| Error::InvalidDefinition {
            path: path.to_path_buf(),
            message,
        };

        let mut info = MigrationInfo::new(id, "");
        let mut section = Section::Header;
        let mut apply_sql: Option<String> = None;
        let mut rollback_sql: Option<String> = None;
        let mut irreversible: Option<Option<String>> = None;

        for (index, line) in source.lines().enumerate() {
            let line_no = index + 1;

            let Some(directive) = line.trim_start().strip_prefix(DIRECTIVE_PREFIX) else {
                match section {
                    Section::Header => {}
                    Section::Apply => push_line(&mut apply_sql, line),
                    Section::Rollback => push_line(&mut rollback_sql, line),
                }
                continue;
            };

            let (key, value) = match directive.trim().split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (directive.trim(), ""),
            };

            match key {
                "apply" => {
                    if apply_sql.is_some() {
                        return Err(invalid(format!("line {line_no}: duplicate apply section")));
                    }
                    section = Section::Apply;
                    apply_sql = Some(String::new());
                }
                "rollback" => {
                    if rollback_sql.is_some() {
                        return Err(invalid(format!(
                            "line {line_no}: duplicate rollback section"
                        )));
                    }
                    section = Section::Rollback;
                    rollback_sql = Some(String::new());
                }
                "irreversible" => {
                    irreversible = Some((!value.is_empty()).then(|| value.to_string()));
                }
                _ if section != Section::Header => {
                    return Err(invalid(format!(
                        "line {line_no}: directive '{key}' must appear before the apply section"
                    )));
                }
                "description" => info.description = value.to_string(),
                "author" => info.author = value.to_string(),
                "ticket" => info.ticket = value.to_string(),
                "transactional" => {
                    info.transactional = value.parse().map_err(|_| {
                        invalid(format!(
                            "line {line_no}: transactional must be true or false, got '{value}'"
                        ))
                    })?;
                }
                "depends" => {
                    info.dependencies = value
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|dep| !dep.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                other => {
                    return Err(invalid(format!(
                        "line {line_no}: unknown directive '{other}'"
                    )))
                }
            }
        }

        let apply_sql = apply_sql.ok_or_else(|| invalid("missing apply section".to_string()))?;
        let rollback = match (irreversible, rollback_sql) {
            (Some(reason), _) => Rollback::Irreversible(reason),
            (None, Some(sql)) => Rollback::Sql(sql),
            (None, None) => Rollback::Irreversible(None),
        };

        Ok(Self {
            info,
            apply_sql,
            rollback,
        })
    }
}

fn push_line(buffer: &mut Option<String>, line: &str) {
    if let Some(buffer) = buffer {
        buffer.push_str(line);
        buffer.push('\n');
    }
}

impl Migration for SqlMigration {
    fn info(&self) -> &MigrationInfo {
        &self.info
    }

    fn apply(&self, conn: &Connection) -> Result<()> {
        run_batch(conn, &self.info.id, &self.apply_sql)
    }

    fn rollback(&self, conn: &Connection) -> Result<()> {
        match &self.rollback {
            Rollback::Sql(sql) => run_batch(conn, &self.info.id, sql),
            Rollback::Irreversible(reason) => Err(Error::IrreversibleMigration {
                id: self.info.id.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Runs `sql` one statement at a time.
///
/// Outside a transaction the batch runs as is.
fn run_batch(conn: &Connection, id: &str, sql: &str) -> Result<()> {
    if conn.is_autocommit() {
        conn.execute_batch(sql)?;
        return Ok(());
    }

    let mut batch = Batch::new(conn, sql);
    while let Some(mut stmt) = batch.next()? {
        let text = stmt.expanded_sql().unwrap_or_default();
        if let Some(statement) = transaction_control(&text) {
            return Err(Error::TransactionEnded {
                id: id.to_string(),
                statement: Some(statement.trim_end().to_string()),
            });
        }
        // Some statements (PRAGMA, SELECT) return rows
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
    }
    Ok(())
}

/// Returns the statement if it would end the enclosing transaction
fn transaction_control(sql: &str) -> Option<&str> {
    let statement = skip_leading_comments(sql);
    let mut words = statement
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|word| !word.is_empty());
    let keyword = words.next()?;

    let ends = if ["BEGIN", "COMMIT", "END"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
    {
        true
    } else if keyword.eq_ignore_ascii_case("ROLLBACK") {
        // ROLLBACK [TRANSACTION] TO <savepoint> keeps the transaction open
        !words
            .find(|word| !word.eq_ignore_ascii_case("TRANSACTION"))
            .is_some_and(|word| word.eq_ignore_ascii_case("TO"))
    } else {
        false
    };
    ends.then_some(statement)
}

fn skip_leading_comments(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, rest)| rest);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, rest)| rest);
        } else {
            return sql;
        }
    }
}

/// Fill the template placeholders.
///
/// Substituted values are flattened to a single line so they cannot start a
/// directive of their own.
pub(crate) fn render_template(
    template: &str,
    id: &str,
    description: &str,
    author: &str,
    ticket: &str,
) -> String {
    let flat = |value: &str| value.replace(['\r', '\n'], " ");
    template
        .replace("%id%", &flat(id))
        .replace("%description%", &flat(description))
        .replace("%author%", &flat(author))
        .replace("%ticket%", &flat(ticket))
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = "\
-- strata:description Create users table
-- strata:author Alice
-- strata:ticket T-1
-- strata:depends 20240101_000000, 20240102_000000
-- strata:apply
CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
-- strata:rollback
DROP TABLE users;
";

    fn parse(source: &str) -> Result<SqlMigration> {
        SqlMigration::parse("20240103_000000", Path::new("20240103_000000.sql"), source)
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn test_parse_header() {
        let migration = parse(USERS).unwrap();
        let info = migration.info();
        assert_eq!(info.id, "20240103_000000");
        assert_eq!(info.description, "Create users table");
        assert_eq!(info.author, "Alice");
        assert_eq!(info.ticket, "T-1");
        assert!(info.transactional);
        assert_eq!(
            info.dependencies,
            vec!["20240101_000000".to_string(), "20240102_000000".to_string()]
        );
        assert!(migration.is_reversible());
    }

    #[test]
    fn test_apply_and_rollback_execute_sections() {
        let conn = Connection::open_in_memory().unwrap();
        let migration = parse(USERS).unwrap();

        migration.apply(&conn).unwrap();
        assert!(table_exists(&conn, "users"));

        migration.rollback(&conn).unwrap();
        assert!(!table_exists(&conn, "users"));
    }

    #[test]
    fn test_non_transactional_flag() {
        let migration =
            parse("-- strata:transactional false\n-- strata:apply\nVACUUM;\n").unwrap();
        assert!(!migration.info().transactional);
    }

    #[test]
    fn test_invalid_transactional_value() {
        let err = parse("-- strata:transactional maybe\n-- strata:apply\n").unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
    }

    #[test]
    fn test_missing_apply_section() {
        let err = parse("-- strata:description nothing to do\n").unwrap_err();
        match err {
            Error::InvalidDefinition { message, .. } => {
                assert!(message.contains("missing apply section"))
            }
            other => panic!("Expected InvalidDefinition, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_directive() {
        let err = parse("-- strata:reviewer Bob\n-- strata:apply\n").unwrap_err();
        assert!(err.to_string().contains("unknown directive 'reviewer'"));
    }

    #[test]
    fn test_header_directive_after_apply() {
        let err = parse("-- strata:apply\nSELECT 1;\n-- strata:author Bob\n").unwrap_err();
        assert!(err.to_string().contains("before the apply section"));
    }

    #[test]
    fn test_without_rollback_is_irreversible() {
        let conn = Connection::open_in_memory().unwrap();
        let migration = parse("-- strata:apply\nCREATE TABLE t (id INTEGER);\n").unwrap();
        assert!(!migration.is_reversible());

        let err = migration.rollback(&conn).unwrap_err();
        assert!(matches!(
            err,
            Error::IrreversibleMigration { reason: None, .. }
        ));
    }

    #[test]
    fn test_irreversible_marker_with_reason() {
        let migration = parse(
            "-- strata:apply\nDELETE FROM t;\n-- strata:irreversible deleted rows are gone\n",
        )
        .unwrap();
        let conn = Connection::open_in_memory().unwrap();
        match migration.rollback(&conn).unwrap_err() {
            Error::IrreversibleMigration { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("deleted rows are gone"))
            }
            other => panic!("Expected IrreversibleMigration, got {other:?}"),
        }
    }

    #[test]
    fn test_transaction_control_statements() {
        assert!(transaction_control("COMMIT;").is_some());
        assert!(transaction_control("\n-- done\nend transaction;").is_some());
        assert!(transaction_control("/* again */ BEGIN IMMEDIATE;").is_some());
        assert!(transaction_control("ROLLBACK;").is_some());
        assert!(transaction_control("ROLLBACK TRANSACTION;").is_some());
        assert!(transaction_control("ROLLBACK TO before_copy;").is_none());
        assert!(transaction_control("rollback transaction to savepoint s;").is_none());
        assert!(transaction_control("CREATE TABLE commit_log (id INTEGER);").is_none());
        assert!(transaction_control("-- COMMIT\nSELECT 1;").is_none());
    }

    #[test]
    fn test_commit_refused_inside_transaction() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migration =
            parse("-- strata:apply\nCREATE TABLE users (id INTEGER);\nCOMMIT;\n").unwrap();

        let tx = conn.transaction().unwrap();
        let err = migration.apply(&tx).unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionEnded { statement: Some(ref s), .. } if s == "COMMIT;"
        ));
        assert!(!tx.is_autocommit());
        tx.rollback().unwrap();
        assert!(!table_exists(&conn, "users"));
    }

    #[test]
    fn test_trigger_body_and_savepoints_allowed_inside_transaction() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migration = parse(
            "-- strata:apply\n\
             CREATE TABLE users (id INTEGER, touched INTEGER);\n\
             CREATE TRIGGER touch AFTER INSERT ON users BEGIN\n\
               UPDATE users SET touched = 1 WHERE id = NEW.id;\n\
             END;\n\
             SAVEPOINT seed;\n\
             INSERT INTO users (id) VALUES (1);\n\
             ROLLBACK TO seed;\n\
             RELEASE seed;\n\
             PRAGMA table_info(users);\n",
        )
        .unwrap();

        let tx = conn.transaction().unwrap();
        migration.apply(&tx).unwrap();
        tx.commit().unwrap();
        assert!(table_exists(&conn, "users"));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transaction_control_allowed_outside_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        let migration = parse(
            "-- strata:transactional false\n\
             -- strata:apply\n\
             BEGIN;\n\
             CREATE TABLE users (id INTEGER);\n\
             COMMIT;\n",
        )
        .unwrap();
        migration.apply(&conn).unwrap();
        assert!(table_exists(&conn, "users"));
    }

    #[test]
    fn test_default_template_parses() {
        let rendered = render_template(
            DEFAULT_TEMPLATE,
            "20240103_000000",
            "Add index",
            "Alice",
            "T-9",
        );
        let migration = parse(&rendered).unwrap();
        assert_eq!(migration.info().description, "Add index");
        assert_eq!(migration.info().author, "Alice");
        assert_eq!(migration.info().ticket, "T-9");
        assert!(migration.is_reversible());

        let conn = Connection::open_in_memory().unwrap();
        migration.apply(&conn).unwrap();
        migration.rollback(&conn).unwrap();
    }

    #[test]
    fn test_render_template_flattens_newlines() {
        let rendered = render_template(
            "-- strata:description %description%\n",
            "x",
            "first\n-- strata:transactional false",
            "",
            "",
        );
        assert_eq!(rendered.lines().count(), 1);
    }
}
