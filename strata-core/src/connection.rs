//! Opening the target database

use crate::config::Configuration;
use crate::error::Result;
use log::{debug, warn};
use rusqlite::Connection;
use std::path::Path;

/// Database location that never touches the filesystem
pub const IN_MEMORY: &str = ":memory:";

/// Opens the configured database and applies its connection options.
///
/// Parent directories of a file database are created as needed. Foreign keys
/// are enabled before the configured options run, so an explicit
/// `foreign_keys` option wins.
pub fn connect(config: &Configuration) -> Result<Connection> {
    if config.user().is_some() || config.password().is_some() {
        warn!("SQLite does not authenticate; ignoring configured user and password");
    }

    let conn = if config.database() == IN_MEMORY {
        Connection::open_in_memory()?
    } else {
        let path = Path::new(config.database());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Connection::open(path)?
    };

    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    for (name, value) in config.options() {
        debug!("PRAGMA {name} = {value}");
        // Some pragmas echo the new value back as a row.
        let mut stmt = conn.prepare(&format!("PRAGMA {name} = {value}"))?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
    }

    Ok(conn)
}
