// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Versioned SQLite schema migrations.
//!
//! Each component sharing a database file owns a row in `schema_version`
//! and an ordered list of migrations. Migrations only ever add tables or
//! nullable columns, so databases written by older servers keep working.

use super::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

/// One schema step.
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub apply: fn(&Connection) -> rusqlite::Result<()>,
}

/// Current schema version of `component` (0 if never migrated).
pub fn current_version(conn: &Connection, component: &str) -> Result<u32, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            component TEXT PRIMARY KEY,
            version INTEGER NOT NULL
        )",
        [],
    )?;
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM schema_version WHERE component = ?1",
            [component],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or(0) as u32)
}

/// Apply every migration newer than the recorded version, in order.
///
/// Returns the resulting version.
pub fn migrate(
    conn: &mut Connection,
    component: &str,
    migrations: &[Migration],
) -> Result<u32, StoreError> {
    let start = current_version(conn, component)?;
    let mut version = start;

    for m in migrations.iter().filter(|m| m.version > start) {
        info!("Migrating {} schema to v{}: {}", component, m.version, m.description);
        let tx = conn.transaction()?;
        (m.apply)(&tx)?;
        tx.execute(
            "INSERT OR REPLACE INTO schema_version (component, version) VALUES (?1, ?2)",
            params![component, m.version],
        )?;
        tx.commit()?;
        version = m.version;
    }

    debug!("{} schema at v{}", component, version);
    Ok(version)
}

/// Does `table` have a column called `column`?
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|n| n.eq_ignore_ascii_case(column)))
}

/// `ALTER TABLE ... ADD COLUMN` unless an older server already added it.
pub fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> rusqlite::Result<()> {
    if !column_exists(conn, table, column)? {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
            [],
        )?;
    }
    Ok(())
}
