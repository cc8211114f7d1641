// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite triple store
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE tags (
//!     id INTEGER PRIMARY KEY,
//!     rid INTEGER,
//!     ns TEXT,
//!     name TEXT,
//!     value TEXT
//! );
//! CREATE INDEX idx_tags_name ON tags(name, value);
//! CREATE INDEX idx_tags_rid ON tags(rid);
//! ```

use super::schema::{self, Migration};
use super::{RecordId, StoreError, Triple, TripleStore, WILDCARD};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const COMPONENT: &str = "tags";

fn create_tags(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY,
            rid INTEGER,
            ns TEXT,
            name TEXT,
            value TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name, value);
        CREATE INDEX IF NOT EXISTS idx_tags_rid ON tags(rid);",
    )
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "tags table",
    apply: create_tags,
}];

/// Triple store over a SQLite `tags` table.
pub struct SqliteTripleStore {
    conn: Connection,
    depth: usize,
}

impl SqliteTripleStore {
    /// Open (or create) a file-backed store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StoreError> {
        schema::migrate(&mut conn, COMPONENT, MIGRATIONS)?;
        Ok(Self { conn, depth: 0 })
    }

    /// Build the WHERE clause for a pattern/context pair.
    fn filter(pattern: &Triple, context: Option<RecordId>) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::with_capacity(4);
        let mut args = Vec::with_capacity(4);

        match context {
            Some(rid) => {
                clauses.push("rid = ?".to_string());
                args.push(SqlValue::Integer(rid));
            }
            None => clauses.push("rid IS NULL".to_string()),
        }

        for (column, field) in [
            ("ns", &pattern.ns),
            ("name", &pattern.name),
            ("value", &pattern.value),
        ] {
            if field != WILDCARD {
                clauses.push(format!("{} = ?", column));
                args.push(SqlValue::Text(field.clone()));
            }
        }

        (clauses.join(" AND "), args)
    }
}

impl TripleStore for SqliteTripleStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            self.conn.execute_batch("BEGIN TRANSACTION")?;
        }
        self.depth += 1;
        Ok(())
    }

    fn end(&mut self) -> Result<(), StoreError> {
        match self.depth {
            0 => Err(StoreError::Transaction("end without begin".into())),
            1 => {
                self.depth = 0;
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            _ => {
                self.depth -= 1;
                Ok(())
            }
        }
    }

    fn abort(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::Transaction("abort without begin".into()));
        }
        self.depth = 0;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn insert(&mut self, triple: &Triple, context: Option<RecordId>) -> Result<(), StoreError> {
        debug!(
            "insert rid={:?} {}:{}={}",
            context, triple.ns, triple.name, triple.value
        );
        self.conn.execute(
            "INSERT INTO tags (rid, ns, name, value) VALUES (?1, ?2, ?3, ?4)",
            params![context, triple.ns, triple.name, triple.value],
        )?;
        Ok(())
    }

    fn find(
        &self,
        pattern: &Triple,
        context: Option<RecordId>,
    ) -> Result<Option<RecordId>, StoreError> {
        let (clause, args) = Self::filter(pattern, context);
        let sql = format!("SELECT id FROM tags WHERE {} ORDER BY id LIMIT 1", clause);
        let id = self
            .conn
            .query_row(&sql, params_from_iter(args), |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn query(
        &self,
        pattern: &Triple,
        context: Option<RecordId>,
    ) -> Result<Vec<Triple>, StoreError> {
        let (clause, args) = Self::filter(pattern, context);
        let sql = format!("SELECT ns, name, value FROM tags WHERE {} ORDER BY id", clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let triples = stmt
            .query_map(params_from_iter(args), |row| {
                Ok(Triple {
                    ns: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    value: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(triples)
    }

    fn remove_query(
        &mut self,
        pattern: &Triple,
        context: Option<RecordId>,
    ) -> Result<(), StoreError> {
        let (clause, args) = Self::filter(pattern, context);
        let sql = format!("DELETE FROM tags WHERE {}", clause);
        debug!("Query: {}", sql);
        self.conn.execute(&sql, params_from_iter(args))?;
        Ok(())
    }
}
