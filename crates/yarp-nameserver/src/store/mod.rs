// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Triple store abstraction
//!
//! All registry state is kept as `(record, namespace, name, value)` triples.
//! A registration is one top-level `port` triple whose row id doubles as the
//! record id; its attributes (`host`, `socket`, `carrier`, ...) are triples
//! scoped to that record.
//!
//! # Implementations
//!
//! - `SqliteTripleStore` -- `tags` table, file-backed or in-memory
//! - `MemoryTripleStore` -- plain vector, for tests and ephemeral servers

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryTripleStore;
pub use sqlite::SqliteTripleStore;

use thiserror::Error;

/// Wildcard accepted in any field of a pattern.
pub const WILDCARD: &str = "*";

/// Record identifier (row id of the owning top-level triple).
pub type RecordId = i64;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

/// A triple, or a pattern when any field is `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub ns: String,
    pub name: String,
    pub value: String,
}

impl Triple {
    /// Triple without a namespace.
    pub fn name_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            ns: String::new(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn ns_name_value(
        ns: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            ns: ns.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Pattern matching everything.
    pub fn any() -> Self {
        Self::ns_name_value(WILDCARD, WILDCARD, WILDCARD)
    }

    /// Does this (concrete) triple match `pattern`?
    pub fn matches(&self, pattern: &Triple) -> bool {
        let field = |p: &str, v: &str| p == WILDCARD || p == v;
        field(&pattern.ns, &self.ns)
            && field(&pattern.name, &self.name)
            && field(&pattern.value, &self.value)
    }
}

/// Pattern-addressed triple storage.
///
/// `context` scopes an operation to one record; `None` addresses top-level
/// triples (the ones that own records).
pub trait TripleStore: Send {
    /// Open a transaction bracket.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Commit the current transaction.
    fn end(&mut self) -> Result<(), StoreError>;

    /// Discard everything since `begin`.
    fn abort(&mut self) -> Result<(), StoreError>;

    /// Add a triple.
    fn insert(&mut self, triple: &Triple, context: Option<RecordId>) -> Result<(), StoreError>;

    /// Id of the first triple matching `pattern`.
    fn find(&self, pattern: &Triple, context: Option<RecordId>)
        -> Result<Option<RecordId>, StoreError>;

    /// All triples matching `pattern`, in insertion order.
    fn query(&self, pattern: &Triple, context: Option<RecordId>)
        -> Result<Vec<Triple>, StoreError>;

    /// Delete all triples matching `pattern`.
    fn remove_query(&mut self, pattern: &Triple, context: Option<RecordId>)
        -> Result<(), StoreError>;
}
