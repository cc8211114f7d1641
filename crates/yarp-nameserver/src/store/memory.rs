// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory triple store.

use super::{RecordId, StoreError, Triple, TripleStore};

#[derive(Debug, Clone)]
struct Row {
    id: RecordId,
    rid: Option<RecordId>,
    triple: Triple,
}

/// Vector-backed triple store with snapshot rollback.
#[derive(Debug, Default)]
pub struct MemoryTripleStore {
    rows: Vec<Row>,
    next_id: RecordId,
    snapshot: Option<(Vec<Row>, RecordId)>,
    depth: usize,
}

impl MemoryTripleStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Total number of stored triples.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn matching<'a>(
        &'a self,
        pattern: &'a Triple,
        context: Option<RecordId>,
    ) -> impl Iterator<Item = &'a Row> + 'a {
        self.rows
            .iter()
            .filter(move |r| r.rid == context && r.triple.matches(pattern))
    }
}

impl TripleStore for MemoryTripleStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            self.snapshot = Some((self.rows.clone(), self.next_id));
        }
        self.depth += 1;
        Ok(())
    }

    fn end(&mut self) -> Result<(), StoreError> {
        if self.depth == 0 {
            return Err(StoreError::Transaction("end without begin".into()));
        }
        self.depth -= 1;
        if self.depth == 0 {
            self.snapshot = None;
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<(), StoreError> {
        let (rows, next_id) = self
            .snapshot
            .take()
            .ok_or_else(|| StoreError::Transaction("abort without begin".into()))?;
        self.rows = rows;
        self.next_id = next_id;
        self.depth = 0;
        Ok(())
    }

    fn insert(&mut self, triple: &Triple, context: Option<RecordId>) -> Result<(), StoreError> {
        // Ids start at 1 even when constructed through Default
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.rows.push(Row {
            id,
            rid: context,
            triple: triple.clone(),
        });
        Ok(())
    }

    fn find(
        &self,
        pattern: &Triple,
        context: Option<RecordId>,
    ) -> Result<Option<RecordId>, StoreError> {
        Ok(self.matching(pattern, context).next().map(|r| r.id))
    }

    fn query(
        &self,
        pattern: &Triple,
        context: Option<RecordId>,
    ) -> Result<Vec<Triple>, StoreError> {
        Ok(self
            .matching(pattern, context)
            .map(|r| r.triple.clone())
            .collect())
    }

    fn remove_query(
        &mut self,
        pattern: &Triple,
        context: Option<RecordId>,
    ) -> Result<(), StoreError> {
        self.rows
            .retain(|r| !(r.rid == context && r.triple.matches(pattern)));
        Ok(())
    }
}
