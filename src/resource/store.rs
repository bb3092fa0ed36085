//! Row store boundary
//!
//! The relational store is an external collaborator; the pipeline only
//! depends on this trait. `MemoryStore` backs tests and demos, and
//! records per-operation call counts so tests can assert a mutation was
//! never attempted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::connection::Criterion;
use crate::pipeline::BoxFuture;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures. Surfaced to callers as an opaque 500.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed row data: {0}")]
    Malformed(String),
}

/// Select/insert/update/delete over JSON-object rows.
///
/// Identifier and owner column names are the caller's concern
/// (`ResourceOptions`); the store is generic over them.
pub trait RowStore: Send + Sync {
    /// All rows matching the criterion; all rows when `None`.
    fn select<'a>(
        &'a self,
        table: &'a str,
        criterion: Option<&'a Criterion>,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>>;

    /// The row whose id column matches, if any.
    fn find_by_id<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>>;

    /// Insert a row, generating an identifier when the id column is
    /// absent. Returns the stored row including the generated id.
    fn insert<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        row: Value,
    ) -> BoxFuture<'a, StoreResult<Value>>;

    /// Merge a partial patch into the matching row. `None` when zero
    /// rows were affected.
    fn update_by_id<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        id: &'a str,
        patch: Value,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>>;

    /// Delete the matching row, returning the affected count.
    fn delete_by_id<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<u64>>;
}

/// Whether a row's identifier value matches a string id. Stores may
/// keep ids as strings or numbers.
pub(crate) fn value_matches_id(value: &Value, id: &str) -> bool {
    match value {
        Value::String(s) => s == id,
        Value::Number(n) => n.to_string() == id,
        _ => false,
    }
}

// Criteria built from query params carry string values; a numeric
// column matches its string form, same policy as `value_matches_id`.
fn matches_criterion(row: &Value, criterion: &Criterion) -> bool {
    criterion.0.iter().all(|(column, expected)| {
        row.get(column).is_some_and(|actual| {
            actual == expected
                || matches!(expected, Value::String(s) if value_matches_id(actual, s))
        })
    })
}

/// Per-operation call counters, readable from tests.
#[derive(Debug, Default)]
pub struct CallCounts {
    select: AtomicUsize,
    insert: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

impl CallCounts {
    pub fn select(&self) -> usize {
        self.select.load(Ordering::SeqCst)
    }

    pub fn insert(&self) -> usize {
        self.insert.load(Ordering::SeqCst)
    }

    pub fn update(&self) -> usize {
        self.update.load(Ordering::SeqCst)
    }

    pub fn delete(&self) -> usize {
        self.delete.load(Ordering::SeqCst)
    }
}

/// In-process row store for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    /// Call counters for asserting which operations ran.
    pub calls: CallCounts,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing counters.
    pub fn seed(&self, table: &str, row: Value) {
        self.tables
            .write()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .unwrap()
            .get(table)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

impl RowStore for MemoryStore {
    fn select<'a>(
        &'a self,
        table: &'a str,
        criterion: Option<&'a Criterion>,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        Box::pin(async move {
            self.calls.select.fetch_add(1, Ordering::SeqCst);
            let tables = self.tables.read().unwrap();
            let rows = tables.get(table).cloned().unwrap_or_default();
            Ok(match criterion {
                Some(c) => rows.into_iter().filter(|r| matches_criterion(r, c)).collect(),
                None => rows,
            })
        })
    }

    fn find_by_id<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        Box::pin(async move {
            self.calls.select.fetch_add(1, Ordering::SeqCst);
            let tables = self.tables.read().unwrap();
            Ok(tables.get(table).and_then(|rows| {
                rows.iter()
                    .find(|r| r.get(id_column).is_some_and(|v| value_matches_id(v, id)))
                    .cloned()
            }))
        })
    }

    fn insert<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        row: Value,
    ) -> BoxFuture<'a, StoreResult<Value>> {
        Box::pin(async move {
            self.calls.insert.fetch_add(1, Ordering::SeqCst);
            let Value::Object(mut fields) = row else {
                return Err(StoreError::Malformed("insert payload must be an object".into()));
            };
            fields
                .entry(id_column.to_string())
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            let stored = Value::Object(fields);
            self.tables
                .write()
                .unwrap()
                .entry(table.to_string())
                .or_default()
                .push(stored.clone());
            Ok(stored)
        })
    }

    fn update_by_id<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        id: &'a str,
        patch: Value,
    ) -> BoxFuture<'a, StoreResult<Option<Value>>> {
        Box::pin(async move {
            self.calls.update.fetch_add(1, Ordering::SeqCst);
            let Value::Object(patch) = patch else {
                return Err(StoreError::Malformed("update payload must be an object".into()));
            };
            let mut tables = self.tables.write().unwrap();
            let Some(rows) = tables.get_mut(table) else {
                return Ok(None);
            };
            for row in rows.iter_mut() {
                let matches = row
                    .get(id_column)
                    .is_some_and(|v| value_matches_id(v, id));
                if matches {
                    if let Value::Object(fields) = row {
                        for (key, value) in patch {
                            fields.insert(key, value);
                        }
                    }
                    return Ok(Some(row.clone()));
                }
            }
            Ok(None)
        })
    }

    fn delete_by_id<'a>(
        &'a self,
        table: &'a str,
        id_column: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<u64>> {
        Box::pin(async move {
            self.calls.delete.fetch_add(1, Ordering::SeqCst);
            let mut tables = self.tables.write().unwrap();
            let Some(rows) = tables.get_mut(table) else {
                return Ok(0);
            };
            let before = rows.len();
            rows.retain(|r| !r.get(id_column).is_some_and(|v| value_matches_id(v, id)));
            Ok((before - rows.len()) as u64)
        })
    }
}
