use super::{DataAccess, Query, Row, StoreError, StoreFuture, string_column};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-process [`DataAccess`] over tables of JSON rows.
///
/// Keyset queries are evaluated with the same strict predicate a textual
/// backend would receive, so paging behaves identically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .map_or(0, Vec::len)
    }

    fn select_now(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get(&query.table) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<Row> = Vec::new();
        for row in rows.iter().filter(|r| query.matches(r)) {
            if let Some(keyset) = &query.keyset {
                let ordering = sort_key(row, &keyset.ordering_column)?;
                let id = sort_key(row, &keyset.id_column)?;
                if !keyset.admits(&ordering, &id) {
                    continue;
                }
            }
            selected.push(row.clone());
        }

        if let Some(keyset) = &query.keyset {
            let key = |r: &Row| {
                (
                    sort_key(r, &keyset.ordering_column).unwrap_or_default(),
                    sort_key(r, &keyset.id_column).unwrap_or_default(),
                )
            };
            selected.sort_by_key(|r| std::cmp::Reverse(key(r)));
        }

        if let Some(limit) = query.limit {
            selected.truncate(limit);
        }
        Ok(selected)
    }

    fn insert_now(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let id = string_column(&row, "id")?.to_string();
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| r.get("id").and_then(Value::as_str) == Some(id.as_str())) {
            return Err(StoreError::Conflict {
                table: table.to_string(),
                id,
            });
        }
        rows.push(row.clone());
        Ok(row)
    }

    fn update_now(&self, table: &str, id: &str, patch: Row) -> Result<Row, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let row = tables
            .get_mut(table)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            })
            .ok_or_else(|| not_found(table, id))?;
        for (column, value) in patch {
            if column != "id" {
                row.insert(column, value);
            }
        }
        Ok(row.clone())
    }

    fn delete_now(&self, table: &str, id: &str) -> Result<Row, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables.get_mut(table).ok_or_else(|| not_found(table, id))?;
        let index = rows
            .iter()
            .position(|r| r.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| not_found(table, id))?;
        Ok(rows.remove(index))
    }
}

fn not_found(table: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        table: table.to_string(),
        id: id.to_string(),
    }
}

/// Textual sort key for a keyset column. Strings are used as-is; other
/// scalars by their JSON rendering.
fn sort_key(row: &Row, column: &str) -> Result<String, StoreError> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Null) | None => Err(StoreError::MissingColumn(column.to_string())),
        Some(other) => Ok(other.to_string()),
    }
}

impl DataAccess for MemoryStore {
    fn select<'a>(&'a self, query: Query) -> StoreFuture<'a, Vec<Row>> {
        Box::pin(async move { self.select_now(&query) })
    }

    fn insert<'a>(&'a self, table: &'a str, row: Row) -> StoreFuture<'a, Row> {
        Box::pin(async move { self.insert_now(table, row) })
    }

    fn update<'a>(&'a self, table: &'a str, id: &'a str, patch: Row) -> StoreFuture<'a, Row> {
        Box::pin(async move { self.update_now(table, id, patch) })
    }

    fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> StoreFuture<'a, Row> {
        Box::pin(async move { self.delete_now(table, id) })
    }
}
