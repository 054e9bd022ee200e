//! The data-access collaborator.
//!
//! Handlers reach the relational store only through [`DataAccess`]: row-level
//! select / insert / update / delete on JSON rows. The trait is object-safe
//! (boxed futures) so the context can hold an `Arc<dyn DataAccess>`.

mod memory;

pub use memory::MemoryStore;

use crate::pagination::KeysetQuery;
use crate::tools::core::{FailureKind, ToolFailure};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// One row: column name to JSON value.
pub type Row = Map<String, Value>;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("row is missing required column '{0}'")]
    MissingColumn(String),
    #[error("{table} row '{id}' not found")]
    NotFound { table: String, id: String },
    #[error("{table} row '{id}' already exists")]
    Conflict { table: String, id: String },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("data store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ToolFailure {
    fn from(err: StoreError) -> Self {
        let kind = match err {
            StoreError::Unavailable(_) => FailureKind::Transient,
            StoreError::NotFound { .. } | StoreError::MissingColumn(_) => {
                FailureKind::InvalidArguments
            }
            StoreError::Conflict { .. } | StoreError::InvalidQuery(_) => FailureKind::Internal,
        };
        ToolFailure::new(kind, err.to_string())
    }
}

/// A row-level query: equality filters, optional keyset ordering, a limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<(String, Value)>,
    pub keyset: Option<KeysetQuery>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            keyset: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Order by the keyset and fetch `page_size + 1` rows after its cursor.
    pub fn keyset(mut self, keyset: KeysetQuery) -> Self {
        self.limit = Some(keyset.fetch_limit());
        self.keyset = Some(keyset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }

    /// PostgREST-style rendering of the filters, for textual backends and
    /// logs. The keyset predicate is rendered escaped, as an `or=(...)` term.
    pub fn filter_expression(&self) -> String {
        let mut parts: Vec<String> = self
            .filters
            .iter()
            .map(|(column, value)| match value {
                Value::String(s) => format!("{column}=eq.{s}"),
                other => format!("{column}=eq.{other}"),
            })
            .collect();
        if let Some(expr) = self.keyset.as_ref().and_then(KeysetQuery::filter_expression) {
            parts.push(format!("or=({expr})"));
        }
        if let Some(keyset) = &self.keyset {
            parts.push(format!(
                "order={}.desc,{}.desc",
                keyset.ordering_column, keyset.id_column
            ));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        parts.join("&")
    }
}

/// Row-level access to the relational store.
pub trait DataAccess: Send + Sync {
    fn select<'a>(&'a self, query: Query) -> StoreFuture<'a, Vec<Row>>;

    /// Insert a row. The row must carry a string `id`.
    fn insert<'a>(&'a self, table: &'a str, row: Row) -> StoreFuture<'a, Row>;

    /// Merge `patch` into the row with `id`. Returns the updated row.
    fn update<'a>(&'a self, table: &'a str, id: &'a str, patch: Row) -> StoreFuture<'a, Row>;

    /// Delete the row with `id`. Returns the removed row.
    fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> StoreFuture<'a, Row>;
}

/// Read a string column, or fail with `MissingColumn`.
pub fn string_column<'r>(row: &'r Row, column: &str) -> Result<&'r str, StoreError> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::MissingColumn(column.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::Cursor;
    use serde_json::json;

    #[test]
    fn filter_expression_renders_escaped_keyset() {
        let keyset = KeysetQuery::new("created_at", "id", 10)
            .after(Some(Cursor::new("2024\"x", "t-1").unwrap()));
        let q = Query::table("tasks").eq("workspace_id", "w1").keyset(keyset);
        assert_eq!(
            q.filter_expression(),
            r#"workspace_id=eq.w1&or=(created_at.lt."2024\"x",and(created_at.eq."2024\"x",id.lt."t-1"))&order=created_at.desc,id.desc&limit=11"#
        );
    }

    #[test]
    fn matches_requires_every_filter() {
        let q = Query::table("tasks").eq("a", 1).eq("b", "x");
        let row: Row = json!({"a": 1, "b": "x", "c": true})
            .as_object()
            .cloned()
            .unwrap();
        assert!(q.matches(&row));
        let row: Row = json!({"a": 1}).as_object().cloned().unwrap();
        assert!(!q.matches(&row));
    }

    #[test]
    fn store_errors_map_to_failure_kinds() {
        let f: ToolFailure = StoreError::NotFound {
            table: "tasks".into(),
            id: "t9".into(),
        }
        .into();
        assert_eq!(f.kind, FailureKind::InvalidArguments);
        assert!(f.message.contains("not found"));

        let f: ToolFailure = StoreError::Unavailable("connection reset".into()).into();
        assert_eq!(f.kind, FailureKind::Transient);
    }
}
