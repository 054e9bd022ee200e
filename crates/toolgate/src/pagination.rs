//! Keyset pagination for list-style tools.
//!
//! Rows are ordered by `(ordering_value DESC, id DESC)`. A [`Cursor`] names
//! the last row of the previous page; the next page holds the rows strictly
//! after it in that order:
//!
//! ```text
//! ordering < cursor.ordering OR (ordering = cursor.ordering AND id < cursor.id)
//! ```
//!
//! The composite predicate is a strict total order, so pages never overlap
//! or skip rows, even with ties in the ordering column or with rows inserted
//! between fetches. Tokens are opaque to callers: `"<ordering>|<id>"`.
//!
//! Ordering values and ids are compared as text. Use fixed-width encodings
//! (e.g. RFC 3339 UTC timestamps with a fixed precision) for ordering columns.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const CURSOR_SEPARATOR: char = '|';

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on rows per page regardless of what the caller asks for.
pub const MAX_PAGE_SIZE: usize = 100;

/// A malformed pagination token. Never silently defaulted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCursor {
    #[error("invalid cursor: missing '|' separator")]
    MissingSeparator,
    #[error("invalid cursor: empty ordering value")]
    EmptyOrderingValue,
    #[error("invalid cursor: empty tiebreak id")]
    EmptyTiebreakId,
    #[error("invalid cursor: ordering value contains '|'")]
    SeparatorInOrderingValue,
}

/// Position in a keyset scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    ordering_value: String,
    tiebreak_id: String,
}

impl Cursor {
    pub fn new(
        ordering_value: impl Into<String>,
        tiebreak_id: impl Into<String>,
    ) -> Result<Self, InvalidCursor> {
        let ordering_value = ordering_value.into();
        let tiebreak_id = tiebreak_id.into();
        if ordering_value.is_empty() {
            return Err(InvalidCursor::EmptyOrderingValue);
        }
        if ordering_value.contains(CURSOR_SEPARATOR) {
            return Err(InvalidCursor::SeparatorInOrderingValue);
        }
        if tiebreak_id.is_empty() {
            return Err(InvalidCursor::EmptyTiebreakId);
        }
        Ok(Self {
            ordering_value,
            tiebreak_id,
        })
    }

    pub fn ordering_value(&self) -> &str {
        &self.ordering_value
    }

    pub fn tiebreak_id(&self) -> &str {
        &self.tiebreak_id
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{CURSOR_SEPARATOR}{}",
            self.ordering_value, self.tiebreak_id
        )
    }

    /// Split on the first `|`. Both halves must be non-empty.
    pub fn decode(token: &str) -> Result<Self, InvalidCursor> {
        let (ordering, id) = token
            .split_once(CURSOR_SEPARATOR)
            .ok_or(InvalidCursor::MissingSeparator)?;
        Self::new(ordering, id)
    }

    /// Whether a row keyed `(ordering, id)` comes strictly after this cursor
    /// in `(ordering DESC, id DESC)` order.
    pub fn admits(&self, ordering: &str, id: &str) -> bool {
        ordering < self.ordering_value.as_str()
            || (ordering == self.ordering_value && id < self.tiebreak_id.as_str())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Cursor {
    type Err = InvalidCursor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Cursor::decode(s)
    }
}

/// Encode a cursor token from its two halves.
pub fn encode(ordering_value: &str, tiebreak_id: &str) -> Result<String, InvalidCursor> {
    Cursor::new(ordering_value, tiebreak_id).map(|c| c.encode())
}

/// Decode a cursor token.
pub fn decode(token: &str) -> Result<Cursor, InvalidCursor> {
    Cursor::decode(token)
}

/// Escape a value for interpolation into a quoted textual filter.
///
/// Backslashes are escaped first, then double quotes.
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render the keyset predicate as a PostgREST-style `or` filter.
///
/// Both cursor halves are escaped, so a hostile value cannot close the
/// quoted literal and inject extra conditions.
pub fn keyset_filter(cursor: &Cursor, ordering_column: &str, id_column: &str) -> String {
    let ordering = escape_filter_value(cursor.ordering_value());
    let id = escape_filter_value(cursor.tiebreak_id());
    format!(
        "{ordering_column}.lt.\"{ordering}\",and({ordering_column}.eq.\"{ordering}\",{id_column}.lt.\"{id}\")"
    )
}

/// Clamp a requested page size into `1..=max`, defaulting when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl PaginationConfig {
    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    pub fn resolve(&self, requested: Option<usize>) -> usize {
        let max = self.max_page_size.max(1);
        requested.unwrap_or(self.default_page_size).clamp(1, max)
    }
}

/// Keyset scan parameters handed to the data-access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetQuery {
    pub ordering_column: String,
    pub id_column: String,
    pub page_size: usize,
    pub after: Option<Cursor>,
}

impl KeysetQuery {
    pub fn new(
        ordering_column: impl Into<String>,
        id_column: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            ordering_column: ordering_column.into(),
            id_column: id_column.into(),
            page_size,
            after: None,
        }
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.after = cursor;
        self
    }

    /// One extra row tells us whether another page exists.
    pub fn fetch_limit(&self) -> usize {
        self.page_size + 1
    }

    pub fn admits(&self, ordering: &str, id: &str) -> bool {
        self.after.as_ref().is_none_or(|c| c.admits(ordering, id))
    }

    /// Textual form of the cursor predicate, if a cursor is set.
    pub fn filter_expression(&self) -> Option<String> {
        self.after
            .as_ref()
            .map(|c| keyset_filter(c, &self.ordering_column, &self.id_column))
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Assemble a page from up to `page_size + 1` fetched rows.
    ///
    /// `key` extracts the cursor position of a row; it is only called on the
    /// last kept row, and only when more rows remain.
    pub fn from_rows<F>(mut rows: Vec<T>, page_size: usize, key: F) -> Result<Self, InvalidCursor>
    where
        F: Fn(&T) -> Result<Cursor, InvalidCursor>,
    {
        let has_more = rows.len() > page_size;
        rows.truncate(page_size);
        let next_cursor = match rows.last() {
            Some(last) if has_more => Some(key(last)?.encode()),
            _ => None,
        };
        Ok(Self {
            items: rows,
            has_more,
            next_cursor,
        })
    }
}
