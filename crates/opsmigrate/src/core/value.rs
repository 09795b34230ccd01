//! Row values for batched tabular copies.
//!
//! Values are owned so a batch can be handed from the source connection to
//! the target connection without borrowing either.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),

    /// Text data.
    Text(String),

    /// Binary data, also used for DECIMAL and other values the server
    /// sends in their textual form.
    Bytes(Vec<u8>),

    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

/// A batch of rows read from one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    /// Column names, in row order.
    pub columns: Vec<String>,

    /// Primary key columns of the source table. Empty for keyless tables.
    pub primary_key: Vec<String>,

    /// Rows in this batch.
    pub rows: Vec<Vec<SqlValue>>,

    /// Key of the last row, when it can seed a keyset page.
    pub last_key: Option<Vec<SqlValue>>,
}

impl RowBatch {
    /// Create a new batch with the given rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows,
            ..Self::default()
        }
    }

    /// Attach the source primary key.
    pub fn with_primary_key(mut self, primary_key: Vec<String>) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Attach the key of the last row.
    pub fn with_last_key(mut self, last_key: Option<Vec<SqlValue>>) -> Self {
        self.last_key = last_key;
        self
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Where the next page of a tabular read starts.
///
/// Readers that can page by key use `last_key`; the rest skip `offset`
/// rows of a stable ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowCursor {
    /// Rows read so far.
    pub offset: u64,

    /// Key of the last row read, if the reader reported one.
    pub last_key: Option<Vec<SqlValue>>,
}

impl RowCursor {
    /// Cursor at the first row.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn is_start(&self) -> bool {
        self.offset == 0
    }

    /// Move past `batch`.
    pub fn advance(&mut self, batch: &RowBatch) {
        self.offset += batch.len() as u64;
        self.last_key = batch.last_key.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_tracks_offset_and_last_key() {
        let mut cursor = RowCursor::start();
        assert!(cursor.is_start());

        let batch = RowBatch::new(
            vec!["id".into()],
            vec![vec![SqlValue::I64(1)], vec![SqlValue::I64(2)]],
        )
        .with_last_key(Some(vec![SqlValue::I64(2)]));
        cursor.advance(&batch);
        assert_eq!(cursor.offset, 2);
        assert_eq!(cursor.last_key, Some(vec![SqlValue::I64(2)]));

        // A page without a usable key drops back to offset paging.
        let batch = RowBatch::new(vec!["id".into()], vec![vec![SqlValue::Null]]);
        cursor.advance(&batch);
        assert_eq!(cursor.offset, 3);
        assert!(cursor.last_key.is_none());
        assert!(!cursor.is_start());
    }
}
