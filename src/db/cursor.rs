//! Cursor: a forward/backward, absolutely positionable row iterator.
//!
//! Grounded in `easyhttpcpp::db::Cursor`/`SqliteCursor` (see
//! `examples/original_source/include/easyhttpcpp/db/Cursor.h` and
//! `src/db/SqliteCursor.cpp`). The original holds a live `sqlite3_stmt`
//! and steps it lazily; a `rusqlite::Rows` handle can't be stored
//! alongside the `Mutex<Connection>` it borrows from without unsafe
//! self-referential tricks, so this cursor snapshots every row up front
//! at query time and then walks the in-memory copy. Positioning and
//! typed-getter semantics match the original exactly.

use rusqlite::types::Value as SqlValue;
use rusqlite::Row;

use crate::error::{CacheError, Result};

/// The dynamic type of a column's stored value, mirroring
/// `easyhttpcpp::db::CursorFieldType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// SQL `NULL`.
    Null,
    /// Any SQLite integer affinity.
    Integer,
    /// Any SQLite real/float affinity.
    Float,
    /// Text.
    String,
    /// BLOB.
    Blob,
}

/// A materialized, randomly positionable view over a query's result set.
///
/// Position starts at `-1` (before the first row), matching
/// `SqliteCursor`'s initial state: callers must call `move_to_first` or
/// `move_next` before reading.
#[derive(Debug)]
pub struct Cursor {
    column_names: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    position: i64,
    closed: bool,
}

impl Cursor {
    pub(crate) fn from_rows(mut rusqlite_rows: rusqlite::Rows<'_>) -> rusqlite::Result<Self> {
        let column_names = rusqlite_rows
            .as_ref()
            .map(|stmt| stmt.column_names().iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        let mut rows = Vec::new();
        while let Some(row) = rusqlite_rows.next()? {
            rows.push(Self::materialize_row(row, &column_names)?);
        }
        Ok(Cursor { column_names, rows, position: -1, closed: false })
    }

    fn materialize_row(row: &Row<'_>, column_names: &[String]) -> rusqlite::Result<Vec<SqlValue>> {
        (0..column_names.len()).map(|i| row.get::<_, SqlValue>(i)).collect()
    }

    /// Build a cursor directly from already-collected rows and column
    /// names, bypassing `rusqlite` entirely. Used in tests to exercise
    /// positioning and typed-getter behaviour without a real database.
    #[cfg(test)]
    pub(crate) fn from_materialized(column_names: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Cursor { column_names, rows, position: -1, closed: false }
    }

    /// Number of rows in the result set.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns per row.
    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    /// The column names, in select order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// The index of `name`, or an error if no such column exists.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| CacheError::illegal_argument(format!("no such column: {name}")))
    }

    /// The current zero-based row position. `-1` before the first row,
    /// `count()` past the last.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// True if positioned at the first row (and there is one).
    pub fn is_first(&self) -> bool {
        !self.rows.is_empty() && self.position == 0
    }

    /// True if positioned at the last row (and there is one).
    pub fn is_last(&self) -> bool {
        !self.rows.is_empty() && self.position == self.rows.len() as i64 - 1
    }

    /// Mark the cursor closed. Further reads return
    /// [`CacheError::IllegalState`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// True until [`Cursor::close`] has been called.
    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Move to the first row. Returns `false` if the result set is empty.
    pub fn move_to_first(&mut self) -> Result<bool> {
        self.move_to_position(0)
    }

    /// Move to the last row. Returns `false` if the result set is empty.
    pub fn move_to_last(&mut self) -> Result<bool> {
        if self.rows.is_empty() {
            return Ok(false);
        }
        self.move_to_position(self.rows.len() as i64 - 1)
    }

    /// Move one row forward.
    pub fn move_to_next(&mut self) -> Result<bool> {
        self.move_by(1)
    }

    /// Move one row backward.
    pub fn move_to_previous(&mut self) -> Result<bool> {
        self.move_by(-1)
    }

    /// Move `offset` rows relative to the current position (may be
    /// negative).
    pub fn move_by(&mut self, offset: i64) -> Result<bool> {
        self.move_to_position(self.position + offset)
    }

    /// Move to an absolute zero-based position. Returns `false` (without
    /// erroring) if `position` lands outside `[0, count())`, matching
    /// `SqliteCursor::moveToPosition`'s clamping behaviour; the cursor is
    /// left at the nearest boundary in that case.
    pub fn move_to_position(&mut self, position: i64) -> Result<bool> {
        self.ensure_open()?;
        if self.rows.is_empty() {
            self.position = -1;
            return Ok(false);
        }
        let clamped = position.clamp(-1, self.rows.len() as i64);
        self.position = clamped;
        Ok(clamped >= 0 && clamped < self.rows.len() as i64)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CacheError::illegal_state("cursor is closed"));
        }
        Ok(())
    }

    fn current_row(&self) -> Result<&[SqlValue]> {
        self.ensure_open()?;
        if self.position < 0 || self.position >= self.rows.len() as i64 {
            return Err(CacheError::illegal_state("cursor is not positioned on a row"));
        }
        Ok(&self.rows[self.position as usize])
    }

    fn value(&self, column_index: usize) -> Result<&SqlValue> {
        let row = self.current_row()?;
        row.get(column_index)
            .ok_or_else(|| CacheError::illegal_argument(format!("column index {column_index} out of range")))
    }

    /// True if the column at `column_index` is SQL `NULL`.
    pub fn is_null(&self, column_index: usize) -> Result<bool> {
        Ok(matches!(self.value(column_index)?, SqlValue::Null))
    }

    /// The dynamic type of the column at `column_index`.
    pub fn field_type(&self, column_index: usize) -> Result<FieldType> {
        Ok(match self.value(column_index)? {
            SqlValue::Null => FieldType::Null,
            SqlValue::Integer(_) => FieldType::Integer,
            SqlValue::Real(_) => FieldType::Float,
            SqlValue::Text(_) => FieldType::String,
            SqlValue::Blob(_) => FieldType::Blob,
        })
    }

    /// Read the column as `i64`. Errors if the column is not an integer.
    pub fn get_long_long(&self, column_index: usize) -> Result<i64> {
        match self.value(column_index)? {
            SqlValue::Integer(v) => Ok(*v),
            other => Err(type_mismatch("integer", other)),
        }
    }

    /// Read the column as `i64`, defaulting to `0` on `NULL` or mismatch.
    pub fn get_long_long_or(&self, column_index: usize, default: i64) -> i64 {
        self.get_long_long(column_index).unwrap_or(default)
    }

    /// Read the column as `u64`. Errors if negative or not an integer.
    pub fn get_unsigned_long_long(&self, column_index: usize) -> Result<u64> {
        let v = self.get_long_long(column_index)?;
        u64::try_from(v).map_err(|_| CacheError::illegal_argument("value is negative"))
    }

    /// Read the column as `i32`, truncating/erroring as `i32::try_from` does.
    pub fn get_int(&self, column_index: usize) -> Result<i32> {
        let v = self.get_long_long(column_index)?;
        i32::try_from(v).map_err(|_| CacheError::illegal_argument("value out of i32 range"))
    }

    /// Read the column as `f64`.
    pub fn get_double(&self, column_index: usize) -> Result<f64> {
        match self.value(column_index)? {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => Err(type_mismatch("real", other)),
        }
    }

    /// Read the column as `f32`.
    pub fn get_float(&self, column_index: usize) -> Result<f32> {
        Ok(self.get_double(column_index)? as f32)
    }

    /// Read the column as a `String`. `NULL` reads as an empty string,
    /// matching `SqliteCursor::getString`'s behaviour for `NULL` columns.
    pub fn get_string(&self, column_index: usize) -> Result<String> {
        match self.value(column_index)? {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Null => Ok(String::new()),
            SqlValue::Integer(v) => Ok(v.to_string()),
            SqlValue::Real(v) => Ok(v.to_string()),
            other => Err(type_mismatch("string", other)),
        }
    }

    /// Read the column as a `String`, defaulting on any error.
    pub fn get_string_or(&self, column_index: usize, default: &str) -> String {
        self.get_string(column_index).unwrap_or_else(|_| default.to_string())
    }
}

fn type_mismatch(expected: &str, actual: &SqlValue) -> CacheError {
    CacheError::illegal_argument(format!("expected {expected} column, found {actual:?}"))
}
