//! Value bag: the column-to-serialize map used by `insert`/`replace`/`update`.

use rusqlite::types::Value as SqlValue;

/// An ordered, string-keyed map of columns to bind for an `INSERT`,
/// `REPLACE`, or `UPDATE`.
///
/// Order is preserved so generated SQL text reads the same way across
/// runs; SQLite itself does not care about column order.
#[derive(Debug, Clone, Default)]
pub struct ValueBag {
    columns: Vec<(String, SqlValue)>,
}

impl ValueBag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a column's value. Accepts any scalar that
    /// converts `Into<SqlValue>` (integers of various widths, floats,
    /// strings).
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> &mut Self {
        let column = column.into();
        let value = value.into();
        if let Some(existing) = self.columns.iter_mut().find(|(k, _)| *k == column) {
            existing.1 = value;
        } else {
            self.columns.push((column, value));
        }
        self
    }

    /// The columns in insertion order, as `(name, value)` pairs.
    pub fn columns(&self) -> &[(String, SqlValue)] {
        &self.columns
    }

    /// True if no columns have been set.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_overwrites_existing_column() {
        let mut bag = ValueBag::new();
        bag.put("status_code", 200i64);
        bag.put("status_code", 404i64);
        assert_eq!(bag.columns().len(), 1);
        assert_eq!(bag.columns()[0].1, SqlValue::Integer(404));
    }

    #[test]
    fn preserves_insertion_order() {
        let mut bag = ValueBag::new();
        bag.put("b", 2i64);
        bag.put("a", 1i64);
        let names: Vec<_> = bag.columns().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
