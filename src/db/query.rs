//! Query builder: constructs parameterized SQL text.
//!
//! Grounded in `easyhttpcpp::db::SqliteQueryBuilder` (see
//! `examples/original_source/src/db/SqliteQueryBuilder.cpp`), with one
//! deliberate behavioural hardening over the original: value columns
//! are always bound as SQL parameters, never interpolated as literal
//! text.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;

use crate::db::values::ValueBag;
use crate::error::{CacheError, Result};

static LIMIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*(,\s*\d+\s*)?$").expect("valid regex"));

/// SQLite `INSERT OR <conflict>` / `UPDATE OR <conflict>` resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictAlgorithm {
    /// No conflict clause (plain `INSERT`/`UPDATE`).
    #[default]
    None,
    /// `OR ROLLBACK`
    Rollback,
    /// `OR ABORT`
    Abort,
    /// `OR FAIL`
    Fail,
    /// `OR IGNORE`
    Ignore,
    /// `OR REPLACE`
    Replace,
}

impl ConflictAlgorithm {
    fn keyword(self) -> &'static str {
        match self {
            ConflictAlgorithm::None => "",
            ConflictAlgorithm::Rollback => "OR ROLLBACK ",
            ConflictAlgorithm::Abort => "OR ABORT ",
            ConflictAlgorithm::Fail => "OR FAIL ",
            ConflictAlgorithm::Ignore => "OR IGNORE ",
            ConflictAlgorithm::Replace => "OR REPLACE ",
        }
    }
}

/// Options accepted by [`build_select`]. All fields are optional except
/// `table` and `columns`.
#[derive(Debug, Clone, Default)]
pub struct SelectSpec<'a> {
    /// Table to select from.
    pub table: &'a str,
    /// Columns to project; empty means `SELECT *`.
    pub columns: &'a [&'a str],
    /// Raw `WHERE` clause text; placeholders are bound separately by
    /// the caller.
    pub where_clause: Option<&'a str>,
    /// Raw `GROUP BY` clause text, column list only (no keyword).
    pub group_by: Option<&'a str>,
    /// Raw `HAVING` clause text. Rejected unless `group_by` is also set.
    pub having: Option<&'a str>,
    /// Raw `ORDER BY` clause text, column list only (no keyword).
    pub order_by: Option<&'a str>,
    /// Must match `\s*\d+\s*(,\s*\d+\s*)?`.
    pub limit: Option<&'a str>,
    /// Emit `SELECT DISTINCT` instead of plain `SELECT`.
    pub distinct: bool,
}

/// Build a parameterized `SELECT` string.
///
/// `HAVING` without `GROUP BY` and a malformed `LIMIT` both raise
/// [`CacheError::IllegalArgument`].
pub fn build_select(spec: &SelectSpec<'_>) -> Result<String> {
    if spec.group_by.is_none() && spec.having.is_some() {
        return Err(CacheError::illegal_argument(
            "HAVING clauses are only permitted when using a GROUP BY clause",
        ));
    }
    if let Some(limit) = spec.limit {
        if !LIMIT_PATTERN.is_match(limit) {
            return Err(CacheError::illegal_argument("invalid LIMIT clause"));
        }
    }

    let mut sql = String::from("SELECT ");
    if spec.distinct {
        sql.push_str("DISTINCT ");
    }
    if spec.columns.is_empty() {
        sql.push_str("* ");
    } else {
        sql.push_str(&spec.columns.join(", "));
        sql.push(' ');
    }
    sql.push_str("FROM ");
    sql.push_str(spec.table);

    if let Some(w) = spec.where_clause {
        if !w.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
    }
    if let Some(g) = spec.group_by {
        if !g.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(g);
        }
    }
    if let Some(h) = spec.having {
        if !h.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(h);
        }
    }
    if let Some(o) = spec.order_by {
        if !o.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(o);
        }
    }
    if let Some(l) = spec.limit {
        if !l.is_empty() {
            sql.push_str(" LIMIT ");
            sql.push_str(l);
        }
    }
    Ok(sql)
}

/// Build a parameterized `INSERT [OR <conflict>]` string and its bound
/// parameters, in column order.
pub fn build_insert(
    table: &str,
    values: &ValueBag,
    conflict: ConflictAlgorithm,
) -> (String, Vec<SqlValue>) {
    let mut sql = String::from("INSERT ");
    sql.push_str(conflict.keyword());
    sql.push_str("INTO ");
    sql.push_str(table);

    if values.is_empty() {
        sql.push_str(" DEFAULT VALUES");
        return (sql, Vec::new());
    }

    let names: Vec<&str> = values.columns().iter().map(|(k, _)| k.as_str()).collect();
    let placeholders: Vec<String> =
        (1..=names.len()).map(|i| format!("?{i}")).collect();
    sql.push_str(" (");
    sql.push_str(&names.join(", "));
    sql.push_str(") VALUES (");
    sql.push_str(&placeholders.join(", "));
    sql.push(')');

    let params = values.columns().iter().map(|(_, v)| v.clone()).collect();
    (sql, params)
}

/// Build a parameterized `UPDATE [OR <conflict>]` string and its bound
/// value parameters. `WHERE` placeholders, if any, are appended by the
/// caller after the value parameters (matching
/// `SqliteDatabase::update`'s argument order in the original).
pub fn build_update(
    table: &str,
    values: &ValueBag,
    where_clause: Option<&str>,
    conflict: ConflictAlgorithm,
) -> Result<(String, Vec<SqlValue>)> {
    if values.is_empty() {
        return Err(CacheError::illegal_argument("no values to update"));
    }

    let mut sql = String::from("UPDATE ");
    sql.push_str(conflict.keyword());
    sql.push_str(table);
    sql.push_str(" SET ");

    let assignments: Vec<String> = values
        .columns()
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("{name} = ?{}", i + 1))
        .collect();
    sql.push_str(&assignments.join(", "));

    if let Some(w) = where_clause {
        if !w.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
    }

    let params = values.columns().iter().map(|(_, v)| v.clone()).collect();
    Ok((sql, params))
}

/// Build a `DELETE FROM <table> [WHERE ...]` string. `WHERE` placeholders
/// are bound by the caller.
pub fn build_delete(table: &str, where_clause: Option<&str>) -> String {
    let mut sql = String::from("DELETE FROM ");
    sql.push_str(table);
    if let Some(w) = where_clause {
        if !w.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn having_without_group_by_is_rejected() {
        let spec = SelectSpec {
            table: "t",
            having: Some("count(*) > 1"),
            ..Default::default()
        };
        assert!(matches!(build_select(&spec), Err(CacheError::IllegalArgument(_))));
    }

    #[test]
    fn having_with_group_by_is_accepted() {
        let spec = SelectSpec {
            table: "t",
            group_by: Some("a"),
            having: Some("count(*) > 1"),
            ..Default::default()
        };
        assert!(build_select(&spec).is_ok());
    }

    #[test]
    fn limit_accepts_single_number_and_pair() {
        let mut spec = SelectSpec { table: "t", limit: Some("10"), ..Default::default() };
        assert!(build_select(&spec).is_ok());
        spec.limit = Some("5, 10");
        assert!(build_select(&spec).is_ok());
    }

    #[test]
    fn limit_rejects_garbage() {
        let spec = SelectSpec { table: "t", limit: Some("quiver"), ..Default::default() };
        assert!(matches!(build_select(&spec), Err(CacheError::IllegalArgument(_))));
    }

    #[test]
    fn select_star_when_no_columns_given() {
        let spec = SelectSpec { table: "t", ..Default::default() };
        assert_eq!(build_select(&spec).unwrap(), "SELECT * FROM t");
    }

    #[test]
    fn select_distinct_projects_named_columns() {
        let spec = SelectSpec {
            table: "t",
            columns: &["a", "b"],
            distinct: true,
            ..Default::default()
        };
        assert_eq!(build_select(&spec).unwrap(), "SELECT DISTINCT a, b FROM t");
    }

    #[test]
    fn insert_binds_values_as_parameters_not_literals() {
        let mut values = ValueBag::new();
        values.put("cache_key", "a'; DROP TABLE cache_metadata; --".to_string());
        let (sql, params) = build_insert("cache_metadata", &values, ConflictAlgorithm::Replace);
        assert_eq!(sql, "INSERT OR REPLACE INTO cache_metadata (cache_key) VALUES (?1)");
        assert_eq!(params.len(), 1);
        assert!(!sql.contains("DROP TABLE"));
    }

    #[test]
    fn update_requires_at_least_one_value() {
        let values = ValueBag::new();
        assert!(build_update("t", &values, None, ConflictAlgorithm::None).is_err());
    }

    #[test]
    fn update_produces_named_assignments_in_order() {
        let mut values = ValueBag::new();
        values.put("a", 1i64);
        values.put("b", 2i64);
        let (sql, params) =
            build_update("t", &values, Some("id = ?3"), ConflictAlgorithm::None).unwrap();
        assert_eq!(sql, "UPDATE t SET a = ?1, b = ?2 WHERE id = ?3");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn delete_without_where_clears_whole_table() {
        assert_eq!(build_delete("t", None), "DELETE FROM t");
    }
}
