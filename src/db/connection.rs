//! `Database`: a thread-safe handle over a single SQLite connection.
//!
//! Grounded in `easyhttpcpp::db::SqliteDatabase` (see
//! `examples/original_source/include/easyhttpcpp/db/SqliteDatabase.h`
//! and `src/db/SqliteDatabase.cpp`), adapted from Poco's session/mutex
//! pair to `rusqlite::Connection` behind a `std::sync::Mutex` — callers
//! are expected to run on plain OS threads rather than a task
//! scheduler, so there is no async runtime to hand the lock to.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;

use crate::db::cursor::Cursor;
use crate::db::query::{self, ConflictAlgorithm, SelectSpec};
use crate::db::values::ValueBag;
use crate::error::{CacheError, Result};

/// SQLite's `PRAGMA auto_vacuum` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoVacuum {
    /// Disabled.
    None,
    /// Enabled, reclaiming space eagerly on every commit.
    Full,
    /// Enabled, reclaiming space only via `PRAGMA incremental_vacuum`.
    Incremental,
}

impl AutoVacuum {
    fn from_pragma(value: i64) -> Self {
        match value {
            1 => AutoVacuum::Full,
            2 => AutoVacuum::Incremental,
            _ => AutoVacuum::None,
        }
    }

    fn pragma_value(self) -> i64 {
        match self {
            AutoVacuum::None => 0,
            AutoVacuum::Full => 1,
            AutoVacuum::Incremental => 2,
        }
    }
}

struct Inner {
    conn: Option<rusqlite::Connection>,
    in_transaction: bool,
    transaction_successful: bool,
}

/// A handle to one SQLite database file, safe to share across threads.
///
/// Every mutating or querying method acquires the internal mutex for the
/// duration of the call; there is no connection pool, matching the
/// original's single `Poco::Data::Session` per `SqliteDatabase`.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Mutex<Inner>>,
    path: PathBuf,
}

impl Database {
    /// Open (creating if absent) the database file at `path`.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&path).map_err(|e| CacheError::from_sql(e, &path))?;
        Ok(Database {
            inner: Arc::new(Mutex::new(Inner {
                conn: Some(conn),
                in_transaction: false,
                transaction_successful: false,
            })),
            path,
        })
    }

    /// The path this database was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>) -> Result<T> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or_else(|| CacheError::illegal_state("database is closed"))?;
        f(conn).map_err(|e| CacheError::from_sql(e, &self.path))
    }

    /// Execute a statement with no result rows (DDL, `PRAGMA`, etc.).
    pub fn exec_sql(&self, sql: &str) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch(sql))
    }

    /// Run a `SELECT` built from structured parts, analogous to
    /// `SqliteDatabase::query`.
    pub fn query(&self, spec: &SelectSpec<'_>, args: &[SqlValue]) -> Result<Cursor> {
        let sql = query::build_select(spec)?;
        self.raw_query(&sql, args)
    }

    /// Run a raw `SELECT` string with positional parameters, analogous to
    /// `SqliteDatabase::rawQuery`.
    pub fn raw_query(&self, sql: &str, args: &[SqlValue]) -> Result<Cursor> {
        let guard = self.lock();
        let conn = guard.conn.as_ref().ok_or_else(|| CacheError::illegal_state("database is closed"))?;
        let mut stmt = conn.prepare(sql).map_err(|e| CacheError::from_sql(e, &self.path))?;
        let params = rusqlite::params_from_iter(args.iter());
        let rows = stmt.query(params).map_err(|e| CacheError::from_sql(e, &self.path))?;
        Cursor::from_rows(rows).map_err(|e| CacheError::from_sql(e, &self.path))
    }

    /// `INSERT` a new row, returning the new `rowid`.
    pub fn insert(&self, table: &str, values: &ValueBag) -> Result<i64> {
        self.insert_with_conflict(table, values, ConflictAlgorithm::None)
    }

    /// `INSERT OR REPLACE` a row, returning the affected `rowid`.
    pub fn replace(&self, table: &str, values: &ValueBag) -> Result<i64> {
        self.insert_with_conflict(table, values, ConflictAlgorithm::Replace)
    }

    fn insert_with_conflict(&self, table: &str, values: &ValueBag, conflict: ConflictAlgorithm) -> Result<i64> {
        let (sql, params) = query::build_insert(table, values, conflict);
        self.with_conn(|conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// `UPDATE` rows matching `where_clause`, returning the number changed.
    pub fn update(
        &self,
        table: &str,
        values: &ValueBag,
        where_clause: Option<&str>,
        where_args: &[SqlValue],
    ) -> Result<usize> {
        let (sql, mut params) = query::build_update(table, values, where_clause, ConflictAlgorithm::None)?;
        params.extend(where_args.iter().cloned());
        self.with_conn(|conn| conn.execute(&sql, rusqlite::params_from_iter(params.iter())))
    }

    /// `DELETE` rows matching `where_clause`, returning the number removed.
    pub fn delete(&self, table: &str, where_clause: Option<&str>, where_args: &[SqlValue]) -> Result<usize> {
        let sql = query::build_delete(table, where_clause);
        self.with_conn(|conn| conn.execute(&sql, rusqlite::params_from_iter(where_args.iter())))
    }

    /// Begin a transaction. Nesting is not supported: calling this while
    /// one is already open raises [`CacheError::IllegalState`], matching
    /// `SqliteDatabase::beginTransaction`'s single-level semantics.
    pub fn begin_transaction(&self) -> Result<()> {
        let mut guard = self.lock();
        if guard.in_transaction {
            return Err(CacheError::illegal_state("a transaction is already open"));
        }
        let conn = guard.conn.as_ref().ok_or_else(|| CacheError::illegal_state("database is closed"))?;
        conn.execute_batch("BEGIN").map_err(|e| CacheError::from_sql(e, &self.path))?;
        guard.in_transaction = true;
        guard.transaction_successful = false;
        Ok(())
    }

    /// Mark the open transaction for commit rather than rollback.
    pub fn set_transaction_successful(&self) -> Result<()> {
        let mut guard = self.lock();
        if !guard.in_transaction {
            return Err(CacheError::illegal_state("no transaction is open"));
        }
        guard.transaction_successful = true;
        Ok(())
    }

    /// End the open transaction: commits if [`Database::set_transaction_successful`]
    /// was called since `begin_transaction`, otherwise rolls back.
    pub fn end_transaction(&self) -> Result<()> {
        let mut guard = self.lock();
        if !guard.in_transaction {
            return Err(CacheError::illegal_state("no transaction is open"));
        }
        let stmt = if guard.transaction_successful { "COMMIT" } else { "ROLLBACK" };
        let result = guard
            .conn
            .as_ref()
            .ok_or_else(|| CacheError::illegal_state("database is closed"))
            .and_then(|conn| conn.execute_batch(stmt).map_err(|e| CacheError::from_sql(e, &self.path)));
        guard.in_transaction = false;
        guard.transaction_successful = false;
        result
    }

    /// The schema version (`PRAGMA user_version`).
    pub fn version(&self) -> Result<u32> {
        self.with_conn(|conn| conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0)))
            .map(|v| v as u32)
    }

    /// Set the schema version (`PRAGMA user_version`).
    pub fn set_version(&self, version: u32) -> Result<()> {
        self.exec_sql(&format!("PRAGMA user_version = {version}"))
    }

    /// The database's auto-vacuum mode.
    pub fn auto_vacuum(&self) -> Result<AutoVacuum> {
        self.with_conn(|conn| conn.query_row("PRAGMA auto_vacuum", [], |row| row.get::<_, i64>(0)))
            .map(AutoVacuum::from_pragma)
    }

    /// Set the database's auto-vacuum mode. Changing this on a non-empty
    /// database only takes effect after a `VACUUM`, same as upstream
    /// SQLite; callers that need it applied immediately should run one.
    pub fn set_auto_vacuum(&self, mode: AutoVacuum) -> Result<()> {
        self.exec_sql(&format!("PRAGMA auto_vacuum = {}", mode.pragma_value()))
    }

    /// True until [`Database::close`] has been called.
    pub fn is_open(&self) -> bool {
        self.lock().conn.is_some()
    }

    /// Close the underlying connection. Idempotent.
    pub fn close(&self) {
        let mut guard = self.lock();
        guard.conn = None;
        guard.in_transaction = false;
    }

    /// Reopen a previously closed database at the same path.
    pub fn reopen(&self) -> Result<()> {
        let mut guard = self.lock();
        if guard.conn.is_some() {
            return Ok(());
        }
        let conn = rusqlite::Connection::open(&self.path).map_err(|e| CacheError::from_sql(e, &self.path))?;
        guard.conn = Some(conn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_or_create(dir.path().join("test.db")).unwrap();
        db.exec_sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        (db, dir)
    }

    #[test]
    fn insert_and_query_round_trip() {
        let (db, _dir) = open_tmp();
        let mut values = ValueBag::new();
        values.put("name", "alice".to_string());
        db.insert("t", &values).unwrap();

        let spec = SelectSpec { table: "t", ..Default::default() };
        let mut cursor = db.query(&spec, &[]).unwrap();
        assert!(cursor.move_to_first().unwrap());
        assert_eq!(cursor.get_string(cursor.column_index("name").unwrap()).unwrap(), "alice");
    }

    #[test]
    fn update_reports_rows_changed() {
        let (db, _dir) = open_tmp();
        let mut values = ValueBag::new();
        values.put("name", "alice".to_string());
        db.insert("t", &values).unwrap();

        let mut update_values = ValueBag::new();
        update_values.put("name", "bob".to_string());
        let changed = db
            .update("t", &update_values, Some("name = ?1"), &[SqlValue::Text("alice".into())])
            .unwrap();
        assert_eq!(changed, 1);
    }

    #[test]
    fn transaction_rolls_back_without_success_marker() {
        let (db, _dir) = open_tmp();
        db.begin_transaction().unwrap();
        let mut values = ValueBag::new();
        values.put("name", "temp".to_string());
        db.insert("t", &values).unwrap();
        db.end_transaction().unwrap();

        let mut cursor = db.raw_query("SELECT COUNT(*) FROM t", &[]).unwrap();
        cursor.move_to_first().unwrap();
        assert_eq!(cursor.get_long_long(0).unwrap(), 0);
    }

    #[test]
    fn transaction_commits_with_success_marker() {
        let (db, _dir) = open_tmp();
        db.begin_transaction().unwrap();
        let mut values = ValueBag::new();
        values.put("name", "temp".to_string());
        db.insert("t", &values).unwrap();
        db.set_transaction_successful().unwrap();
        db.end_transaction().unwrap();

        let mut cursor = db.raw_query("SELECT COUNT(*) FROM t", &[]).unwrap();
        cursor.move_to_first().unwrap();
        assert_eq!(cursor.get_long_long(0).unwrap(), 1);
    }

    #[test]
    fn nested_transaction_is_illegal_state() {
        let (db, _dir) = open_tmp();
        db.begin_transaction().unwrap();
        assert!(matches!(db.begin_transaction(), Err(CacheError::IllegalState(_))));
        db.end_transaction().unwrap();
    }

    #[test]
    fn version_round_trips() {
        let (db, _dir) = open_tmp();
        db.set_version(7).unwrap();
        assert_eq!(db.version().unwrap(), 7);
    }

    #[test]
    fn close_then_query_is_illegal_state() {
        let (db, _dir) = open_tmp();
        db.close();
        assert!(!db.is_open());
        let spec = SelectSpec { table: "t", ..Default::default() };
        assert!(matches!(db.query(&spec, &[]), Err(CacheError::IllegalState(_))));
    }

    #[test]
    fn reopen_after_close_succeeds() {
        let (db, _dir) = open_tmp();
        db.close();
        db.reopen().unwrap();
        assert!(db.is_open());
        let spec = SelectSpec { table: "t", ..Default::default() };
        assert!(db.query(&spec, &[]).is_ok());
    }
}
