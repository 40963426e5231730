//! RAII guards over transactions, cursors, and databases, grounded in
//! `easyhttpcpp::db::AutoSqliteCursor` / `AutoSqliteDatabase` (see
//! `examples/original_source/include/easyhttpcpp/db/AutoSqliteCursor.h`)
//! and the scope-guard pattern's C++ `AutoPtr`-plus-destructor idiom,
//! re-expressed as `Drop` impls.

use crate::db::connection::Database;
use crate::db::cursor::Cursor;

/// Begins a transaction on construction and, unless
/// [`ScopedTransaction::set_successful`] was called, rolls it back on
/// drop. Errors encountered while releasing are logged and swallowed —
/// a destructor has no caller to propagate a `Result` to.
pub struct ScopedTransaction<'a> {
    db: &'a Database,
    successful: bool,
    finished: bool,
}

impl<'a> ScopedTransaction<'a> {
    /// Begin a new transaction on `db`.
    pub fn begin(db: &'a Database) -> crate::error::Result<Self> {
        db.begin_transaction()?;
        Ok(ScopedTransaction { db, successful: false, finished: false })
    }

    /// Mark the transaction for commit instead of rollback at drop time.
    pub fn set_successful(&mut self) {
        self.successful = true;
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.successful {
            if let Err(e) = self.db.set_transaction_successful() {
                log::warn!("failed to mark scoped transaction successful: {e}");
            }
        }
        if let Err(e) = self.db.end_transaction() {
            log::warn!("failed to end scoped transaction: {e}");
        }
        self.finished = true;
    }
}

/// Closes a [`Cursor`] on drop.
pub struct ScopedCursor {
    cursor: Option<Cursor>,
}

impl ScopedCursor {
    /// Take ownership of `cursor`, closing it when this guard drops.
    pub fn new(cursor: Cursor) -> Self {
        ScopedCursor { cursor: Some(cursor) }
    }

    /// Borrow the wrapped cursor.
    pub fn get(&self) -> &Cursor {
        self.cursor.as_ref().expect("cursor present until drop")
    }

    /// Mutably borrow the wrapped cursor.
    pub fn get_mut(&mut self) -> &mut Cursor {
        self.cursor.as_mut().expect("cursor present until drop")
    }
}

impl Drop for ScopedCursor {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

/// Closes a [`Database`] on drop.
pub struct ScopedDatabase {
    db: Option<Database>,
}

impl ScopedDatabase {
    /// Take ownership of `db`, closing it when this guard drops.
    pub fn new(db: Database) -> Self {
        ScopedDatabase { db: Some(db) }
    }

    /// Borrow the wrapped database.
    pub fn get(&self) -> &Database {
        self.db.as_ref().expect("database present until drop")
    }
}

impl Drop for ScopedDatabase {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            db.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query::SelectSpec;
    use crate::db::values::ValueBag;

    fn open_tmp() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_or_create(dir.path().join("test.db")).unwrap();
        db.exec_sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").unwrap();
        (db, dir)
    }

    #[test]
    fn scoped_transaction_rolls_back_by_default() {
        let (db, _dir) = open_tmp();
        {
            let _txn = ScopedTransaction::begin(&db).unwrap();
            let mut values = ValueBag::new();
            values.put("name", "temp".to_string());
            db.insert("t", &values).unwrap();
        }
        let mut cursor = db.raw_query("SELECT COUNT(*) FROM t", &[]).unwrap();
        cursor.move_to_first().unwrap();
        assert_eq!(cursor.get_long_long(0).unwrap(), 0);
    }

    #[test]
    fn scoped_transaction_commits_when_marked_successful() {
        let (db, _dir) = open_tmp();
        {
            let mut txn = ScopedTransaction::begin(&db).unwrap();
            let mut values = ValueBag::new();
            values.put("name", "temp".to_string());
            db.insert("t", &values).unwrap();
            txn.set_successful();
        }
        let mut cursor = db.raw_query("SELECT COUNT(*) FROM t", &[]).unwrap();
        cursor.move_to_first().unwrap();
        assert_eq!(cursor.get_long_long(0).unwrap(), 1);
    }

    #[test]
    fn scoped_cursor_closes_on_drop() {
        let (db, _dir) = open_tmp();
        let spec = SelectSpec { table: "t", ..Default::default() };
        let cursor = db.query(&spec, &[]).unwrap();
        let guard = ScopedCursor::new(cursor);
        assert!(guard.get().is_open());
        drop(guard);
    }

    #[test]
    fn scoped_database_closes_on_drop() {
        let (db, dir) = open_tmp();
        let guard = ScopedDatabase::new(db);
        assert!(guard.get().is_open());
        drop(guard);
        drop(dir);
    }
}
