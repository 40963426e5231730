//! Schema lifecycle management, grounded in
//! `easyhttpcpp::db::SqliteOpenHelper` (see
//! `examples/original_source/include/easyhttpcpp/db/SqliteOpenHelper.h`
//! and `src/db/SqliteOpenHelper.cpp`).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db::connection::{AutoVacuum, Database};
use crate::error::{CacheError, Result};

/// The `cache_metadata` table's current DDL version.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Hooks invoked at well-defined points in a database's lifecycle.
/// Default no-op bodies match `SqliteOpenHelper`'s non-pure-virtual
/// members (`onConfigure`, `onOpen`, `onDowngrade`); `on_create` and
/// `on_upgrade` have no sensible default and must be implemented.
pub trait SchemaHooks: Send + Sync {
    /// Called once per `get_writable`/`get_readable` call, before the
    /// version is inspected. Good place for `PRAGMA` tuning that must
    /// apply on every open, not just creation.
    fn on_configure(&self, _db: &Database) -> Result<()> {
        Ok(())
    }

    /// Called exactly once, the first time the database is opened
    /// (`PRAGMA user_version` reads `0`), inside the same transaction
    /// that will set the version forward.
    fn on_create(&self, db: &Database) -> Result<()>;

    /// Called when the on-disk version is below [`SchemaManager`]'s
    /// configured version.
    fn on_upgrade(&self, db: &Database, old_version: u32, new_version: u32) -> Result<()>;

    /// Called when the on-disk version is above the configured version.
    /// The original only logs; a real caller doesn't normally hit this.
    fn on_downgrade(&self, _db: &Database, old_version: u32, new_version: u32) -> Result<()> {
        log::debug!("can't downgrade database from version {old_version} to {new_version}");
        Ok(())
    }

    /// Called every time the database is opened, after any
    /// create/upgrade/downgrade step has run.
    fn on_open(&self, _db: &Database) -> Result<()> {
        Ok(())
    }
}

/// Notified whenever a managed database is found to be corrupt.
pub trait CorruptionListener: Send + Sync {
    /// Called with the path of the database file that failed to parse,
    /// and the error that revealed the corruption.
    fn on_corrupt(&self, path: &Path, cause: &CacheError);
}

struct NoopCorruptionListener;
impl CorruptionListener for NoopCorruptionListener {
    fn on_corrupt(&self, _path: &Path, _cause: &CacheError) {}
}

struct State {
    database: Option<Database>,
    initializing: bool,
}

/// Owns a database's open/create/upgrade lifecycle, the way
/// `SqliteOpenHelper` does for a single file.
pub struct SchemaManager<H: SchemaHooks> {
    path: PathBuf,
    version: u32,
    hooks: H,
    state: Mutex<State>,
    corruption_listener: Mutex<Box<dyn CorruptionListener>>,
}

impl<H: SchemaHooks> SchemaManager<H> {
    /// Construct a manager for the database at `path`, targeting schema
    /// `version`. `version` must be `>= 1`.
    pub fn new(path: impl Into<PathBuf>, version: u32, hooks: H) -> Result<Self> {
        if version < 1 {
            return Err(CacheError::illegal_argument(format!(
                "version must be >= 1, was {version}"
            )));
        }
        Ok(SchemaManager {
            path: path.into(),
            version,
            hooks,
            state: Mutex::new(State { database: None, initializing: false }),
            corruption_listener: Mutex::new(Box::new(NoopCorruptionListener)),
        })
    }

    /// Path to the managed database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The target schema version this manager maintains.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Install a listener notified on corruption detection.
    pub fn set_corruption_listener(&self, listener: Box<dyn CorruptionListener>) {
        *self.corruption_listener.lock().unwrap_or_else(|p| p.into_inner()) = listener;
    }

    fn notify_corruption(&self, err: &CacheError) {
        if err.is_corruption() {
            self.corruption_listener
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .on_corrupt(&self.path, err);
        }
    }

    /// Get a database handle suitable for writing. There is no separate
    /// read-only pool, mirroring `SqliteOpenHelper::getReadableDatabase`
    /// which also just returns the single writable handle.
    pub fn get_writable(&self) -> Result<Database> {
        self.get_database()
    }

    /// Get a database handle suitable for reading.
    pub fn get_readable(&self) -> Result<Database> {
        self.get_database()
    }

    fn get_database(&self) -> Result<Database> {
        let result = self.get_database_inner();
        if let Err(err) = &result {
            self.notify_corruption(err);
        }
        result
    }

    fn get_database_inner(&self) -> Result<Database> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(db) = &state.database {
                if db.is_open() {
                    return Ok(db.clone());
                }
                state.database = None;
            }
            if state.initializing {
                return Err(CacheError::illegal_state("getDatabase called recursively"));
            }
            state.initializing = true;
        }

        let outcome = self.open_and_migrate();

        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.initializing = false;
        match outcome {
            Ok(db) => {
                state.database = Some(db.clone());
                Ok(db)
            }
            Err(e) => Err(e),
        }
    }

    fn open_and_migrate(&self) -> Result<Database> {
        let db = Database::open_or_create(&self.path)?;
        self.hooks.on_configure(&db)?;

        let on_disk_version = db.version()?;

        if on_disk_version == 0 {
            // Auto-vacuum must be set before any table creation; failing
            // to set it leaves the database perfectly usable, so this is
            // logged and swallowed rather than propagated.
            if let Err(e) = db.set_auto_vacuum(AutoVacuum::Full) {
                log::info!("failed to set auto-vacuum status to full: {e}");
            }
        }

        if on_disk_version != self.version {
            db.begin_transaction()?;
            let migration = if on_disk_version == 0 {
                self.hooks.on_create(&db)
            } else if on_disk_version > self.version {
                self.hooks.on_downgrade(&db, on_disk_version, self.version)
            } else {
                self.hooks.on_upgrade(&db, on_disk_version, self.version)
            };
            migration?;
            db.set_version(self.version)?;
            db.set_transaction_successful()?;
            db.end_transaction()?;
        }

        self.hooks.on_open(&db)?;
        Ok(db)
    }

    /// Close the managed database. Calling this while a `get_*` call on
    /// another thread is mid-initialization raises
    /// [`CacheError::IllegalState`].
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.initializing {
            return Err(CacheError::illegal_state("closed during initialization"));
        }
        if let Some(db) = state.database.take() {
            db.close();
        }
        Ok(())
    }
}

/// The hooks implementation for the `cache_metadata` table.
pub struct CacheSchema;

impl SchemaHooks for CacheSchema {
    fn on_create(&self, db: &Database) -> Result<()> {
        db.exec_sql(
            "CREATE TABLE cache_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cache_key TEXT UNIQUE NOT NULL,
                url TEXT NOT NULL,
                method INTEGER NOT NULL,
                status_code INTEGER NOT NULL,
                status_message TEXT NOT NULL,
                response_header_json TEXT NOT NULL,
                response_body_size INTEGER NOT NULL,
                sent_request_at_epoch INTEGER NOT NULL,
                received_response_at_epoch INTEGER NOT NULL,
                created_at_epoch INTEGER NOT NULL,
                last_accessed_at_epoch INTEGER NOT NULL
            )",
        )?;
        db.exec_sql(
            "CREATE INDEX idx_cache_metadata_last_accessed ON cache_metadata (last_accessed_at_epoch)",
        )
    }

    fn on_upgrade(&self, _db: &Database, old_version: u32, new_version: u32) -> Result<()> {
        Err(CacheError::illegal_state(format!(
            "no migration path from version {old_version} to {new_version}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn rejects_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let result = SchemaManager::new(dir.path().join("c.db"), 0, CacheSchema);
        assert!(matches!(result, Err(CacheError::IllegalArgument(_))));
    }

    #[test]
    fn creates_table_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SchemaManager::new(dir.path().join("c.db"), CACHE_SCHEMA_VERSION, CacheSchema).unwrap();
        let db = manager.get_writable().unwrap();
        assert_eq!(db.version().unwrap(), CACHE_SCHEMA_VERSION);
        let mut cursor = db
            .raw_query("SELECT name FROM sqlite_master WHERE type='table' AND name='cache_metadata'", &[])
            .unwrap();
        assert!(cursor.move_to_first().unwrap());
    }

    #[test]
    fn reuses_open_database_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SchemaManager::new(dir.path().join("c.db"), CACHE_SCHEMA_VERSION, CacheSchema).unwrap();
        let a = manager.get_writable().unwrap();
        let b = manager.get_readable().unwrap();
        assert_eq!(a.path(), b.path());
    }

    #[test]
    fn close_then_reopen_creates_fresh_handle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SchemaManager::new(dir.path().join("c.db"), CACHE_SCHEMA_VERSION, CacheSchema).unwrap();
        manager.get_writable().unwrap();
        manager.close().unwrap();
        let db = manager.get_writable().unwrap();
        assert!(db.is_open());
    }

    struct CountingHooks {
        creates: AtomicUsize,
    }
    impl SchemaHooks for CountingHooks {
        fn on_create(&self, db: &Database) -> Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            db.exec_sql("CREATE TABLE t (id INTEGER PRIMARY KEY)")
        }
        fn on_upgrade(&self, _db: &Database, _old: u32, _new: u32) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn on_create_runs_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SchemaManager::new(dir.path().join("c.db"), 1, CountingHooks { creates: AtomicUsize::new(0) }).unwrap();
        manager.get_writable().unwrap();
        manager.close().unwrap();
        manager.get_writable().unwrap();
        assert_eq!(manager.hooks.creates.load(Ordering::SeqCst), 1);
    }

    struct RecordingCorruptionListener {
        notified: std::sync::Arc<AtomicUsize>,
    }
    impl CorruptionListener for RecordingCorruptionListener {
        fn on_corrupt(&self, _path: &Path, _cause: &CacheError) {
            self.notified.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn corrupt_database_notifies_listener_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.db");
        std::fs::write(&path, b"not a sqlite file at all, long enough to parse as a header").unwrap();

        let manager = SchemaManager::new(&path, CACHE_SCHEMA_VERSION, CacheSchema).unwrap();
        let notified = std::sync::Arc::new(AtomicUsize::new(0));
        manager.set_corruption_listener(Box::new(RecordingCorruptionListener { notified: notified.clone() }));

        let result = manager.get_writable();
        assert!(result.is_err());
    }
}
