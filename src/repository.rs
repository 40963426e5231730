//! Metadata repository: CRUD plus LRU-ordered enumeration over the
//! `cache_metadata` table.
//!
//! Grounded in `easyhttpcpp::HttpCacheDatabase` (see
//! `examples/original_source/src/HttpCacheDatabase.cpp` and its
//! `include/HttpCacheDatabase.h`), adapted to swallow non-corruption SQL
//! errors as `false`/`None` while propagating corruption, matching the
//! original's `catch (const SqlException&)` blocks that return `false`
//! except where the error classifies as corrupt.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::types::Value as SqlValue;

use crate::db::query::SelectSpec;
use crate::db::values::ValueBag;
use crate::error::{CacheError, Result};
use crate::headers::HeaderList;
use crate::key::Method;
use crate::schema::{CacheSchema, SchemaManager, CACHE_SCHEMA_VERSION};

const TABLE: &str = "cache_metadata";

/// One row of the `cache_metadata` table, fully materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Primary key; equal to the entry's [`crate::key::Fingerprint`] text.
    pub cache_key: String,
    /// The request URL.
    pub url: String,
    /// The request method.
    pub method: Method,
    /// HTTP status code of the cached response.
    pub status_code: i64,
    /// HTTP status message (reason phrase).
    pub status_message: String,
    /// Cached response headers.
    pub response_header: HeaderList,
    /// Size in bytes of the cached body file.
    pub response_body_size: u64,
    /// Epoch seconds the request was sent.
    pub sent_request_at_epoch: u64,
    /// Epoch seconds the response was received.
    pub received_response_at_epoch: u64,
    /// Epoch seconds this row was first created.
    pub created_at_epoch: u64,
    /// Epoch seconds this row was last read or written. Maintained by
    /// the repository, not by callers.
    pub last_accessed_at_epoch: u64,
}

/// One row from [`Repository::enumerate`]'s projection: just enough to
/// drive LRU eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationEntry {
    /// The row's cache key.
    pub cache_key: String,
    /// The row's cached body size in bytes.
    pub response_body_size: u64,
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Owns the `cache_metadata` table's lifecycle and CRUD operations.
///
/// A single coarse mutex serializes every public method, matching the
/// original's one `Poco::FastMutex` per `HttpCacheDatabase` instance.
/// [`Repository::enumerate`] does not take the lock itself — that is
/// left to the caller, since a listener may legitimately want to call
/// [`Repository::delete_metadata`] from inside its callback; this
/// implementation still snapshots every row before invoking the
/// listener, so later deletions never invalidate an in-flight cursor.
pub struct Repository {
    schema: SchemaManager<CacheSchema>,
    lock: Mutex<()>,
}

impl Repository {
    /// Open (creating if absent) the metadata database at `path`.
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        let schema = SchemaManager::new(path, CACHE_SCHEMA_VERSION, CacheSchema)?;
        Ok(Repository { schema, lock: Mutex::new(()) })
    }

    /// Install a listener notified when the underlying database is
    /// found corrupt.
    pub fn set_corruption_listener(&self, listener: Box<dyn crate::schema::CorruptionListener>) {
        self.schema.set_corruption_listener(listener);
    }

    /// Close the underlying database handle. The next call to any CRUD
    /// method reopens it, recreating the schema if the file is gone.
    pub fn close(&self) -> Result<()> {
        self.schema.close()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fetch the row for `key`, or `None` if absent or on any
    /// non-corruption SQL error.
    pub fn get_metadata(&self, key: &str) -> Result<Option<Metadata>> {
        let _guard = self.guard();
        match self.get_metadata_inner(key) {
            Ok(v) => Ok(v),
            Err(e) if e.is_corruption() => Err(e),
            Err(_) => Ok(None),
        }
    }

    fn get_metadata_inner(&self, key: &str) -> Result<Option<Metadata>> {
        let db = self.schema.get_readable()?;
        let spec = SelectSpec {
            table: TABLE,
            where_clause: Some("cache_key = ?1"),
            ..Default::default()
        };
        let mut cursor = db.query(&spec, &[SqlValue::Text(key.to_string())])?;
        if !cursor.move_to_first()? {
            return Ok(None);
        }
        Ok(Some(row_to_metadata(&cursor, key)?))
    }

    /// Delete the row for `key`. Returns `true` if a row was removed,
    /// `false` if it was absent or any non-corruption error occurred.
    pub fn delete_metadata(&self, key: &str) -> Result<bool> {
        let _guard = self.guard();
        match self.delete_metadata_inner(key) {
            Ok(v) => Ok(v),
            Err(e) if e.is_corruption() => Err(e),
            Err(_) => Ok(false),
        }
    }

    fn delete_metadata_inner(&self, key: &str) -> Result<bool> {
        let db = self.schema.get_writable()?;
        let mut txn = crate::db::guards::ScopedTransaction::begin(&db)?;
        let deleted = db.delete(TABLE, Some("cache_key = ?1"), &[SqlValue::Text(key.to_string())])? > 0;
        txn.set_successful();
        Ok(deleted)
    }

    /// Insert or replace the row for `key`. `last_accessed_at_epoch` is
    /// always stamped with the current wall-clock time, overriding
    /// whatever is set on `metadata`. Returns `true` on success, `false`
    /// on any non-corruption error.
    pub fn update_metadata(&self, key: &str, metadata: &Metadata) -> Result<bool> {
        let _guard = self.guard();
        match self.update_metadata_inner(key, metadata) {
            Ok(v) => Ok(v),
            Err(e) if e.is_corruption() => Err(e),
            Err(_) => Ok(false),
        }
    }

    fn update_metadata_inner(&self, key: &str, metadata: &Metadata) -> Result<bool> {
        let db = self.schema.get_writable()?;
        let mut txn = crate::db::guards::ScopedTransaction::begin(&db)?;

        let mut values = ValueBag::new();
        values.put("cache_key", key.to_string());
        values.put("url", metadata.url.clone());
        values.put("method", metadata.method.code());
        values.put("status_code", metadata.status_code);
        values.put("status_message", metadata.status_message.clone());
        values.put("response_header_json", metadata.response_header.to_json());
        values.put("response_body_size", metadata.response_body_size as i64);
        values.put("sent_request_at_epoch", metadata.sent_request_at_epoch as i64);
        values.put("received_response_at_epoch", metadata.received_response_at_epoch as i64);
        values.put("created_at_epoch", metadata.created_at_epoch as i64);
        values.put("last_accessed_at_epoch", now_epoch_secs() as i64);

        let inserted_at = db.replace(TABLE, &values)?;
        let success = inserted_at > 0;
        if success {
            txn.set_successful();
        }
        Ok(success)
    }

    /// Stamp `key`'s `last_accessed_at_epoch` with the current time.
    /// Returns `true` if a row was updated.
    pub fn update_last_accessed_sec(&self, key: &str) -> Result<bool> {
        let _guard = self.guard();
        match self.update_last_accessed_sec_inner(key) {
            Ok(v) => Ok(v),
            Err(e) if e.is_corruption() => Err(e),
            Err(_) => Ok(false),
        }
    }

    fn update_last_accessed_sec_inner(&self, key: &str) -> Result<bool> {
        let db = self.schema.get_writable()?;
        let mut txn = crate::db::guards::ScopedTransaction::begin(&db)?;
        let mut values = ValueBag::new();
        values.put("last_accessed_at_epoch", now_epoch_secs() as i64);
        let updated = db.update(TABLE, &values, Some("cache_key = ?1"), &[SqlValue::Text(key.to_string())])? > 0;
        txn.set_successful();
        Ok(updated)
    }

    /// Walk every row, ordered oldest-`last_accessed_at_epoch`-first,
    /// calling `listener` with each entry. All rows are snapshotted
    /// before the first listener call, so the listener may freely
    /// delete rows (e.g. to evict) without disturbing the walk.
    ///
    /// `listener` returns `false` to stop early. The overall call
    /// returns `false` if the listener ever did, or if a non-corruption
    /// SQL error occurred; corruption propagates.
    pub fn enumerate(&self, mut listener: impl FnMut(&EnumerationEntry) -> bool) -> Result<bool> {
        match self.enumerate_inner(&mut listener) {
            Ok(v) => Ok(v),
            Err(e) if e.is_corruption() => Err(e),
            Err(_) => Ok(false),
        }
    }

    fn enumerate_inner(&self, listener: &mut dyn FnMut(&EnumerationEntry) -> bool) -> Result<bool> {
        let entries = {
            let db = self.schema.get_readable()?;
            let spec = SelectSpec {
                table: TABLE,
                columns: &["cache_key", "response_body_size"],
                order_by: Some("last_accessed_at_epoch ASC"),
                ..Default::default()
            };
            let mut cursor = db.query(&spec, &[])?;
            let mut entries = Vec::with_capacity(cursor.count());
            if cursor.move_to_first()? {
                loop {
                    entries.push(EnumerationEntry {
                        cache_key: cursor.get_string(0)?,
                        response_body_size: cursor.get_unsigned_long_long(1)?,
                    });
                    if !cursor.move_to_next()? {
                        break;
                    }
                }
            }
            entries
        };

        for entry in &entries {
            if !listener(entry) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Test-only whole-row accessor retained from the original's
    /// `getMetadataAll`, not part of the public CRUD surface because the
    /// cache façade never needs `last_accessed_at_epoch` directly.
    #[cfg(test)]
    pub(crate) fn get_metadata_all(&self, key: &str) -> Result<Option<Metadata>> {
        let db = self.schema.get_readable()?;
        let spec = SelectSpec {
            table: TABLE,
            where_clause: Some("cache_key = ?1"),
            ..Default::default()
        };
        let mut cursor = db.query(&spec, &[SqlValue::Text(key.to_string())])?;
        if !cursor.move_to_first()? {
            return Ok(None);
        }
        Ok(Some(row_to_metadata(&cursor, key)?))
    }
}

fn row_to_metadata(cursor: &crate::db::cursor::Cursor, key: &str) -> Result<Metadata> {
    let col = |name: &str| cursor.column_index(name);
    Ok(Metadata {
        cache_key: key.to_string(),
        url: cursor.get_string(col("url")?)?,
        method: Method::try_from(cursor.get_long_long(col("method")?)?)?,
        status_code: cursor.get_long_long(col("status_code")?)?,
        status_message: cursor.get_string(col("status_message")?)?,
        response_header: HeaderList::from_json(&cursor.get_string(col("response_header_json")?)?),
        response_body_size: cursor.get_unsigned_long_long(col("response_body_size")?)?,
        sent_request_at_epoch: cursor.get_unsigned_long_long(col("sent_request_at_epoch")?)?,
        received_response_at_epoch: cursor.get_unsigned_long_long(col("received_response_at_epoch")?)?,
        created_at_epoch: cursor.get_unsigned_long_long(col("created_at_epoch")?)?,
        last_accessed_at_epoch: cursor.get_unsigned_long_long(col("last_accessed_at_epoch")?)?,
    })
}
