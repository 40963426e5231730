//! The crate's error taxonomy: one `thiserror`-derived enum covering
//! every fallible operation, with `miette::Diagnostic` codes for
//! downstream reporting.

use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// The error taxonomy for the cache core.
///
/// Boolean-returning repository methods (`get`/`delete`/`update`/
/// `update_last_accessed`) swallow every variant except
/// [`CacheError::DatabaseCorrupt`], which always propagates so a
/// [`crate::schema::CorruptionListener`] gets a chance to react.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// Bad input at an API boundary: an empty URL, a schema version of 0,
    /// a `HAVING` clause without `GROUP BY`, a malformed `LIMIT`, or an
    /// unknown column name.
    #[error("{0}")]
    #[diagnostic(code(http_cache_store::illegal_argument))]
    IllegalArgument(String),

    /// An operation was attempted on a closed cursor or database, or a
    /// transaction/initialization was entered recursively.
    #[error("{0}")]
    #[diagnostic(code(http_cache_store::illegal_state))]
    IllegalState(String),

    /// A generic SQL engine error: constraint violation, syntax error,
    /// or anything else that isn't image corruption.
    #[error("sql execution failed: {0}")]
    #[diagnostic(code(http_cache_store::sql_execution))]
    SqlExecution(#[source] rusqlite::Error),

    /// The SQL engine reported that its on-disk image cannot be parsed.
    /// Delivered to the installed [`crate::schema::CorruptionListener`]
    /// in addition to being returned to the caller.
    #[error("database at {path} is corrupt: {source}")]
    #[diagnostic(code(http_cache_store::database_corrupt))]
    DatabaseCorrupt {
        /// Path to the corrupt database file.
        path: std::path::PathBuf,
        /// The underlying engine error.
        #[source]
        source: rusqlite::Error,
    },

    /// A body file could not be written, renamed, or removed. Never
    /// propagated from `put`/`remove`; those return `false` instead. Kept
    /// as a typed variant so internal helpers can use `?`.
    #[error("io error: {0}")]
    #[diagnostic(code(http_cache_store::io))]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn illegal_argument(msg: impl Into<String>) -> Self {
        CacheError::IllegalArgument(msg.into())
    }

    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        CacheError::IllegalState(msg.into())
    }

    /// Classify a raw `rusqlite` error the way `easyhttpcpp`'s
    /// `checkForDatabaseCorruption` does: inspect the underlying cause and
    /// raise a typed corruption error if it matches, otherwise a generic
    /// SQL execution error.
    pub(crate) fn from_sql(err: rusqlite::Error, db_path: &std::path::Path) -> Self {
        if is_corrupt_image(&err) {
            CacheError::DatabaseCorrupt { path: db_path.to_path_buf(), source: err }
        } else {
            CacheError::SqlExecution(err)
        }
    }

    /// True for the variant that must propagate out of a boolean-returning
    /// repository method instead of being swallowed.
    pub(crate) fn is_corruption(&self) -> bool {
        matches!(self, CacheError::DatabaseCorrupt { .. })
    }
}

fn is_corrupt_image(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(ffi_err, _) => matches!(
            ffi_err.code,
            rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
        ),
        _ => false,
    }
}
