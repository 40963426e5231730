//! The relational store wrapper layer: a thin, safe-by-construction
//! veneer over SQLite that the rest of the crate builds on, grounded
//! in `easyhttpcpp::db` (see
//! `examples/original_source/include/easyhttpcpp/db/` and
//! `src/db/`).

pub mod connection;
pub mod cursor;
pub mod guards;
pub mod query;
pub mod values;

pub use connection::{AutoVacuum, Database};
pub use cursor::{Cursor, FieldType};
pub use guards::{ScopedCursor, ScopedDatabase, ScopedTransaction};
pub use query::{ConflictAlgorithm, SelectSpec};
pub use values::ValueBag;
