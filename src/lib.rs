#![forbid(unsafe_code)]
#![deny(missing_docs, nonstandard_style, unused_extern_crates)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! A persistent, size-bounded cache for HTTP responses: entry metadata
//! lives in an embedded SQL database, response bodies live as plain
//! files on disk.
//!
//! This crate implements the cache core only — deriving a cache key
//! from `(method, url)`, storing and retrieving response metadata and
//! bodies, and bounding total disk usage with LRU eviction. It does not
//! speak HTTP itself: no request execution, no `Cache-Control`
//! freshness evaluation, no conditional revalidation. Those concerns
//! sit in a layer above this one, the same way `http-cache`'s own
//! [`CacheManager`](https://docs.rs/http-cache) trait only persists
//! bytes and leaves RFC 7234 semantics to its caller.
//!
//! ## Layout
//!
//! - [`key`] — deterministic `(method, url)` fingerprints used as both
//!   the database primary key and the body filename stem.
//! - [`headers`] — an ordered, case-insensitive, duplicate-permitting
//!   header collection with a lossless-on-success JSON wire form.
//! - [`db`] — a small relational-store wrapper around `rusqlite`:
//!   typed cursors, a query builder, value bags, and scope guards.
//! - [`schema`] — version-tracked database lifecycle management
//!   (create/upgrade/downgrade hooks, corruption notification).
//! - [`repository`] — CRUD and LRU-ordered enumeration over the
//!   `cache_metadata` table.
//! - [`cache`] — the public façade: [`cache::HttpCache`].
//! - [`error`] — the crate's error taxonomy, [`error::CacheError`].
//!
//! ## Basic usage
//!
//! ```no_run
//! use http_cache_store::cache::{CacheConfig, HttpCache};
//! use http_cache_store::key::{Fingerprint, Method};
//! use http_cache_store::repository::Metadata;
//! use http_cache_store::headers::HeaderList;
//!
//! # fn main() -> http_cache_store::error::Result<()> {
//! let cache = HttpCache::open(CacheConfig::new("./http-cache-store"))?;
//! let fingerprint = Fingerprint::derive(Method::Get, "https://example.com/");
//!
//! let metadata = Metadata {
//!     cache_key: fingerprint.as_str().to_string(),
//!     url: "https://example.com/".to_string(),
//!     method: Method::Get,
//!     status_code: 200,
//!     status_message: "OK".to_string(),
//!     response_header: HeaderList::new(),
//!     response_body_size: 5,
//!     sent_request_at_epoch: 0,
//!     received_response_at_epoch: 0,
//!     created_at_epoch: 0,
//!     last_accessed_at_epoch: 0,
//! };
//! cache.put(&fingerprint, &metadata, b"hello")?;
//!
//! if let Some((_metadata, mut reader)) = cache.get(&fingerprint)? {
//!     use std::io::Read;
//!     let mut body = Vec::new();
//!     reader.read_to_end(&mut body)?;
//!     assert_eq!(body, b"hello");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod db;
pub mod error;
pub mod headers;
pub mod key;
pub mod repository;
pub mod schema;

#[doc(inline)]
pub use cache::{CacheConfig, HttpCache};
#[doc(inline)]
pub use error::{CacheError, Result};
#[doc(inline)]
pub use headers::HeaderList;
#[doc(inline)]
pub use key::{Fingerprint, Method};
#[doc(inline)]
pub use repository::{EnumerationEntry, Metadata, Repository};
