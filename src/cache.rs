//! The cache façade: ties the metadata repository to on-disk response
//! bodies and enforces the size bound with LRU eviction.
//!
//! Grounded in `easyhttpcpp::HttpCacheInternal` (see
//! `examples/original_source/tests/unittests/HttpCacheInternalUnitTest.cpp`,
//! the only surviving trace of that class after filtering) for the
//! `path`/`max_size`/lazily-created temp-directory shape, and in
//! `easyhttpcpp::common::CacheManager`/OkHttp's `DiskLruCache` for the
//! trim-to-size eviction loop driven by [`crate::repository::Repository::enumerate`].

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{CacheError, Result};
use crate::key::Fingerprint;
use crate::repository::{Metadata, Repository};
use crate::schema::CorruptionListener;

/// Default cache size bound, matching `easyhttpcpp`'s
/// `HttpCacheInternalUnitTest`'s `DefaultCacheMaxSize`.
pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

const CACHE_DIR: &str = "cache";
const DB_FILE_NAME: &str = "cache_metadata.db";
const TEMP_DIR: &str = "temp";

/// Filesystem operations the cache needs, abstracted so tests can run
/// against an in-memory double instead of touching disk.
pub trait Filesystem: Send + Sync {
    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    /// Remove `path` and everything under it. Not an error if absent.
    fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;
    /// Remove a single file. Not an error if absent.
    fn remove_file(&self, path: &Path) -> std::io::Result<()>;
    /// Atomically move `from` to `to` (same filesystem).
    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
    /// True if `path` exists.
    fn exists(&self, path: &Path) -> bool;
    /// Size in bytes of the file at `path`.
    fn file_size(&self, path: &Path) -> std::io::Result<u64>;
    /// Write `contents` to a new temp file under `dir` and return its
    /// path; used so `put` can stage a body before the atomic rename.
    fn write_temp(&self, dir: &Path, contents: &mut dyn Read) -> std::io::Result<PathBuf>;
    /// Open the file at `path` for reading, without loading it into memory.
    fn open_read(&self, path: &Path) -> std::io::Result<Box<dyn Read + Send>>;
}

/// The production [`Filesystem`], backed directly by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFilesystem;

impl Filesystem for StdFilesystem {
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        std::fs::rename(from, to)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> std::io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn write_temp(&self, dir: &Path, contents: &mut dyn Read) -> std::io::Result<PathBuf> {
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        std::io::copy(contents, &mut file)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }

    fn open_read(&self, path: &Path) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::fs::File::open(path)?))
    }
}

/// Deletes the whole cache directory when notified of corruption, the
/// Rust counterpart of the original's policy of discarding a cache
/// whose on-disk image can't be trusted anymore.
struct DeleteOnCorruption {
    cache_dir: PathBuf,
    filesystem: Box<dyn Filesystem>,
}

impl CorruptionListener for DeleteOnCorruption {
    fn on_corrupt(&self, path: &Path, cause: &CacheError) {
        log::warn!("cache database at {} is corrupt ({cause}), discarding cache", path.display());
        if let Err(e) = self.filesystem.remove_dir_all(&self.cache_dir) {
            log::warn!("failed to remove cache directory after corruption: {e}");
        }
    }
}

/// Configuration for opening a [`HttpCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory the cache owns. Created if absent.
    pub root: PathBuf,
    /// Maximum cumulative size, in bytes, of cached response bodies.
    pub max_size: u64,
}

impl CacheConfig {
    /// A config rooted at `root` with [`DEFAULT_MAX_SIZE`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheConfig { root: root.into(), max_size: DEFAULT_MAX_SIZE }
    }

    /// Override the size bound.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

/// A persistent, size-bounded HTTP response cache: metadata in SQLite,
/// bodies on disk.
pub struct HttpCache {
    root: PathBuf,
    max_size: u64,
    repository: Repository,
    filesystem: Box<dyn Filesystem>,
    /// Serializes `put`'s rename-then-metadata-write-then-evict sequence
    /// so two concurrent writers never interleave their eviction passes.
    put_lock: Mutex<()>,
}

impl HttpCache {
    /// Open (creating if absent) the cache described by `config`, using
    /// the real filesystem.
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_filesystem(config, Box::new(StdFilesystem))
    }

    /// Open the cache using a caller-supplied [`Filesystem`]
    /// implementation — the seam tests use to avoid touching disk.
    pub fn open_with_filesystem(config: CacheConfig, filesystem: Box<dyn Filesystem>) -> Result<Self> {
        let cache_dir = config.root.join(CACHE_DIR);
        filesystem.create_dir_all(&cache_dir)?;

        let repository = Repository::open(cache_dir.join(DB_FILE_NAME))?;

        let cache = HttpCache {
            root: config.root,
            max_size: config.max_size,
            repository,
            filesystem,
            put_lock: Mutex::new(()),
        };
        Ok(cache)
    }

    /// Install the default corruption policy: delete the whole cache
    /// directory. Called once after construction by callers that want
    /// the original's "discard on corruption" behaviour; kept opt-in so
    /// tests can observe a raw corruption error instead.
    pub fn install_default_corruption_policy(&self) {
        // filesystem access here only ever removes files, so a second,
        // un-aliased StdFilesystem is fine regardless of which
        // implementation the cache itself uses.
        self.repository.set_corruption_listener(Box::new(DeleteOnCorruption {
            cache_dir: self.cache_dir(),
            filesystem: Box::new(StdFilesystem),
        }));
    }

    /// The root directory this cache owns.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The configured maximum cumulative body size, in bytes.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// The directory used to stage bodies before an atomic rename into
    /// place, created lazily on first use.
    pub fn temp_directory(&self) -> Result<PathBuf> {
        let dir = self.cache_dir().join(TEMP_DIR);
        self.filesystem.create_dir_all(&dir)?;
        Ok(dir)
    }

    fn body_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.cache_dir().join(fingerprint.body_file_name())
    }

    /// Current cumulative size in bytes of every cached body, computed
    /// by summing [`Metadata::response_body_size`] across all rows.
    pub fn size(&self) -> Result<u64> {
        let mut total = 0u64;
        self.repository.enumerate(|entry| {
            total += entry.response_body_size;
            true
        })?;
        Ok(total)
    }

    /// Fetch an entry's metadata and an open reader over its body, if
    /// present. Bumps the entry's LRU recency on a hit.
    ///
    /// A body file that is absent, or shorter than
    /// [`Metadata::response_body_size`] (a truncated write, e.g. from a
    /// process killed mid-`put`), is treated as a miss and its dangling
    /// metadata row is removed rather than being returned as partial data.
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<(Metadata, Box<dyn Read + Send>)>> {
        let key = fingerprint.as_str();
        let Some(metadata) = self.repository.get_metadata(key)? else {
            return Ok(None);
        };
        let body_path = self.body_path(fingerprint);
        let body_intact = self.filesystem.exists(&body_path)
            && self.filesystem.file_size(&body_path)? >= metadata.response_body_size;
        if !body_intact {
            let _ = self.repository.delete_metadata(key);
            return Ok(None);
        }
        let reader = self.filesystem.open_read(&body_path)?;
        self.repository.update_last_accessed_sec(key)?;
        Ok(Some((metadata, reader)))
    }

    /// Store `body` under `fingerprint` with `metadata`, then evict the
    /// least-recently-used entries until the cache is back under
    /// [`HttpCache::max_size`].
    ///
    /// The body is written to a temp file and atomically renamed into
    /// place; if the metadata write then fails, the just-written body
    /// file is rolled back so a failed `put` never leaves an orphaned
    /// body on disk.
    pub fn put(&self, fingerprint: &Fingerprint, metadata: &Metadata, body: &[u8]) -> Result<()> {
        let key = fingerprint.as_str();
        let temp_dir = self.temp_directory()?;
        let mut reader = body;
        let temp_path = self.filesystem.write_temp(&temp_dir, &mut reader)?;
        let final_path = self.body_path(fingerprint);

        // Everything from here on is one critical section: the rename,
        // the metadata write, and the eviction pass all see a consistent
        // view of what's on disk, so two concurrent `put`s can't both
        // read a stale size and over-evict.
        let _guard = self.put_lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Err(e) = self.filesystem.rename(&temp_path, &final_path) {
            let _ = self.filesystem.remove_file(&temp_path);
            return Err(CacheError::Io(e));
        }

        match self.repository.update_metadata(key, metadata) {
            Ok(true) => {}
            Ok(false) => {
                let _ = self.filesystem.remove_file(&final_path);
                return Err(CacheError::illegal_state("failed to write cache metadata"));
            }
            Err(e) => {
                let _ = self.filesystem.remove_file(&final_path);
                return Err(e);
            }
        }

        self.evict_to_fit()?;
        Ok(())
    }

    /// Remove the entry for `fingerprint`, if present. Returns `true` if
    /// anything was removed.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let key = fingerprint.as_str();
        let removed_metadata = self.repository.delete_metadata(key)?;
        let body_path = self.body_path(fingerprint);
        let body_existed = self.filesystem.exists(&body_path);
        self.filesystem.remove_file(&body_path)?;
        Ok(removed_metadata || body_existed)
    }

    /// Discard everything: the whole `cache/` subtree, database and body
    /// files and the temp directory alike, then recreate it empty.
    /// `may_delete_if_busy` mirrors `CacheManager::purge`'s parameter —
    /// this implementation has no notion of "busy" entries (no in-flight
    /// streaming reads to protect), so it is accepted but otherwise
    /// unused.
    pub fn purge(&self, _may_delete_if_busy: bool) -> Result<()> {
        let _guard = self.put_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.repository.close()?;
        let cache_dir = self.cache_dir();
        self.filesystem.remove_dir_all(&cache_dir)?;
        self.filesystem.create_dir_all(&cache_dir)?;
        Ok(())
    }

    fn evict_to_fit(&self) -> Result<()> {
        let mut current_size = self.size()?;
        if current_size <= self.max_size {
            return Ok(());
        }

        let mut to_evict = Vec::new();
        self.repository.enumerate(|entry| {
            if current_size <= self.max_size {
                return false;
            }
            current_size = current_size.saturating_sub(entry.response_body_size);
            to_evict.push(entry.cache_key.clone());
            true
        })?;

        for key in to_evict {
            self.repository.delete_metadata(&key)?;
            let body_path = self.cache_dir().join(format!("{key}.data"));
            self.filesystem.remove_file(&body_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderList;
    use crate::key::Method;

    fn metadata_for(url: &str, body_len: u64) -> Metadata {
        Metadata {
            cache_key: String::new(),
            url: url.to_string(),
            method: Method::Get,
            status_code: 200,
            status_message: "OK".into(),
            response_header: HeaderList::new(),
            response_body_size: body_len,
            sent_request_at_epoch: 1,
            received_response_at_epoch: 2,
            created_at_epoch: 3,
            last_accessed_at_epoch: 0,
        }
    }

    fn open_cache(max_size: u64) -> (HttpCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path()).with_max_size(max_size);
        let cache = HttpCache::open(config).unwrap();
        (cache, dir)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (cache, _dir) = open_cache(DEFAULT_MAX_SIZE);
        let fp = Fingerprint::derive(Method::Get, "http://h/a");
        let metadata = metadata_for("http://h/a", 5);
        cache.put(&fp, &metadata, b"hello").unwrap();

        let (fetched, mut reader) = cache.get(&fp).unwrap().unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(fetched.url, "http://h/a");
    }

    #[test]
    fn truncated_body_file_is_treated_as_a_miss() {
        let (cache, dir) = open_cache(DEFAULT_MAX_SIZE);
        let fp = Fingerprint::derive(Method::Get, "http://h/a");
        let metadata = metadata_for("http://h/a", 5);
        cache.put(&fp, &metadata, b"hello").unwrap();

        let body_path = dir.path().join("cache").join(fp.body_file_name());
        std::fs::write(&body_path, b"he").unwrap();

        assert!(cache.get(&fp).unwrap().is_none());
    }

    #[test]
    fn get_missing_entry_returns_none() {
        let (cache, _dir) = open_cache(DEFAULT_MAX_SIZE);
        let fp = Fingerprint::derive(Method::Get, "http://h/missing");
        assert!(cache.get(&fp).unwrap().is_none());
    }

    #[test]
    fn remove_deletes_metadata_and_body() {
        let (cache, _dir) = open_cache(DEFAULT_MAX_SIZE);
        let fp = Fingerprint::derive(Method::Get, "http://h/a");
        let metadata = metadata_for("http://h/a", 5);
        cache.put(&fp, &metadata, b"hello").unwrap();

        assert!(cache.remove(&fp).unwrap());
        assert!(cache.get(&fp).unwrap().is_none());
    }

    #[test]
    fn lru_eviction_respects_max_size() {
        // 10 entries of 20 bytes each, max_size 100: only the 5
        // most-recently-written survive.
        let (cache, _dir) = open_cache(100);
        let mut fps = Vec::new();
        for i in 0..10 {
            let url = format!("http://h/{i}");
            let fp = Fingerprint::derive(Method::Get, &url);
            let metadata = metadata_for(&url, 20);
            cache.put(&fp, &metadata, &[0u8; 20]).unwrap();
            fps.push(fp);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert!(cache.size().unwrap() <= 100);
        for fp in &fps[..5] {
            assert!(cache.get(fp).unwrap().is_none());
        }
        for fp in &fps[5..] {
            assert!(cache.get(fp).unwrap().is_some());
        }
    }

    #[test]
    fn touching_an_entry_protects_it_from_eviction() {
        let (cache, _dir) = open_cache(100);
        let mut fps = Vec::new();
        for i in 0..7 {
            let url = format!("http://h/{i}");
            let fp = Fingerprint::derive(Method::Get, &url);
            let metadata = metadata_for(&url, 20);
            cache.put(&fp, &metadata, &[0u8; 20]).unwrap();
            fps.push(fp);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        // touch the oldest entry so it becomes the most recently used
        cache.get(&fps[0]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1));

        let fp = Fingerprint::derive(Method::Get, "http://h/new");
        let metadata = metadata_for("http://h/new", 20);
        cache.put(&fp, &metadata, &[0u8; 20]).unwrap();

        // fps[0] was touched, so fps[1] (next oldest) should be evicted instead.
        assert!(cache.get(&fps[0]).unwrap().is_some());
    }

    #[test]
    fn purge_removes_everything() {
        let (cache, _dir) = open_cache(DEFAULT_MAX_SIZE);
        let fp = Fingerprint::derive(Method::Get, "http://h/a");
        let metadata = metadata_for("http://h/a", 5);
        cache.put(&fp, &metadata, b"hello").unwrap();

        cache.purge(false).unwrap();
        assert!(cache.get(&fp).unwrap().is_none());
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn temp_directory_is_created_lazily() {
        let (cache, dir) = open_cache(DEFAULT_MAX_SIZE);
        assert!(!dir.path().join(CACHE_DIR).join(TEMP_DIR).exists());
        let temp = cache.temp_directory().unwrap();
        assert!(temp.exists());
    }
}
