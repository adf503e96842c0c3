//! Two-tier symbol cache.
//!
//! The memory tier is a concurrent map of type-erased values with a TTL and
//! an optional version tag. Whole [`SymbolCollectionResult`] snapshots are
//! additionally written through to a durable directory store so they survive
//! restarts. Disk problems are logged and the cache keeps working from
//! memory alone.

mod disk;
mod entry;
mod stats;

pub use stats::CacheStats;

use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::symbol::SymbolCollectionResult;
use disk::{DiskRecord, DiskStore};
use entry::CacheEntry;
use stats::Counters;

/// Key namespace for whole collection snapshots.
const SYMBOL_RESULT_PREFIX: &str = "symbols:";

/// Errors from the durable tier.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory-tier entry bound.
    pub max_entries: usize,
    /// Fraction of `max_entries` evicted when the bound is hit.
    pub eviction_ratio: f64,
    /// TTL used when a caller passes none.
    pub default_ttl: Duration,
    /// How often expired memory entries are purged.
    pub cleanup_interval: Duration,
    /// Durable tier directory; `None` keeps the cache memory-only.
    pub disk_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            eviction_ratio: 0.2,
            default_ttl: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(60),
            disk_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_disk_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = Some(dir.into());
        self
    }

    /// Entries to drop so that one more insertion fits.
    fn eviction_batch(&self, current_len: usize) -> usize {
        let by_ratio = (self.max_entries as f64 * self.eviction_ratio).ceil() as usize;
        let to_fit = (current_len + 1).saturating_sub(self.max_entries);
        by_ratio.max(to_fit).max(1)
    }
}

enum Lookup {
    Hit(Arc<dyn Any + Send + Sync>),
    Miss,
}

struct CacheInner {
    config: CacheConfig,
    memory: DashMap<String, CacheEntry>,
    disk: RwLock<Option<DiskStore>>,
    counters: Counters,
    sequence: AtomicU64,
    /// Serialises evict-then-insert so the size bound holds under contention.
    insert_lock: Mutex<()>,
}

impl CacheInner {
    fn lookup(&self, key: &str, version: Option<&str>) -> Lookup {
        let now = Instant::now();
        let Some(entry) = self.memory.get(key) else {
            return Lookup::Miss;
        };
        if entry.is_expired_at(now) {
            drop(entry);
            if self
                .memory
                .remove_if(key, |_, e| e.is_expired_at(now))
                .is_some()
            {
                self.counters.expired(1);
            }
            return Lookup::Miss;
        }
        if !entry.matches_version(version) {
            return Lookup::Miss;
        }
        Lookup::Hit(Arc::clone(&entry.value))
    }

    fn store(&self, key: &str, value: Arc<dyn Any + Send + Sync>, ttl: Duration, version: Option<&str>) {
        if self.config.max_entries == 0 {
            return;
        }
        let _guard = self.insert_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.memory.contains_key(key) && self.memory.len() >= self.config.max_entries {
            self.evict(self.config.eviction_batch(self.memory.len()));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.memory
            .insert(key.to_string(), CacheEntry::new(value, ttl, version, sequence));
    }

    /// Drop the `count` oldest entries by insertion order.
    fn evict(&self, count: usize) {
        let mut order: Vec<(u64, String)> = self
            .memory
            .iter()
            .map(|e| (e.value().sequence, e.key().clone()))
            .collect();
        order.sort_unstable();
        let mut evicted = 0;
        for (_, key) in order.into_iter().take(count) {
            if self.memory.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.counters.evicted(evicted);
        debug!("Evicted {} cache entries", evicted);
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.memory.len();
        self.memory.retain(|_, entry| !entry.is_expired_at(now));
        let purged = before.saturating_sub(self.memory.len());
        if purged > 0 {
            self.counters.expired(purged);
            debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    fn with_disk<R>(&self, op: impl FnOnce(&DiskStore) -> Result<R, CacheError>) -> Option<R> {
        let guard = self.disk.read().unwrap_or_else(PoisonError::into_inner);
        let store = guard.as_ref()?;
        match op(store) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Disk cache unavailable, continuing from memory: {}", e);
                None
            }
        }
    }
}

/// Two-tier cache with TTL, version tags and size-bounded eviction.
pub struct SymbolCache {
    inner: Arc<CacheInner>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl SymbolCache {
    /// Create a cache. A disk directory that cannot be opened leaves the
    /// cache memory-only.
    pub fn new(config: CacheConfig) -> Self {
        let disk = match &config.disk_dir {
            Some(dir) => match DiskStore::open(dir) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!("Disk cache disabled: {}", e);
                    None
                }
            },
            None => None,
        };
        Self::with_store(config, disk)
    }

    /// Create a cache, failing if the configured disk directory cannot be
    /// opened.
    pub fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let disk = match &config.disk_dir {
            Some(dir) => Some(DiskStore::open(dir)?),
            None => None,
        };
        Ok(Self::with_store(config, disk))
    }

    fn with_store(config: CacheConfig, disk: Option<DiskStore>) -> Self {
        let interval = config.cleanup_interval;
        let inner = Arc::new(CacheInner {
            config,
            memory: DashMap::new(),
            disk: RwLock::new(disk),
            counters: Counters::default(),
            sequence: AtomicU64::new(0),
            insert_lock: Mutex::new(()),
        });
        if let Some(store) = inner.disk.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            info!("Disk cache enabled at {:?}", store.dir());
        }
        let cleanup = spawn_cleanup(Arc::downgrade(&inner), interval);
        Self {
            inner,
            cleanup: Mutex::new(cleanup),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// A stored value of a different type than `T` counts as a miss and is
    /// replaced.
    pub fn get_or_compute<T, F>(&self, key: &str, loader: F, ttl: Option<Duration>, version: Option<&str>) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get::<T>(key, version) {
            return value;
        }
        let value = loader();
        self.insert(key, value.clone(), ttl, version);
        value
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for fallible loaders. A
    /// failed load stores nothing.
    pub fn get_or_try_compute<T, E, F>(
        &self,
        key: &str,
        loader: F,
        ttl: Option<Duration>,
        version: Option<&str>,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get::<T>(key, version) {
            return Ok(value);
        }
        let value = loader()?;
        self.insert(key, value.clone(), ttl, version);
        Ok(value)
    }

    /// Memory-tier lookup, recording a hit or miss.
    pub fn get<T>(&self, key: &str, version: Option<&str>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let found = match self.inner.lookup(key, version) {
            Lookup::Hit(value) => value.downcast_ref::<T>().cloned(),
            Lookup::Miss => None,
        };
        match found {
            Some(_) => self.inner.counters.hit(),
            None => self.inner.counters.miss(),
        }
        found
    }

    /// Store a value in the memory tier.
    pub fn insert<T>(&self, key: &str, value: T, ttl: Option<Duration>, version: Option<&str>)
    where
        T: Send + Sync + 'static,
    {
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        self.inner.store(key, Arc::new(value), ttl, version);
    }

    /// Remove `key` from both tiers.
    pub fn invalidate(&self, key: &str) {
        self.inner.memory.remove(key);
        self.inner.with_disk(|store| store.remove(key));
    }

    /// Cache a collection snapshot in both tiers.
    pub fn cache_symbol_result(&self, solution_id: &str, result: &SymbolCollectionResult, version: Option<&str>) {
        let key = symbol_result_key(solution_id);
        let ttl = self.inner.config.default_ttl;
        self.inner.store(&key, Arc::new(result.clone()), ttl, version);

        self.inner.with_disk(|store| {
            let value = serde_json::to_value(result)?;
            store.write(&DiskRecord::new(&key, value, ttl, version))
        });
        debug!(
            "Cached symbol result for {} ({} symbols, version {:?})",
            solution_id,
            result.total_symbols(),
            version
        );
    }

    /// Look up a collection snapshot, checking memory then disk. Disk hits
    /// are promoted into memory with their remaining TTL.
    pub fn get_symbol_result(&self, solution_id: &str, version: Option<&str>) -> Option<Arc<SymbolCollectionResult>> {
        let key = symbol_result_key(solution_id);

        if let Lookup::Hit(value) = self.inner.lookup(&key, version) {
            if let Ok(result) = value.downcast::<SymbolCollectionResult>() {
                self.inner.counters.hit();
                return Some(result);
            }
        }

        let record = self.inner.with_disk(|store| store.read(&key)).flatten();
        let promoted = match record {
            Some(record) if record.is_expired() => {
                self.inner.with_disk(|store| store.remove(&key));
                None
            }
            Some(record) if record.matches_version(version) => {
                match serde_json::from_value::<SymbolCollectionResult>(record.value.clone()) {
                    Ok(result) => {
                        let result = Arc::new(result);
                        let value: Arc<dyn Any + Send + Sync> = result.clone();
                        self.inner
                            .store(&key, value, record.remaining_ttl(), record.version.as_deref());
                        debug!("Promoted disk cache entry for {}", solution_id);
                        Some(result)
                    }
                    Err(e) => {
                        warn!("Discarding undecodable disk cache entry for {}: {}", solution_id, e);
                        None
                    }
                }
            }
            _ => None,
        };

        match promoted {
            Some(_) => self.inner.counters.hit(),
            None => self.inner.counters.miss(),
        }
        promoted
    }

    /// Drop expired memory entries now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Empty both tiers.
    pub fn clear(&self) {
        self.inner.memory.clear();
        if let Some(removed) = self.inner.with_disk(DiskStore::clear) {
            debug!("Removed {} disk cache records", removed);
        }
    }

    /// Stop the cleanup task and release the disk tier.
    pub fn close(&self) {
        if let Some(handle) = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.inner
            .disk
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Cache closed: {:?}", self.stats());
    }

    pub fn len(&self) -> usize {
        self.inner.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.memory.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let disk_enabled = self
            .inner
            .disk
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        self.inner.counters.snapshot(self.inner.memory.len(), disk_enabled)
    }
}

impl Drop for SymbolCache {
    fn drop(&mut self) {
        if let Some(handle) = self
            .cleanup
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SymbolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn symbol_result_key(solution_id: &str) -> String {
    format!("{SYMBOL_RESULT_PREFIX}{solution_id}")
}

/// Periodically purge expired entries while the cache is alive. Needs a
/// tokio runtime; without one the cache only expires entries lazily.
fn spawn_cleanup(inner: Weak<CacheInner>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    let handle = tokio::runtime::Handle::try_current().ok()?;
    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.purge_expired();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{Symbol, SymbolKind};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tempfile::tempdir;

    fn sample_result() -> SymbolCollectionResult {
        let mut projects = BTreeMap::new();
        projects.insert(
            "App".to_string(),
            vec![Symbol::new("Program", SymbolKind::Class, "Program.cs", "App").with_fqn("App.Program")],
        );
        SymbolCollectionResult::new(projects, Vec::new())
    }

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.eviction_ratio, 0.2);
        assert!(config.disk_dir.is_none());
    }

    #[test]
    fn test_get_or_compute_hits_after_first_load() {
        let cache = SymbolCache::new(CacheConfig::default());
        let calls = AtomicUsize::new(0);
        let load = || {
            calls.fetch_add(1, Ordering::SeqCst);
            vec![1, 2, 3]
        };

        assert_eq!(cache.get_or_compute("k", load, None, None), vec![1, 2, 3]);
        assert_eq!(cache.get_or_compute("k", load, None, None), vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_expiry_counts_expiration() {
        let cache = SymbolCache::new(CacheConfig::default());
        cache.insert("k", 7u32, Some(Duration::from_millis(50)), None);
        assert_eq!(cache.get::<u32>("k", None), Some(7));

        thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get::<u32>("k", None), None);

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_version_mismatch_misses() {
        let cache = SymbolCache::new(CacheConfig::default());
        let v1 = cache.get_or_compute("k", || "one".to_string(), None, Some("v1"));
        let v2 = cache.get_or_compute("k", || "two".to_string(), None, Some("v2"));
        assert_eq!(v1, "one");
        assert_eq!(v2, "two");
        assert_eq!(cache.get::<String>("k", None), Some("two".to_string()));
    }

    #[test]
    fn test_type_mismatch_is_miss() {
        let cache = SymbolCache::new(CacheConfig::default());
        cache.insert("k", 1u64, None, None);
        assert_eq!(cache.get::<String>("k", None), None);
        assert_eq!(cache.get_or_compute("k", || "s".to_string(), None, None), "s");
    }

    #[test]
    fn test_try_compute_failure_stores_nothing() {
        let cache = SymbolCache::new(CacheConfig::default());
        let failed: Result<u32, &str> = cache.get_or_try_compute("k", || Err("boom"), None, None);
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_size_bound_and_insertion_order_eviction() {
        let cache = SymbolCache::new(CacheConfig::default().with_max_entries(10));
        for i in 0..25 {
            cache.insert(&format!("k{i}"), i, None, None);
            assert!(cache.len() <= 10);
        }
        // The newest entry always survives, the oldest never does.
        assert_eq!(cache.get::<i32>("k24", None), Some(24));
        assert_eq!(cache.get::<i32>("k0", None), None);
        assert!(cache.stats().evictions >= 15);
    }

    #[test]
    fn test_size_bound_under_concurrency() {
        let cache = Arc::new(SymbolCache::new(CacheConfig::default().with_max_entries(50)));
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        cache.insert(&format!("{t}-{i}"), i, None, None);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(cache.len() <= 50);
    }

    #[test]
    fn test_symbol_result_version_mismatch() {
        let cache = SymbolCache::new(CacheConfig::default());
        cache.cache_symbol_result("sol1", &sample_result(), Some("v1"));

        assert!(cache.get_symbol_result("sol1", Some("v2")).is_none());
        let hit = cache.get_symbol_result("sol1", Some("v1")).unwrap();
        assert_eq!(hit.total_symbols(), 1);
        assert!(cache.get_symbol_result("sol1", None).is_some());
    }

    #[test]
    fn test_disk_tier_survives_new_instance() {
        let dir = tempdir().unwrap();
        let config = CacheConfig::default().with_disk_dir(dir.path().join("cache"));

        let first = SymbolCache::open(config.clone()).unwrap();
        first.cache_symbol_result("sol1", &sample_result(), Some("v1"));
        first.close();

        let second = SymbolCache::open(config).unwrap();
        assert!(second.is_empty());
        let loaded = second.get_symbol_result("sol1", Some("v1")).unwrap();
        assert_eq!(*loaded, sample_result());
        // Promoted into memory.
        assert_eq!(second.len(), 1);
        assert!(second.stats().disk_enabled);
        assert_eq!(second.stats().hits, 1);
    }

    #[test]
    fn test_unusable_disk_dir_degrades_to_memory() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let config = CacheConfig::default().with_disk_dir(blocker.join("cache"));

        assert!(SymbolCache::open(config.clone()).is_err());
        let cache = SymbolCache::new(config);
        assert!(!cache.stats().disk_enabled);
        cache.cache_symbol_result("sol1", &sample_result(), None);
        assert!(cache.get_symbol_result("sol1", None).is_some());
    }

    #[test]
    fn test_clear_empties_both_tiers() {
        let dir = tempdir().unwrap();
        let cache = SymbolCache::new(CacheConfig::default().with_disk_dir(dir.path()));
        cache.cache_symbol_result("sol1", &sample_result(), None);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get_symbol_result("sol1", None).is_none());
    }

    #[tokio::test]
    async fn test_background_cleanup_purges_expired() {
        let config = CacheConfig {
            cleanup_interval: Duration::from_millis(20),
            ..CacheConfig::default()
        };
        let cache = SymbolCache::new(config);
        cache.insert("k", 1u8, Some(Duration::from_millis(10)), None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
        cache.close();
    }
}
