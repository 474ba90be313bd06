//! Two-tier cache for dataset slices and computed results
//!
//! A bounded in-memory LRU sits in front of a content-addressed disk
//! tier. Concurrent misses for the same key coalesce through a sharded
//! singleflight lock map, so a factory runs at most once per key per
//! effective value. Disk failures degrade to a miss and never propagate
//! into pricing results.
//!
//! # Examples
//!
//! ```no_run
//! use cms_pricer::cache::{CacheConfig, CacheManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheManager::new(CacheConfig::default());
//!
//! let value: i64 = cache
//!     .get_or_compute("mpfs:2025:05:99213", None, || async {
//!         Ok::<_, std::io::Error>(42)
//!     })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const FLIGHT_SHARDS: usize = 16;

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries in the memory tier
    pub max_items: usize,

    /// Approximate byte cap for the memory tier (serialized sizes)
    pub max_bytes: usize,

    /// TTL applied when callers don't specify one
    pub default_ttl: Duration,

    /// Root of the disk tier
    pub disk_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 512,
            max_bytes: 1 << 30,
            default_ttl: Duration::from_secs(3600),
            disk_dir: PathBuf::from("./data/cache"),
        }
    }
}

/// Cache observability counters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_items: usize,
    pub memory_bytes: usize,
    pub memory_max_items: usize,
    pub memory_max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub disk_dir: String,
}

struct MemoryEntry {
    bytes: Arc<Vec<u8>>,
    expires_at: DateTime<Utc>,
    last_access: u64,
}

/// Memory tier: LRU by last access, bounded by entries and bytes.
struct LruCache {
    entries: HashMap<String, MemoryEntry>,
    current_bytes: usize,
    access_counter: u64,
    max_items: usize,
    max_bytes: usize,
}

impl LruCache {
    fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            current_bytes: 0,
            access_counter: 0,
            max_items,
            max_bytes,
        }
    }

    fn get(&mut self, key: &str) -> Option<Arc<Vec<u8>>> {
        // Expired entries are removed on read
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at <= Utc::now() {
                self.remove(key);
                return None;
            }
        }
        self.access_counter += 1;
        let counter = self.access_counter;
        self.entries.get_mut(key).map(|entry| {
            entry.last_access = counter;
            Arc::clone(&entry.bytes)
        })
    }

    fn put(&mut self, key: String, bytes: Arc<Vec<u8>>, expires_at: DateTime<Utc>) {
        self.remove(&key);
        let size = bytes.len();

        // Evict oldest-accessed entries until both caps hold
        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.max_items
                || self.current_bytes + size > self.max_bytes)
        {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => self.remove(&k),
                None => break,
            }
        }

        self.access_counter += 1;
        self.current_bytes += size;
        self.entries.insert(
            key,
            MemoryEntry {
                bytes,
                expires_at,
                last_access: self.access_counter,
            },
        );
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.current_bytes -= entry.bytes.len();
        }
    }

    fn cleanup_expired(&mut self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
    }
}

/// On-disk entry envelope.
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    value: serde_json::Value,
    digest: Option<String>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

/// Disk tier: content-addressed files under a two-hex prefix directory.
///
/// The tier does not evict; the filesystem or an external process owns
/// that.
struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        self.dir.join(&hex[..2]).join(format!("{}.bin", hex))
    }

    async fn get(&self, key: &str, expected_digest: Option<&str>) -> Option<serde_json::Value> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return None,
        };

        let entry: DiskEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key = key, error = %err, "failed to decode disk cache entry");
                return None;
            }
        };

        // A digest mismatch invalidates the entry silently
        if let Some(expected) = expected_digest {
            if entry.digest.as_deref() != Some(expected) {
                warn!(
                    key = key,
                    expected = expected,
                    actual = ?entry.digest,
                    "disk cache digest mismatch"
                );
                return None;
            }
        }

        if entry.expires_at <= Utc::now() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }

        Some(entry.value)
    }

    async fn put(&self, key: &str, value: serde_json::Value, digest: Option<&str>, ttl: Duration) {
        let path = self.path_for(key);
        let entry = DiskEntry {
            value,
            digest: digest.map(|d| d.to_string()),
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()),
            created_at: Utc::now(),
        };

        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, serde_json::to_vec(&entry)?).await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
        };

        if let Err(err) = write.await {
            warn!(key = key, error = %err, "failed to save disk cache entry");
        } else {
            debug!(key = key, path = %path.display(), "saved to disk cache");
        }
    }
}

/// Unified two-tier cache with singleflight.
pub struct CacheManager {
    memory: Mutex<LruCache>,
    disk: DiskCache,
    flights: Vec<tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    default_ttl: Duration,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            memory: Mutex::new(LruCache::new(config.max_items, config.max_bytes)),
            disk: DiskCache::new(config.disk_dir.clone()),
            flights: (0..FLIGHT_SHARDS)
                .map(|_| tokio::sync::Mutex::new(HashMap::new()))
                .collect(),
            default_ttl: config.default_ttl,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Read a value from memory then disk, promoting disk hits.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        expected_digest: Option<&str>,
    ) -> Option<T> {
        let cached = self.memory.lock().expect("cache lock poisoned").get(key);
        if let Some(bytes) = cached {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
                Err(err) => {
                    warn!(key = key, error = %err, "failed to decode memory cache entry");
                    self.memory.lock().expect("cache lock poisoned").remove(key);
                }
            }
        }

        if let Some(value) = self.disk.get(key, expected_digest).await {
            if let Ok(typed) = serde_json::from_value::<T>(value.clone()) {
                self.promote(key, &value);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(typed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write a value to both tiers.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        digest: Option<&str>,
        ttl: Option<Duration>,
    ) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(err) => {
                warn!(key = key, error = %err, "failed to serialize cache value");
                return;
            }
        };

        self.promote_with_ttl(key, &json, ttl);
        self.disk.put(key, json, digest, ttl).await;
    }

    /// Get from cache or compute once per key.
    ///
    /// Concurrent callers for the same key coalesce: one runs the
    /// factory, the rest wait and then re-read the cache (double-checked
    /// after acquiring the per-key lock). Factory errors propagate to the
    /// caller that ran it and to waiters that find nothing cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        expected_digest: Option<&str>,
        factory: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key, expected_digest).await {
            return Ok(value);
        }

        let flight = self.flight_lock(key).await;
        let _guard = flight.lock().await;

        // Double-check after acquiring the per-key lock
        if let Some(value) = self.get(key, expected_digest).await {
            return Ok(value);
        }

        let value = factory().await?;
        self.put(key, &value, expected_digest, None).await;
        Ok(value)
    }

    /// Remove expired entries from the memory tier.
    pub fn cleanup_expired(&self) {
        self.memory
            .lock()
            .expect("cache lock poisoned")
            .cleanup_expired();
    }

    /// Drop every memory-tier entry. The disk tier is left alone; it may
    /// be shared with other processes.
    pub fn clear(&self) {
        self.memory.lock().expect("cache lock poisoned").clear();
    }

    pub fn stats(&self) -> CacheStats {
        let memory = self.memory.lock().expect("cache lock poisoned");
        CacheStats {
            memory_items: memory.entries.len(),
            memory_bytes: memory.current_bytes,
            memory_max_items: memory.max_items,
            memory_max_bytes: memory.max_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_dir: self.config.disk_dir.display().to_string(),
        }
    }

    pub fn disk_dir(&self) -> &Path {
        &self.config.disk_dir
    }

    fn promote(&self, key: &str, value: &serde_json::Value) {
        self.promote_with_ttl(key, value, self.default_ttl);
    }

    fn promote_with_ttl(&self, key: &str, value: &serde_json::Value, ttl: Duration) {
        if let Ok(bytes) = serde_json::to_vec(value) {
            let expires_at = Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
            self.memory.lock().expect("cache lock poisoned").put(
                key.to_string(),
                Arc::new(bytes),
                expires_at,
            );
        }
    }

    /// Per-key lock from a sharded map, so lock-map mutation does not
    /// serialize unrelated keys.
    async fn flight_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let shard = (hasher.finalize()[0] as usize) % FLIGHT_SHARDS;

        let mut map = self.flights[shard].lock().await;
        Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config(dir: &Path) -> CacheConfig {
        CacheConfig {
            max_items: 4,
            max_bytes: 1 << 20,
            default_ttl: Duration::from_secs(60),
            disk_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(test_config(dir.path()));
        cache.put("k", &vec![1u8, 2, 3], None, None).await;
        let got: Vec<u8> = cache.get("k", None).await.unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_lru_eviction_by_item_cap() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(test_config(dir.path()));
        for i in 0..6 {
            cache.put(&format!("k{}", i), &i, None, None).await;
        }
        let stats = cache.stats();
        assert!(stats.memory_items <= 4);
        // The newest entries survive
        assert_eq!(cache.get::<i32>("k5", None).await, Some(5));
    }

    #[tokio::test]
    async fn test_disk_promotion_after_memory_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(test_config(dir.path()));
        cache.put("k", &"value".to_string(), None, None).await;
        cache.clear();
        let got: String = cache.get("k", None).await.unwrap();
        assert_eq!(got, "value");
        assert_eq!(cache.stats().memory_items, 1);
    }

    #[tokio::test]
    async fn test_digest_mismatch_invalidates_disk_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(test_config(dir.path()));
        cache.put("k", &1i64, Some("digest-a"), None).await;
        cache.clear();
        assert_eq!(cache.get::<i64>("k", Some("digest-b")).await, None);
        assert_eq!(cache.get::<i64>("k", Some("digest-a")).await, Some(1));
    }

    #[tokio::test]
    async fn test_expired_entries_removed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.default_ttl = Duration::from_millis(10);
        let cache = CacheManager::new(config);
        cache.put("k", &1i64, None, None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get::<i64>("k", None).await, None);
    }

    #[tokio::test]
    async fn test_singleflight_invokes_factory_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheManager::new(test_config(dir.path())));
        let invocations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let invocations = Arc::clone(&invocations);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", None, || async {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::io::Error>(7i64)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disk_failure_degrades_to_miss() {
        // Point the disk tier at an unwritable location; calls still work
        let cache = CacheManager::new(CacheConfig {
            disk_dir: PathBuf::from("/proc/nonexistent/cache"),
            ..test_config(Path::new("/tmp"))
        });
        cache.put("k", &1i64, None, None).await;
        // Memory tier still serves the value
        assert_eq!(cache.get::<i64>("k", None).await, Some(1));
    }
}
