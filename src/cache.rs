//! Two-tier memoization for collaborator responses and structural analyses.
//!
//! The in-memory tier is a map guarded by a mutex; the persisted tier is one
//! JSON record per key under the cache directory, named by the blake3 hash of
//! the key. Persistence is best-effort: write and read failures degrade to a
//! miss and are only logged.
//!
//! Callers share one instance (usually behind an `Arc`). The in-memory write
//! and the persisted write are not atomic with each other, so concurrent
//! writers to the same key must be serialized by the caller.

use crate::util;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub const RECORD_EXTENSION: &str = "json";

pub type Clock = Box<dyn Fn() -> SystemTime + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub timestamp_ms: u64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }

    fn within_ttl(&self, now_ms: u64) -> bool {
        self.age_ms(now_ms) < self.ttl_ms
    }

    fn fresh(&self, now_ms: u64, max_age: Duration) -> bool {
        self.age_ms(now_ms) < max_age.as_millis() as u64 && self.within_ttl(now_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hit percentage in `[0, 100]`.
    pub rate: f64,
    pub entries: usize,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {}, misses: {}, rate: {:.1}%, entries: {}",
            self.hits, self.misses, self.rate, self.entries
        )
    }
}

pub struct TieredCache {
    dir: Option<PathBuf>,
    enabled: bool,
    memory: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    clock: Clock,
}

impl TieredCache {
    /// Cache persisted under `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::build(Some(dir.into()), true)
    }

    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(util::state_dir(repo_root).join("cache"))
    }

    pub fn in_memory() -> Self {
        Self::build(None, true)
    }

    /// A cache that never stores anything; every lookup is a miss.
    pub fn disabled() -> Self {
        Self::build(None, false)
    }

    fn build(dir: Option<PathBuf>, enabled: bool) -> Self {
        Self {
            dir,
            enabled,
            memory: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            clock: Box::new(SystemTime::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Look `key` up. Both tiers require the entry to be younger than
    /// `max_age` and within its own ttl. A persisted hit is promoted into
    /// memory.
    pub fn get(&self, key: &str, max_age: Duration) -> Option<String> {
        if !self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let now_ms = self.now_ms();

        {
            let mut memory = self.memory.lock().unwrap_or_else(|err| err.into_inner());
            if let Some(entry) = memory.get(key) {
                if entry.fresh(now_ms, max_age) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                if entry.within_ttl(now_ms) {
                    // Too old for this caller only; the persisted copy has the same age.
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                memory.remove(key);
            }
        }

        if let Some(entry) = self.read_record(key) {
            if entry.fresh(now_ms, max_age) {
                let value = entry.value.clone();
                self.memory
                    .lock()
                    .unwrap_or_else(|err| err.into_inner())
                    .insert(key.to_string(), entry);
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit (persisted)");
                return Some(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            timestamp_ms: self.now_ms(),
            ttl_ms: ttl.as_millis() as u64,
        };
        self.write_record(&entry);
        self.memory
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .insert(key.to_string(), entry);
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let raw = self.get(key, max_age)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, "cached value does not decode: {err}");
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl),
            Err(err) => warn!(key, "cache value does not encode: {err}"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let rate = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let entries = self
            .memory
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .len();
        CacheStats {
            hits,
            misses,
            rate,
            entries,
        }
    }

    /// Drop every entry from both tiers. Returns the number of persisted
    /// records removed.
    pub fn clear(&self) -> usize {
        self.memory
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clear();
        let Some(dir) = self.dir.as_deref() else {
            return 0;
        };
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => warn!("remove cache record {}: {err}", path.display()),
            }
        }
        removed
    }

    pub fn record_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.dir.as_deref()?;
        Some(dir.join(format!(
            "{}.{RECORD_EXTENSION}",
            util::blake3_hex(key.as_bytes())
        )))
    }

    fn now_ms(&self) -> u64 {
        util::unix_millis((self.clock)())
    }

    fn read_record(&self, key: &str) -> Option<CacheEntry> {
        let path = self.record_path(key)?;
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.key == key => Some(entry),
            Ok(_) => None,
            Err(err) => {
                debug!("unreadable cache record {}: {err}", path.display());
                None
            }
        }
    }

    fn write_record(&self, entry: &CacheEntry) {
        let Some(path) = self.record_path(&entry.key) else {
            return;
        };
        let encoded = match serde_json::to_string(entry) {
            Ok(value) => value,
            Err(err) => {
                warn!("encode cache record: {err}");
                return;
            }
        };
        if let Err(err) = util::write_string(&path, &encoded) {
            warn!("persist cache record: {err:#}");
        }
    }
}

impl fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("dir", &self.dir)
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn manual_clock() -> (Arc<Mutex<SystemTime>>, Clock) {
        let now = Arc::new(Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000)));
        let handle = Arc::clone(&now);
        let clock: Clock = Box::new(move || *handle.lock().unwrap());
        (now, clock)
    }

    fn advance(now: &Arc<Mutex<SystemTime>>, by: Duration) {
        let mut guard = now.lock().unwrap();
        *guard += by;
    }

    #[test]
    fn set_then_get_returns_exact_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(dir.path());
        let value = "line one\nline two\t\u{e9}";
        cache.set("intent:fix it", value, Duration::from_secs(60));
        assert_eq!(
            cache.get("intent:fix it", Duration::from_secs(60)).as_deref(),
            Some(value)
        );
    }

    #[test]
    fn entry_expires_exactly_at_ttl() {
        let (now, clock) = manual_clock();
        let cache = TieredCache::in_memory().with_clock(clock);
        cache.set("k", "v", Duration::from_secs(10));

        advance(&now, Duration::from_millis(9_999));
        assert_eq!(cache.get("k", Duration::from_secs(10)).as_deref(), Some("v"));

        advance(&now, Duration::from_millis(1));
        assert_eq!(cache.get("k", Duration::from_secs(10)), None);
    }

    #[test]
    fn persisted_record_is_promoted_in_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = TieredCache::new(dir.path());
            cache.set("files:x", "a.py, b.py", Duration::from_secs(600));
        }
        let cache = TieredCache::new(dir.path());
        assert_eq!(
            cache.get("files:x", Duration::from_secs(600)).as_deref(),
            Some("a.py, b.py")
        );
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn persisted_tier_honours_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let (now, clock) = manual_clock();
        {
            let cache = TieredCache::new(dir.path());
            let cache = cache.with_clock(Box::new({
                let now = Arc::clone(&now);
                move || *now.lock().unwrap()
            }));
            cache.set("k", "v", Duration::from_secs(3600));
        }
        advance(&now, Duration::from_secs(120));
        let cache = TieredCache::new(dir.path()).with_clock(clock);
        assert_eq!(cache.get("k", Duration::from_secs(60)), None);
        assert_eq!(cache.get("k", Duration::from_secs(600)).as_deref(), Some("v"));
    }

    #[test]
    fn memory_tier_honours_max_age() {
        let (now, clock) = manual_clock();
        let cache = TieredCache::in_memory().with_clock(clock);
        cache.set("k", "v", Duration::from_secs(3600));

        advance(&now, Duration::from_secs(120));
        assert_eq!(cache.get("k", Duration::from_secs(60)), None);
        assert_eq!(cache.get("k", Duration::from_secs(600)).as_deref(), Some("v"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn corrupt_record_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(dir.path());
        let path = cache.record_path("broken").unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(cache.get("broken", Duration::from_secs(60)), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn stats_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::new(dir.path());
        cache.set("a", "1", Duration::from_secs(60));
        cache.set("b", "2", Duration::from_secs(60));
        assert!(cache.get("a", Duration::from_secs(60)).is_some());
        assert!(cache.get("missing", Duration::from_secs(60)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.to_string(), "hits: 1, misses: 1, rate: 50.0%, entries: 2");

        assert_eq!(cache.clear(), 2);
        assert!(cache.get("a", Duration::from_secs(60)).is_none());
    }

    #[test]
    fn json_helpers_round_trip() {
        let cache = TieredCache::in_memory();
        cache.set_json("list", &vec!["a.py".to_string()], Duration::from_secs(5));
        let value: Option<Vec<String>> = cache.get_json("list", Duration::from_secs(5));
        assert_eq!(value, Some(vec!["a.py".to_string()]));
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = TieredCache::disabled();
        cache.set("k", "v", Duration::from_secs(60));
        assert_eq!(cache.get("k", Duration::from_secs(60)), None);
        assert_eq!(cache.clear(), 0);
    }
}
