//! In-memory TTL cache for sanitised page markup.
//!
//! Entries are keyed by the SHA-256 digest of the exact URL string, so two
//! spellings of the same page are two entries. Expiry is lazy: an entry older
//! than the TTL is dropped the next time it is looked up. [`ContentCache::sweep`]
//! removes every expired entry at once for long-running hosts.
//!
//! The cache is shared behind an `Arc` by concurrent conversions. Reads take a
//! shared lock; writes and expiry removal take the exclusive lock. When two
//! conversions of the same URL race, the last `put` wins.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    content: String,
    created_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

/// Time-bounded mapping from URL to sanitised markup.
pub struct ContentCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    enabled: bool,
}

impl ContentCache {
    pub fn new(ttl: Duration, enabled: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            enabled,
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stable key for a URL: lowercase hex SHA-256 of its bytes.
    pub fn key_for(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    /// Fresh content for `url`, if any. An expired entry is removed.
    pub fn get(&self, url: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let key = Self::key_for(url);
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&key) {
                None => return None,
                Some(entry) if entry.is_fresh(self.ttl) => {
                    debug!("Cache hit for {}", url);
                    return Some(entry.content.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the write lock: a concurrent put may have refreshed it.
        if let Some(entry) = entries.get(&key) {
            if entry.is_fresh(self.ttl) {
                return Some(entry.content.clone());
            }
            entries.remove(&key);
            debug!("Cache entry for {} expired", url);
        }
        None
    }

    /// Store `content` for `url`, replacing any previous entry.
    pub fn put(&self, url: &str, content: impl Into<String>) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            content: content.into(),
            created_at: Instant::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::key_for(url), entry);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(self.ttl));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl() {
        let cache = ContentCache::new(Duration::from_secs(3600), true);
        cache.put("https://example.com/", "<p>hi</p>");
        assert_eq!(cache.get("https://example.com/").as_deref(), Some("<p>hi</p>"));
        assert_eq!(cache.get("https://example.com"), None);
    }

    #[test]
    fn zero_ttl_always_misses() {
        let cache = ContentCache::new(Duration::ZERO, true);
        cache.put("https://example.com/", "x");
        assert_eq!(cache.get("https://example.com/"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn expires_after_ttl() {
        let cache = ContentCache::new(Duration::from_millis(50), true);
        cache.put("https://example.com/", "x");
        assert!(cache.get("https://example.com/").is_some());
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("https://example.com/"), None);
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ContentCache::disabled();
        cache.put("https://example.com/", "x");
        assert_eq!(cache.get("https://example.com/"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn last_write_wins() {
        let cache = ContentCache::new(Duration::from_secs(60), true);
        cache.put("https://example.com/", "first");
        cache.put("https://example.com/", "second");
        assert_eq!(cache.get("https://example.com/").as_deref(), Some("second"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = ContentCache::new(Duration::from_millis(50), true);
        cache.put("https://old.example/", "x");
        std::thread::sleep(Duration::from_millis(80));
        cache.put("https://new.example/", "y");
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("https://new.example/").is_some());
    }

    #[test]
    fn key_is_sha256_hex() {
        let key = ContentCache::key_for("abc");
        assert_eq!(
            key,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
