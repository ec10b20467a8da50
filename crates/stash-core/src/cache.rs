//! Optional in-memory cache of decoded values.
//!
//! The cache is write-through: the engine only inserts values that are
//! already committed, and invalidates keys on every mutation. When full, the
//! least recently accessed entry is evicted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cache sizing and expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Entries older than this are treated as absent
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub size: u64,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub expires: Option<DateTime<Utc>>,
    /// Set when the entry holds a value not yet persisted. Always false in
    /// write-through mode.
    pub dirty: bool,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

#[derive(Debug)]
pub struct ValueCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ValueCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a live entry, bumping its access statistics.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut entries = self.entries.lock().ok()?;
        let now = Utc::now();
        let expired = entries.get(key).is_some_and(|entry| entry.is_expired(now));
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: &str, value: serde_json::Value, size: u64) {
        if self.config.max_entries == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            let victim = entries
                .values()
                .min_by_key(|entry| entry.last_access)
                .map(|entry| entry.key.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
            }
        }
        let now = Utc::now();
        let expires = self
            .config
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| now + ttl);
        entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                size,
                access_count: 0,
                last_access: now,
                created: now,
                expires,
                dirty: false,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of an entry's bookkeeping, without touching access stats.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().ok()?.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hit_updates_access_count() {
        let cache = ValueCache::new(CacheConfig::default());
        cache.insert("a", json!(1), 1);
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.entry("a").unwrap().access_count, 2);
        assert!(!cache.entry("a").unwrap().dirty);
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let cache = ValueCache::new(CacheConfig {
            max_entries: 2,
            ttl: None,
        });
        cache.insert("a", json!("a"), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", json!("b"), 1);
        std::thread::sleep(Duration::from_millis(2));
        cache.get("a");
        cache.insert("c", json!("c"), 1);

        assert_eq!(cache.len(), 2);
        assert!(cache.entry("b").is_none());
        assert!(cache.entry("a").is_some());
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = ValueCache::new(CacheConfig {
            max_entries: 8,
            ttl: Some(Duration::from_millis(5)),
        });
        cache.insert("a", json!(1), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }
}
