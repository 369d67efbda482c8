//! Cache of server views with freshness windows and prefix invalidation.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::CacheConfig;

/// Entry cap used when none is configured.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Hierarchical cache key, e.g. `["document", "42", "versions"]`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Key from its segments.
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Whether `prefix` matches this key's leading segments.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Cache entry with TTL.
#[derive(Clone)]
struct CacheEntry {
    data: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(data: Value, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Thread-safe cache for decoded server responses.
pub struct QueryCache {
    enabled: bool,
    max_entries: usize,
    entries: DashMap<QueryKey, CacheEntry>,
}

impl QueryCache {
    /// Create a cache. A disabled cache never stores anything.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            max_entries: DEFAULT_MAX_ENTRIES,
            entries: DashMap::new(),
        }
    }

    /// Create a cache from configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.enabled).with_max_entries(config.max_entries)
    }

    /// Cap the number of stored views (at least one).
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Get a fresh cached value.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let data = self.entries.get(key).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.data.clone())
            }
        });

        match data {
            Some(data) => serde_json::from_value(data).ok(),
            None => {
                self.entries.remove_if(key, |_, entry| entry.is_expired());
                None
            }
        }
    }

    /// Store a value for `ttl`.
    pub fn set<T: Serialize>(&self, key: QueryKey, value: &T, ttl: Duration) {
        if !self.enabled {
            return;
        }

        match serde_json::to_value(value) {
            Ok(data) => {
                if !self.entries.contains_key(&key) {
                    self.enforce_max_entries();
                }
                self.entries.insert(key, CacheEntry::new(data, ttl));
            }
            Err(e) => tracing::warn!("Not caching {key}: {e}"),
        }
    }

    /// Make room for one more entry: expired views go first, then the ones
    /// closest to expiry.
    fn enforce_max_entries(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.entries.retain(|_, entry| !entry.is_expired());

        if self.entries.len() >= self.max_entries {
            let to_remove = self.entries.len() - self.max_entries + 1;
            let mut by_expiry: Vec<(QueryKey, Instant)> = self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.expires_at))
                .collect();
            by_expiry.sort_by_key(|(_, expires_at)| *expires_at);
            for (key, _) in by_expiry.into_iter().take(to_remove) {
                self.entries.remove(&key);
            }
        }
    }

    /// Drop every entry under `prefix`.
    pub fn invalidate(&self, prefix: &QueryKey) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        tracing::debug!("Invalidated cached views under {prefix}");
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_set_and_get() {
        let cache = QueryCache::default();
        let key = QueryKey::new(["chat-status"]);
        cache.set(key.clone(), &vec![1, 2, 3], MINUTE);

        let cached: Option<Vec<i32>> = cache.get(&key);
        assert_eq!(cached, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_expired_entries_miss_and_are_removed() {
        let cache = QueryCache::default();
        let key = QueryKey::new(["chat-history", "default-workspace"]);
        cache.set(key.clone(), &"stale", Duration::ZERO);

        let cached: Option<String> = cache.get(&key);
        assert!(cached.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_by_prefix() {
        let cache = QueryCache::default();
        cache.set(QueryKey::new(["document", "1"]), &1, MINUTE);
        cache.set(QueryKey::new(["document", "1", "versions"]), &2, MINUTE);
        cache.set(QueryKey::new(["document", "2"]), &3, MINUTE);
        cache.set(QueryKey::new(["documents"]), &4, MINUTE);

        cache.invalidate(&QueryKey::new(["document", "1"]));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<i32>(&QueryKey::new(["document", "2"])), Some(3));
        assert_eq!(cache.get::<i32>(&QueryKey::new(["documents"])), Some(4));
    }

    #[test]
    fn test_cache_disabled() {
        let cache = QueryCache::new(false);
        let key = QueryKey::new(["user", "me"]);
        cache.set(key.clone(), &"x", MINUTE);
        assert!(cache.get::<String>(&key).is_none());
    }

    #[test]
    fn test_max_entries_evicts_soonest_to_expire() {
        let cache = QueryCache::new(true).with_max_entries(2);
        cache.set(QueryKey::new(["document", "1"]), &1, MINUTE);
        cache.set(QueryKey::new(["document", "2"]), &2, MINUTE * 10);
        cache.set(QueryKey::new(["document", "3"]), &3, MINUTE * 5);

        assert_eq!(cache.len(), 2);
        assert!(cache.get::<i32>(&QueryKey::new(["document", "1"])).is_none());
        assert_eq!(cache.get::<i32>(&QueryKey::new(["document", "2"])), Some(2));
        assert_eq!(cache.get::<i32>(&QueryKey::new(["document", "3"])), Some(3));
    }

    #[test]
    fn test_max_entries_prefers_expired_and_allows_overwrite() {
        let cache = QueryCache::from_config(&CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.set(QueryKey::new(["documents", "p1"]), &1, Duration::ZERO);
        cache.set(QueryKey::new(["documents", "p2"]), &2, MINUTE);
        cache.set(QueryKey::new(["documents", "p2"]), &20, MINUTE);
        assert_eq!(cache.len(), 2);

        cache.set(QueryKey::new(["documents", "p3"]), &3, MINUTE);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get::<i32>(&QueryKey::new(["documents", "p2"])), Some(20));
        assert_eq!(cache.get::<i32>(&QueryKey::new(["documents", "p3"])), Some(3));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(
            QueryKey::new(["decay-report", "d-9"]).to_string(),
            "decay-report/d-9"
        );
    }
}
