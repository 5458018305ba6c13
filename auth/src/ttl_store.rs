//! Key-value store with per-entry time-to-live.

use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Configuration for a TTL store.
#[derive(Debug, Clone)]
pub struct TtlStoreConfig {
    /// Entry lifetime when none is given.
    pub default_ttl: Duration,
    /// Size at which inserts first sweep expired entries.
    pub max_entries: usize,
}

impl Default for TtlStoreConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entries: 100_000,
        }
    }
}

/// Thread-safe key-value store whose entries vanish after their TTL.
///
/// Expired entries are never returned; they are dropped lazily on access
/// and in bulk by [`TtlStore::evict_expired`].
pub struct TtlStore<K, V> {
    entries: DashMap<K, Entry<V>>,
    config: TtlStoreConfig,
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: TtlStoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(TtlStoreConfig {
            default_ttl: ttl,
            ..Default::default()
        })
    }

    /// Get a live value.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid() {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove_if(key, |_, e| !e.is_valid());
        }
        None
    }

    /// Insert with the default TTL, replacing any previous value.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.config.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if self.entries.len() >= self.config.max_entries {
            self.evict_expired();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Mutate a live value in place, keeping its expiry. Returns `None` if
    /// the key is absent or expired.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut entry = self.entries.get_mut(key)?;
        if !entry.is_valid() {
            drop(entry);
            self.entries.remove_if(key, |_, e| !e.is_valid());
            return None;
        }
        Some(f(&mut entry.value))
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries
            .remove(key)
            .filter(|(_, e)| e.is_valid())
            .map(|(_, e)| e.value)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid());
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_insert_and_get() {
        let store = TtlStore::with_ttl(Duration::from_secs(60));
        store.insert("otp_1", 7u32);

        assert_eq!(store.get(&"otp_1"), Some(7));
        assert_eq!(store.get(&"otp_2"), None);
    }

    #[test]
    fn test_entries_expire() {
        let store = TtlStore::with_ttl(Duration::from_millis(30));
        store.insert("k", "v");
        assert!(store.get(&"k").is_some());

        sleep(Duration::from_millis(40));

        assert!(store.get(&"k").is_none());
        assert!(store.update(&"k", |_| ()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_in_place() {
        let store = TtlStore::with_ttl(Duration::from_secs(60));
        store.insert(1, 0u32);

        assert_eq!(store.update(&1, |n| { *n += 1; *n }), Some(1));
        assert_eq!(store.get(&1), Some(1));
    }

    #[test]
    fn test_evict_expired() {
        let store = TtlStore::with_ttl(Duration::from_secs(60));
        store.insert_with_ttl(1, (), Duration::from_millis(1));
        store.insert(2, ());

        sleep(Duration::from_millis(5));

        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
