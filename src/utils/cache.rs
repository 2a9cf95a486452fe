/*!
This module provides a `Cache` trait and a thread-safe cache implementing a least-recently-used
(LRU) eviction policy.

Values are handed out wrapped in [`Arc`] so that an entry evicted while a caller is still using it
stays alive until the caller drops it.
*/

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/**
A cache that stores mappings from keys to values.

# Concurrency

Implementations of this trait must be thread-safe.
*/
pub(crate) trait Cache<K, V>: Send + Sync {
    /**
    Insert the key-value pair into the cache and return a handle to the cached value.

    If the key already existed in the cache, the value is replaced.
    */
    fn insert(&self, key: K, value: V) -> Arc<V>;

    /// Get the cached value for the given key.
    fn get(&self, key: &K) -> Option<Arc<V>>;

    /**
    Remove the cached value for the given key.

    Returns the value that was stored or `None` if the key was not found in the cache.
    */
    fn remove(&self, key: &K) -> Option<Arc<V>>;

    /// Get the current number of elements in the cache.
    fn len(&self) -> usize;
}

/// The state of the LRU cache that needs to be protected by a lock.
struct LRUCacheInner<K, V> {
    /// The entries of the cache along with the tick of their last use.
    cache_entries: HashMap<K, (Arc<V>, u64)>,

    /**
    The keys of the cache ordered by their last use.

    The least recently used key has the smallest tick.
    */
    recency: BTreeMap<u64, K>,

    /// A logical clock incremented on every access.
    next_tick: u64,
}

impl<K: Hash + Eq + Clone, V> LRUCacheInner<K, V> {
    /// Mark the key as the most recently used and return its new tick.
    fn touch(&mut self, key: &K, previous_tick: Option<u64>) -> u64 {
        if let Some(tick) = previous_tick {
            self.recency.remove(&tick);
        }

        let tick = self.next_tick;
        self.next_tick += 1;
        self.recency.insert(tick, key.clone());

        tick
    }
}

/// A fixed-size cache that has a least-recently-used eviction policy.
pub(crate) struct LRUCache<K, V> {
    /// The maximum number of entries this cache can hold.
    capacity: usize,

    /// The inner structures maintaining the cache entries and least recently used ordering.
    inner: Mutex<LRUCacheInner<K, V>>,
}

/// Crate-only methods
impl<K, V> LRUCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /**
    Create a new instance of the [`LRUCache`].

    A capacity of zero is treated as a capacity of one.
    */
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let inner = LRUCacheInner {
            cache_entries: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            next_tick: 0,
        };

        Self {
            capacity,
            inner: Mutex::new(inner),
        }
    }
}

impl<K, V> Cache<K, V> for LRUCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Send + Sync,
{
    fn insert(&self, key: K, value: V) -> Arc<V> {
        let mut inner = self.inner.lock();
        let value = Arc::new(value);
        let previous_tick = inner.cache_entries.get(&key).map(|(_, tick)| *tick);
        let tick = inner.touch(&key, previous_tick);
        inner.cache_entries.insert(key, (Arc::clone(&value), tick));

        while inner.cache_entries.len() > self.capacity {
            // Evict least recently used
            let maybe_oldest = inner.recency.iter().next().map(|(tick, key)| (*tick, key.clone()));
            match maybe_oldest {
                Some((oldest_tick, oldest_key)) => {
                    inner.recency.remove(&oldest_tick);
                    inner.cache_entries.remove(&oldest_key);
                }
                None => break,
            }
        }

        value
    }

    fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let (value, previous_tick) = match inner.cache_entries.get(key) {
            Some((value, tick)) => (Arc::clone(value), *tick),
            None => return None,
        };

        let tick = inner.touch(key, Some(previous_tick));
        if let Some(entry) = inner.cache_entries.get_mut(key) {
            entry.1 = tick;
        }

        Some(value)
    }

    fn remove(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let (value, tick) = inner.cache_entries.remove(key)?;
        inner.recency.remove(&tick);

        Some(value)
    }

    fn len(&self) -> usize {
        self.inner.lock().cache_entries.len()
    }
}

impl<K, V> fmt::Debug for LRUCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LRUCache")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cache_evicts_the_least_recently_used_entry() {
        let cache: LRUCache<u64, String> = LRUCache::new(2);
        cache.insert(1, "one".to_string());
        cache.insert(2, "two".to_string());

        // Touch 1 so that 2 becomes the least recently used entry
        assert_eq!(cache.get(&1).unwrap().as_str(), "one");
        cache.insert(3, "three".to_string());

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&2).is_none());
        assert_eq!(cache.get(&1).unwrap().as_str(), "one");
        assert_eq!(cache.get(&3).unwrap().as_str(), "three");
    }

    #[test]
    fn inserting_an_existing_key_replaces_the_value() {
        let cache: LRUCache<u64, String> = LRUCache::new(2);
        cache.insert(1, "one".to_string());
        cache.insert(1, "uno".to_string());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1).unwrap().as_str(), "uno");
    }

    #[test]
    fn removed_values_stay_alive_for_existing_holders() {
        let cache: LRUCache<u64, String> = LRUCache::new(4);
        let held = cache.insert(7, "seven".to_string());

        let removed = cache.remove(&7).unwrap();
        assert!(cache.get(&7).is_none());
        assert_eq!(held.as_str(), "seven");
        assert_eq!(removed.as_str(), "seven");
        assert!(cache.remove(&7).is_none());
    }
}
