//! Bounded, thread-safe LRU cache.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// A bounded least-recently-used cache safe to share across threads.
///
/// A capacity of zero is treated as one.
pub struct LruBucket<K: Hash + Eq, V> {
    cache: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> LruBucket<K, V> {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns a clone of the cached value and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.lock().get(key).cloned()
    }

    /// Stores a value, evicting the least recently used entry if full.
    /// Returns true if the key was not cached before.
    pub fn set(&self, key: K, value: V) -> bool {
        let mut cache = self.cache.lock();
        let fresh = !cache.contains(&key);
        cache.put(key, value);
        fresh
    }

    /// Removes a cached value. Returns true if it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.cache.lock().pop(key).is_some()
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Returns the maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
