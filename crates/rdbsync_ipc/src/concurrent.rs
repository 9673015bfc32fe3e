//! A hash map whose operations are atomic with respect to the whole map.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

/// A mutex-guarded hash map.
///
/// Every method takes the lock once, so a [`compute`](Self::compute) closure
/// observes and updates the entry without interference. Values removed by an
/// operation are dropped after the lock is released, so a value's `Drop`
/// may safely touch the map again.
///
/// Closures run under the lock and must not call back into the same map.
pub struct ConcurrentMap<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> ConcurrentMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts `value` only if `key` is absent. Returns true on insertion.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, value);
        true
    }

    /// Inserts or replaces the value for `key`, returning the previous one.
    pub fn insert_or_assign(&self, key: K, value: V) -> Option<V> {
        self.entries.lock().insert(key, value)
    }

    /// Returns a clone of the value for `key`.
    pub fn find(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.entries.lock().get(key).cloned()
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Removes and returns the value for `key`.
    pub fn erase(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key)
    }

    /// Removes every entry for which `predicate` returns true. Returns the
    /// number of removed entries.
    pub fn erase_if<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut removed = Vec::new();
        {
            let mut entries = self.entries.lock();
            let mut kept = HashMap::with_capacity(entries.len());
            for (k, mut v) in entries.drain() {
                if predicate(&k, &mut v) {
                    removed.push(v);
                } else {
                    kept.insert(k, v);
                }
            }
            *entries = kept;
        }
        removed.len()
    }

    /// Runs `action` on the entry for `key`, creating a default value first
    /// if the key is absent. The entry is kept if `action` returns true and
    /// erased otherwise.
    pub fn compute<F>(&self, key: K, action: F) -> bool
    where
        F: FnOnce(&K, &mut V) -> bool,
        V: Default,
        K: Clone,
    {
        let removed;
        let keep;
        {
            let mut entries = self.entries.lock();
            let value = entries.entry(key.clone()).or_default();
            keep = action(&key, value);
            removed = if keep { None } else { entries.remove(&key) };
        }
        drop(removed);
        keep
    }

    /// Runs `action` on the entry for `key` if it exists. The entry is kept
    /// if `action` returns true. Returns false if the key was absent.
    pub fn compute_if_present<F>(&self, key: &K, action: F) -> bool
    where
        F: FnOnce(&K, &mut V) -> bool,
    {
        let removed;
        {
            let mut entries = self.entries.lock();
            let Some(value) = entries.get_mut(key) else {
                return false;
            };
            removed = if action(key, value) {
                None
            } else {
                entries.remove(key)
            };
        }
        drop(removed);
        true
    }

    /// Visits every entry.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V),
    {
        for (k, v) in self.entries.lock().iter() {
            visit(k, v);
        }
    }

    /// Returns the keys currently present.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.entries.lock().keys().cloned().collect()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.entries.lock());
        drop(old);
    }
}

impl<K, V> std::fmt::Debug for ConcurrentMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentMap")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn insert_only_if_absent() {
        let map = ConcurrentMap::new();
        assert!(map.insert(1, "a"));
        assert!(!map.insert(1, "b"));
        assert_eq!(map.find(&1), Some("a"));
        assert_eq!(map.insert_or_assign(1, "c"), Some("a"));
        assert_eq!(map.find(&1), Some("c"));
    }

    #[test]
    fn erase_and_contains() {
        let map = ConcurrentMap::new();
        map.insert("k", 1);
        assert!(map.contains(&"k"));
        assert_eq!(map.erase(&"k"), Some(1));
        assert!(!map.contains(&"k"));
        assert!(map.is_empty());
    }

    #[test]
    fn erase_if_removes_matching() {
        let map = ConcurrentMap::new();
        for i in 0..10 {
            map.insert(i, i * 10);
        }
        assert_eq!(map.erase_if(|k, _| k % 2 == 0), 5);
        assert_eq!(map.len(), 5);
        assert!(!map.contains(&4));
        assert!(map.contains(&5));
    }

    #[test]
    fn compute_creates_and_erases() {
        let map: ConcurrentMap<i32, Vec<i32>> = ConcurrentMap::new();
        assert!(map.compute(7, |_, v| {
            v.push(1);
            true
        }));
        assert_eq!(map.find(&7), Some(vec![1]));

        assert!(!map.compute(7, |_, v| {
            v.clear();
            !v.is_empty()
        }));
        assert!(!map.contains(&7));
    }

    #[test]
    fn compute_if_present_skips_absent() {
        let map: ConcurrentMap<i32, i32> = ConcurrentMap::new();
        assert!(!map.compute_if_present(&1, |_, _| true));
        map.insert(1, 5);
        assert!(map.compute_if_present(&1, |_, v| {
            *v += 1;
            true
        }));
        assert_eq!(map.find(&1), Some(6));
        assert!(map.compute_if_present(&1, |_, _| false));
        assert!(!map.contains(&1));
    }

    struct Reentrant {
        map: Arc<ConcurrentMap<i32, Reentrant>>,
        dropped: Arc<AtomicUsize>,
    }

    impl Drop for Reentrant {
        fn drop(&mut self) {
            // would deadlock if the lock were still held
            let _ = self.map.len();
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn removed_values_drop_outside_lock() {
        let map = Arc::new(ConcurrentMap::new());
        let dropped = Arc::new(AtomicUsize::new(0));
        map.insert(
            1,
            Reentrant {
                map: Arc::clone(&map),
                dropped: Arc::clone(&dropped),
            },
        );
        map.compute_if_present(&1, |_, _| false);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_compute_is_atomic() {
        let map: Arc<ConcurrentMap<&'static str, usize>> = Arc::new(ConcurrentMap::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        map.compute("counter", |_, v| {
                            *v += 1;
                            true
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.find(&"counter"), Some(8000));
    }
}
