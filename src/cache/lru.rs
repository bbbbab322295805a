//! Weight-budgeted LRU cache.
//!
//! The cache is generic over its value type; values are handed back by
//! cloning, so callers store `Arc`s (or other cheaply clonable handles).
//! All state lives under a single mutex.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Thread-safe LRU cache with a total-weight budget.
///
/// Lookups go through [`LruCache::get`], which takes a fetch closure: on a
/// miss the closure supplies the value together with its weight, the entry
/// is inserted at the MRU position, and entries are evicted from the LRU end
/// until the total weight fits the capacity again. The fetch closure runs at
/// most once per miss.
///
/// An entry heavier than the whole capacity may be evicted immediately after
/// insertion; the fetched value is still returned to the caller, and a later
/// lookup simply fetches again.
pub struct LruCache<V: Clone> {
    capacity: u64,
    inner: Mutex<LruInner<V>>,
}

struct LruInner<V> {
    entries: HashMap<u64, Entry<V>>,
    /// LRU order; most recently used at the back.
    order: VecDeque<u64>,
    weight: u64,
}

struct Entry<V> {
    value: V,
    weight: u64,
}

impl<V: Clone> LruCache<V> {
    /// Creates a cache with the given total weight capacity.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                weight: 0,
            }),
        }
    }

    /// Looks up `key`, fetching and inserting on a miss.
    ///
    /// The closure returns the value and its weight. Errors from the fetch
    /// are propagated and nothing is inserted.
    pub fn get<F>(&self, key: u64, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Result<(V, u64)>,
    {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get(&key) {
            let value = entry.value.clone();
            touch(&mut inner.order, key);
            return Ok(value);
        }

        let (value, weight) = fetch()?;
        inner.entries.insert(key, Entry { value: value.clone(), weight });
        inner.order.push_back(key);
        inner.weight += weight;

        while inner.weight > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.weight -= evicted.weight;
            }
        }

        Ok(value)
    }

    /// Removes `key` from the cache, subtracting its weight.
    pub fn remove(&self, key: u64) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(&key) {
            inner.weight -= entry.weight;
            inner.order.retain(|k| *k != key);
        }
    }

    /// Current total weight of cached entries.
    pub fn weight(&self) -> u64 {
        self.inner.lock().weight
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured weight capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// Moves `key` to the MRU position.
///
/// Linear in the number of entries; fine for the entry counts these caches
/// run at (a few hundred tables, a couple thousand blocks).
fn touch(order: &mut VecDeque<u64>, key: u64) {
    if let Some(pos) = order.iter().position(|k| *k == key) {
        order.remove(pos);
    }
    order.push_back(key);
}

/// A view of a shared [`LruCache`] whose keys live in their own namespace.
///
/// Each open table wraps the shared block cache in one of these so that
/// block offsets from different files cannot collide.
pub struct NamespacedCache<V: Clone> {
    cache: std::sync::Arc<LruCache<V>>,
    namespace: u64,
}

impl<V: Clone> NamespacedCache<V> {
    /// Wraps `cache`, scoping all keys under `namespace`.
    pub fn new(cache: std::sync::Arc<LruCache<V>>, namespace: u64) -> Self {
        Self { cache, namespace }
    }

    fn apply_namespace(&self, key: u64) -> u64 {
        (self.namespace << 32) | key
    }

    /// Namespaced [`LruCache::get`].
    pub fn get<F>(&self, key: u64, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Result<(V, u64)>,
    {
        self.cache.get(self.apply_namespace(key), fetch)
    }

    /// Namespaced [`LruCache::remove`].
    pub fn remove(&self, key: u64) {
        self.cache.remove(self.apply_namespace(key));
    }
}
