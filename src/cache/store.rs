//! Fixed-capacity LRU store
//!
//! Entries live in a slot vector threaded by an index-linked recency list
//! (head = most recently used, tail = least recently used). A hash map points
//! from key to slot, so lookup, touch, insert and eviction are all O(1).

use crate::cache::types::CacheStats;
use crate::error::{Result, VidqaError};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tracing::debug;

const NIL: usize = usize::MAX;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Least-recently-used cache with a capacity fixed at construction
///
/// `get` and `put` both count as a touch. `has` and `peek` do not.
pub struct BoundedCache<K, V> {
    capacity: usize,
    index: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    head: usize,
    tail: usize,
    stats: CacheStats,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create an empty cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(VidqaError::Config(
                "cache capacity must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            capacity,
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            head: NIL,
            tail: NIL,
            stats: CacheStats::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check whether a key is present without touching it
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Look up a value and mark it most recently used
    ///
    /// A miss is a normal outcome and returns `None`.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.index.get(key).copied() {
            Some(i) => {
                self.stats.hits += 1;
                self.touch(i);
                Some(&self.slots[i].value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Look up a value without changing its recency
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).map(|&i| &self.slots[i].value)
    }

    /// Store or overwrite a value and mark it most recently used
    ///
    /// Returns the entry that was evicted to make room, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&i) = self.index.get(&key) {
            self.slots[i].value = value;
            self.touch(i);
            return None;
        }

        let evicted = if self.slots.len() >= self.capacity {
            let lru = self.tail;
            let (key, value) = self.remove_slot(lru);
            debug!("Evicting least recently used entry: {:?}", key);
            self.stats.evictions += 1;
            Some((key, value))
        } else {
            None
        };

        let i = self.slots.len();
        self.slots.push(Slot {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        });
        self.index.insert(key, i);
        self.push_front(i);
        self.stats.entries = self.slots.len();

        evicted
    }

    /// Remove an entry explicitly
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.index.get(key).copied()?;
        let (_, value) = self.remove_slot(i);
        self.stats.invalidations += 1;
        Some(value)
    }

    /// Drop every entry; counters other than `entries` are kept
    pub fn clear(&mut self) {
        let count = self.slots.len();
        self.index.clear();
        self.slots.clear();
        self.head = NIL;
        self.tail = NIL;
        self.stats.entries = 0;
        self.stats.invalidations += count as u64;
    }

    /// Keys from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.slots.len());
        let mut cursor = self.head;
        while cursor != NIL {
            keys.push(self.slots[cursor].key.clone());
            cursor = self.slots[cursor].next;
        }
        keys
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    fn touch(&mut self, i: usize) {
        if self.head != i {
            self.unlink(i);
            self.push_front(i);
        }
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.slots[i].prev, self.slots[i].next);

        if prev != NIL {
            self.slots[prev].next = next;
        } else {
            self.head = next;
        }

        if next != NIL {
            self.slots[next].prev = prev;
        } else {
            self.tail = prev;
        }

        self.slots[i].prev = NIL;
        self.slots[i].next = NIL;
    }

    fn push_front(&mut self, i: usize) {
        self.slots[i].prev = NIL;
        self.slots[i].next = self.head;

        if self.head != NIL {
            self.slots[self.head].prev = i;
        }
        self.head = i;

        if self.tail == NIL {
            self.tail = i;
        }
    }

    /// Unlink slot `i` and swap-remove it, re-pointing whatever moved into `i`
    fn remove_slot(&mut self, i: usize) -> (K, V) {
        self.unlink(i);
        let removed = self.slots.swap_remove(i);
        self.index.remove(&removed.key);

        if i < self.slots.len() {
            let (prev, next) = (self.slots[i].prev, self.slots[i].next);

            if prev != NIL {
                self.slots[prev].next = i;
            } else {
                self.head = i;
            }

            if next != NIL {
                self.slots[next].prev = i;
            } else {
                self.tail = i;
            }

            let moved_key = self.slots[i].key.clone();
            self.index.insert(moved_key, i);
        }

        self.stats.entries = self.slots.len();
        (removed.key, removed.value)
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("keys", &self.keys_by_recency())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> BoundedCache<String, i32> {
        BoundedCache::new(capacity).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BoundedCache::<String, i32>::new(0);
        assert!(matches!(result, Err(VidqaError::Config(_))));
    }

    #[test]
    fn test_put_and_get() {
        let mut cache = cache(4);
        cache.put("a".to_string(), 1);

        assert!(cache.has("a"));
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_get_touches_entry() {
        let mut cache = cache(2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.get("a");

        let evicted = cache.put("c".to_string(), 3);
        assert_eq!(evicted, Some(("b".to_string(), 2)));
        assert!(cache.has("a"));
        assert!(cache.has("c"));
        assert!(!cache.has("b"));
        assert_eq!(cache.peek("a"), Some(&1));
        assert_eq!(cache.peek("c"), Some(&3));
    }

    #[test]
    fn test_has_does_not_touch() {
        let mut cache = cache(2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        assert!(cache.has("a"));

        cache.put("c".to_string(), 3);
        assert!(!cache.has("a"));
    }

    #[test]
    fn test_overwrite_keeps_size_and_touches() {
        let mut cache = cache(2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        assert_eq!(cache.put("a".to_string(), 10), None);
        assert_eq!(cache.len(), 2);

        cache.put("c".to_string(), 3);
        assert_eq!(cache.peek("a"), Some(&10));
        assert!(!cache.has("b"));
    }

    #[test]
    fn test_keys_by_recency() {
        let mut cache = cache(3);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);
        cache.get("a");

        assert_eq!(cache.keys_by_recency(), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_remove_relinks_moved_slot() {
        let mut cache = cache(3);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);

        // "a" sits in slot 0, so "c" is swapped into its place
        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.keys_by_recency(), vec!["c", "b"]);
        assert_eq!(cache.get("c"), Some(&3));

        cache.put("d".to_string(), 4);
        cache.put("e".to_string(), 5);
        assert!(!cache.has("b"));
        assert_eq!(cache.keys_by_recency(), vec!["e", "d", "c"]);
    }

    #[test]
    fn test_clear() {
        let mut cache = cache(3);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.keys_by_recency().is_empty());
        assert_eq!(cache.stats().invalidations, 2);

        cache.put("c".to_string(), 3);
        assert_eq!(cache.keys_by_recency(), vec!["c"]);
    }

    #[test]
    fn test_capacity_one() {
        let mut cache = cache(1);
        cache.put("a".to_string(), 1);
        let evicted = cache.put("b".to_string(), 2);

        assert_eq!(evicted, Some(("a".to_string(), 1)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(&2));
        assert_eq!(cache.stats().evictions, 1);
    }
}
