use std::{
    collections::{btree_map, BTreeMap, HashMap},
    fmt::Debug,
    hash::Hash,
};

struct Entry<V> {
    value: V,
    /// Position in the recency order; larger is more recent.
    tick: u64,
}

/// Least-recently-used map with a soft capacity.
///
/// Inserting never evicts on its own: the owner calls
/// [`Cache::evict_while_over`] with a predicate that decides which entries
/// may leave, so entries still in use can be kept past the capacity.
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    capacity: usize,
    entries: HashMap<K, Entry<V>>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, K>,
    next_tick: u64,
    stats: Stats,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(capacity: usize) -> Self {
        Cache {
            capacity,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            stats: Stats::default(),
        }
    }

    /// Returns the value and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick;
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                self.order.insert(tick, key.clone());
                entry.tick = tick;
                self.next_tick += 1;
                self.stats.hit();
                Some(&entry.value)
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    /// Returns the value without touching recency or stats.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts as most recently used, returning the value it replaces.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.clone());
        let old = self.entries.insert(key, Entry { value, tick })?;
        self.order.remove(&old.tick);
        Some(old.value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry.value)
    }

    /// Evicts least recently used entries accepted by `evictable` until
    /// the cache is within capacity or nothing else may leave.
    pub fn evict_while_over<F>(&mut self, mut evictable: F) -> Vec<(K, V)>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut evicted = Vec::new();
        if self.entries.len() <= self.capacity {
            return evicted;
        }
        let victims: Vec<(u64, K)> = self
            .order
            .iter()
            .filter(|(_, key)| {
                self.entries
                    .get(*key)
                    .is_some_and(|entry| evictable(key, &entry.value))
            })
            .take(self.entries.len() - self.capacity)
            .map(|(tick, key)| (*tick, key.clone()))
            .collect();
        for (tick, key) in victims {
            self.order.remove(&tick);
            if let Some(entry) = self.entries.remove(&key) {
                evicted.push((key, entry.value));
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses)
    pub fn stats(&self) -> (usize, usize) {
        self.stats.get()
    }

    /// Entries from least to most recently used.
    pub fn iter(&self) -> CacheIterator<'_, K, V> {
        CacheIterator {
            order: self.order.values(),
            entries: &self.entries,
        }
    }
}

pub struct CacheIterator<'a, K, V> {
    order: btree_map::Values<'a, u64, K>,
    entries: &'a HashMap<K, Entry<V>>,
}

impl<'a, K, V> Iterator for CacheIterator<'a, K, V>
where
    K: Eq + Hash,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.order.next()?;
        self.entries.get(key).map(|entry| (key, &entry.value))
    }
}

#[derive(Default)]
struct Stats {
    hits: usize,
    misses: usize,
}

impl Stats {
    fn hit(&mut self) {
        self.hits += 1;
    }

    fn miss(&mut self) {
        self.misses += 1;
    }

    fn get(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}
