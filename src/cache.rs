//! S3-FIFO cache: new entries land in a small probationary queue, entries
//! read again before leaving it are promoted to the main queue, and keys
//! evicted from the small queue are remembered in a ghost queue so that a
//! quick re-insert goes straight to main.

use std::{
    borrow::Borrow,
    cmp::min,
    collections::{HashMap, VecDeque},
    fmt::Debug,
    hash::Hash,
    sync::atomic::{AtomicU8, AtomicUsize, Ordering},
};

/// Maximum frequency limit for an entry in the cache.
const MAX_FREQUENCY_LIMIT: u8 = 3;

struct Entry<V> {
    value: V,
    freq: AtomicU8,
}

impl<V> Entry<V> {
    fn new(value: V) -> Self {
        Entry {
            value,
            freq: AtomicU8::new(0),
        }
    }

    fn freq(&self) -> u8 {
        self.freq.load(Ordering::Relaxed)
    }
}

type EvictedFn<K, V> = Box<dyn Fn(K, V) + Send>;

pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    capacity: usize,
    small_capacity: usize,
    /// new entries are added to this queue
    small: VecDeque<K>,
    /// entries read at least twice while in `small`, or re-inserted from ghost
    main: VecDeque<K>,
    /// keys evicted from `small`, tagged so stale queue slots can be skipped
    ghost: VecDeque<(K, u64)>,
    ghost_index: HashMap<K, u64>,
    ghost_seq: u64,
    /// resident entries
    entries: HashMap<K, Entry<V>>,
    evicted_fn: Option<EvictedFn<K, V>>,
    stats: Stats,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(capacity: usize, evicted_fn: Option<EvictedFn<K, V>>) -> Self {
        let capacity = capacity.max(1);
        Cache {
            capacity,
            small_capacity: (capacity / 10).max(1),
            small: VecDeque::new(),
            main: VecDeque::new(),
            ghost: VecDeque::new(),
            ghost_index: HashMap::new(),
            ghost_seq: 0,
            entries: HashMap::with_capacity(capacity),
            evicted_fn,
            stats: Stats::new(),
        }
    }

    /// Returns a reference to the value of the given key if it exists in the cache.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if let Some(entry) = self.entries.get(key) {
            let freq = min(entry.freq() + 1, MAX_FREQUENCY_LIMIT);
            entry.freq.store(freq, Ordering::Relaxed);
            self.stats.hit();
            Some(&entry.value)
        } else {
            self.stats.miss();
            None
        }
    }

    /// Inserts or replaces an entry. A replaced entry keeps its queue slot
    /// and frequency.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            return;
        }

        while self.entries.len() >= self.capacity {
            self.evict();
        }

        if self.ghost_index.remove(&key).is_some() {
            self.main.push_back(key.clone());
        } else {
            self.small.push_back(key.clone());
        }
        self.entries.insert(key, Entry::new(value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (usize, usize) {
        self.stats.get()
    }

    fn evict(&mut self) {
        if self.small.len() >= self.small_capacity || self.main.is_empty() {
            self.evict_s();
        } else {
            self.evict_m();
        }
    }

    fn evict_s(&mut self) {
        while let Some(key) = self.small.pop_front() {
            let Some(entry) = self.entries.get(&key) else {
                continue;
            };
            if entry.freq() > 1 {
                entry.freq.store(0, Ordering::Relaxed);
                self.main.push_back(key);
            } else {
                self.drop_entry(&key);
                self.insert_g(key);
                return;
            }
        }
    }

    fn evict_m(&mut self) {
        while let Some(key) = self.main.pop_front() {
            let Some(entry) = self.entries.get(&key) else {
                continue;
            };
            let freq = entry.freq();
            if freq > 0 {
                entry.freq.store(freq - 1, Ordering::Relaxed);
                self.main.push_back(key);
            } else {
                self.drop_entry(&key);
                return;
            }
        }
    }

    fn drop_entry(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            if let Some(evicted_fn) = &self.evicted_fn {
                evicted_fn(key.clone(), entry.value);
            }
        }
    }

    fn insert_g(&mut self, key: K) {
        self.ghost_seq += 1;
        self.ghost_index.insert(key.clone(), self.ghost_seq);
        self.ghost.push_back((key, self.ghost_seq));

        while self.ghost.len() > self.capacity {
            if let Some((key, seq)) = self.ghost.pop_front() {
                if self.ghost_index.get(&key) == Some(&seq) {
                    self.ghost_index.remove(&key);
                }
            }
        }
    }
}

struct Stats {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Stats {
    fn new() -> Self {
        Stats {
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
