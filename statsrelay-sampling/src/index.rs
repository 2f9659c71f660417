//! A string-keyed hash table with separate chaining.
//!
//! [`MetricIndex`] maps metric names to per-metric state. It keeps a table of buckets whose
//! length is always a power of two, and each bucket holds a singly linked chain of entries in
//! insertion order. The table doubles whenever an insert would push the number of keys over
//! three quarters of the table length. It never shrinks.
//!
//! Chaining keeps deletion free of tombstones: removing a key unlinks its node from the chain and
//! the table is otherwise untouched.

use std::hash::BuildHasher;
use std::iter::FusedIterator;
use std::ops::ControlFlow;

use ahash::RandomState;

/// Table length used when no minimum capacity is requested.
pub const DEFAULT_CAPACITY: usize = 128;

/// Fixed hash seeds, so that a key always lands in the same bucket within a process.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

type Link<V> = Option<Box<Entry<V>>>;

struct Entry<V> {
    key: Box<str>,
    value: V,
    next: Link<V>,
}

/// Number of keys a table of the given length holds before it doubles.
fn max_load_for(capacity: usize) -> usize {
    capacity * 3 / 4
}

fn empty_table<V>(capacity: usize) -> Box<[Link<V>]> {
    std::iter::repeat_with(|| None).take(capacity).collect()
}

/// Appends an entry to the tail of its bucket chain without comparing keys.
///
/// Only used when the key is known to be absent, i.e. while rebuilding a table.
fn append<V>(table: &mut [Link<V>], hasher: &RandomState, mut entry: Box<Entry<V>>) {
    entry.next = None;

    let bucket = bucket_index(hasher, &entry.key, table.len());
    let mut link = &mut table[bucket];
    while let Some(existing) = link {
        link = &mut existing.next;
    }
    *link = Some(entry);
}

fn bucket_index(hasher: &RandomState, key: &str, capacity: usize) -> usize {
    // The capacity is a power of two, so masking the low bits equals the modulo.
    (BuildHasher::hash_one(hasher, key) & (capacity as u64 - 1)) as usize
}

/// A string-keyed hash table with chained buckets and doubling growth.
///
/// Keys are copied into the index on insertion. Values are owned by the index and dropped
/// together with their key when they are removed, filtered out or when the index is dropped.
///
/// The index performs no internal locking. It is meant to have a single owner that serializes all
/// access.
///
/// # Example
///
/// ```
/// use statsrelay_sampling::MetricIndex;
///
/// let mut index = MetricIndex::with_capacity(100);
/// assert_eq!(index.capacity(), 128);
///
/// assert_eq!(index.insert("api.requests", 1), None);
/// assert_eq!(index.insert("api.requests", 2), Some(1));
/// assert_eq!(index.get("api.requests"), Some(&2));
/// assert_eq!(index.len(), 1);
/// ```
pub struct MetricIndex<V> {
    table: Box<[Link<V>]>,
    count: usize,
    max_load: usize,
    hasher: RandomState,
}

impl<V> MetricIndex<V> {
    /// Creates an empty index with [`DEFAULT_CAPACITY`] buckets.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty index with at least `min_capacity` buckets.
    ///
    /// The capacity is rounded up to the next power of two. A capacity of `0` selects
    /// [`DEFAULT_CAPACITY`].
    pub fn with_capacity(min_capacity: usize) -> Self {
        let capacity = match min_capacity {
            0 => DEFAULT_CAPACITY,
            n => n.next_power_of_two(),
        };

        Self {
            table: empty_table(capacity),
            count: 0,
            max_load: max_load_for(capacity),
            hasher: RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]),
        }
    }

    /// Returns the number of keys in the index.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if the index contains no keys.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the number of buckets in the table.
    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Returns the number of keys at which the next insert doubles the table.
    pub fn max_load(&self) -> usize {
        self.max_load
    }

    fn bucket_of(&self, key: &str) -> usize {
        bucket_index(&self.hasher, key, self.table.len())
    }

    /// Returns a reference to the value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&V> {
        let mut link = &self.table[self.bucket_of(key)];
        while let Some(entry) = link {
            if *entry.key == *key {
                return Some(&entry.value);
            }
            link = &entry.next;
        }
        None
    }

    /// Returns a mutable reference to the value stored for `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let bucket = self.bucket_of(key);
        let mut link = self.table[bucket].as_deref_mut();
        while let Some(entry) = link {
            if *entry.key == *key {
                return Some(&mut entry.value);
            }
            link = entry.next.as_deref_mut();
        }
        None
    }

    /// Returns `true` if the index contains `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a value for `key`.
    ///
    /// If the key was not present, a copy of it is stored and `None` is returned. Otherwise the
    /// value is replaced in place and the previous value is returned.
    ///
    /// Before every insert, the table doubles if one more key would exceed the maximum load.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        while self.count + 1 > self.max_load {
            self.grow();
        }

        let bucket = self.bucket_of(key);
        let mut link = &mut self.table[bucket];
        while let Some(entry) = link {
            if *entry.key == *key {
                return Some(std::mem::replace(&mut entry.value, value));
            }
            link = &mut entry.next;
        }

        *link = Some(Box::new(Entry {
            key: key.into(),
            value,
            next: None,
        }));
        self.count += 1;
        None
    }

    /// Removes `key` from the index and returns its value.
    ///
    /// Returns `None` if the key was not present.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let bucket = self.bucket_of(key);
        let mut link = &mut self.table[bucket];
        while link.as_ref().is_some_and(|entry| *entry.key != *key) {
            link = &mut link.as_mut()?.next;
        }

        let mut removed = link.take()?;
        *link = removed.next.take();
        self.count -= 1;
        Some(removed.value)
    }

    /// Removes all keys and values, keeping the table capacity.
    pub fn clear(&mut self) {
        for head in self.table.iter_mut() {
            let mut link = head.take();
            while let Some(mut entry) = link {
                link = entry.next.take();
            }
        }
        self.count = 0;
    }

    /// Calls `f` for every entry until it returns [`ControlFlow::Break`].
    ///
    /// Entries are visited in bucket order, then chain order. Returns `true` if the iteration was
    /// stopped early.
    pub fn for_each<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&str, &V) -> ControlFlow<()>,
    {
        self.iter().any(|(key, value)| f(key, value).is_break())
    }

    /// Retains only the entries for which `f` returns `true`.
    ///
    /// The table is rebuilt with the same capacity from the retained entries. Removed entries are
    /// dropped once `f` has seen them, so `f` may move resources out of the value before returning
    /// `false`.
    pub fn filter<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, &mut V) -> bool,
    {
        let capacity = self.table.len();
        let old = std::mem::replace(&mut self.table, empty_table(capacity));

        for head in old.into_vec() {
            let mut link = head;
            while let Some(mut entry) = link {
                link = entry.next.take();

                if f(&*entry.key, &mut entry.value) {
                    append(&mut self.table, &self.hasher, entry);
                } else {
                    self.count -= 1;
                }
            }
        }
    }

    /// Returns an iterator over all entries in bucket order, then chain order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            buckets: self.table.iter(),
            chain: None,
            remaining: self.count,
        }
    }

    /// Returns an iterator over all entries that allows modifying the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut {
            buckets: self.table.iter_mut(),
            chain: None,
            remaining: self.count,
        }
    }

    /// Doubles the table and rehashes every entry into it.
    fn grow(&mut self) {
        let capacity = self.table.len() * 2;
        let old = std::mem::replace(&mut self.table, empty_table(capacity));

        for head in old.into_vec() {
            let mut link = head;
            while let Some(mut entry) = link {
                link = entry.next.take();
                append(&mut self.table, &self.hasher, entry);
            }
        }

        self.max_load = max_load_for(capacity);
    }
}

impl<V> Default for MetricIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for MetricIndex<V> {
    fn drop(&mut self) {
        // Unlink chains iteratively, dropping nested boxes recursively could exhaust the stack.
        self.clear();
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for MetricIndex<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, V> IntoIterator for &'a MetricIndex<V> {
    type Item = (&'a str, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, V> IntoIterator for &'a mut MetricIndex<V> {
    type Item = (&'a str, &'a mut V);
    type IntoIter = IterMut<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Iterator over the entries of a [`MetricIndex`].
pub struct Iter<'a, V> {
    buckets: std::slice::Iter<'a, Link<V>>,
    chain: Option<&'a Entry<V>>,
    remaining: usize,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.chain.take() {
                self.chain = entry.next.as_deref();
                self.remaining -= 1;
                return Some((&*entry.key, &entry.value));
            }
            self.chain = self.buckets.next()?.as_deref();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

impl<V> FusedIterator for Iter<'_, V> {}

/// Mutable iterator over the entries of a [`MetricIndex`].
pub struct IterMut<'a, V> {
    buckets: std::slice::IterMut<'a, Link<V>>,
    chain: Option<&'a mut Entry<V>>,
    remaining: usize,
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = (&'a str, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.chain.take() {
                let Entry { key, value, next } = entry;
                self.chain = next.as_deref_mut();
                self.remaining -= 1;
                return Some((&**key, value));
            }
            self.chain = self.buckets.next()?.as_deref_mut();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<V> ExactSizeIterator for IterMut<'_, V> {}

impl<V> FusedIterator for IterMut<'_, V> {}
