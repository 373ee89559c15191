//! The map view of the open-addressed table.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::ser::SerializeMap;
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

use crate::adapter::KeyAdapter;
use crate::error::KeyError;

use super::{Entries, KeyedHash, Keys, Values};

/// A concurrently readable map from derived key to value.
///
/// This is the map-flavoured face of [`KeyedHash`]: the same storage, with
/// map naming and map equality. Since the key of every entry is derived from
/// the value, an entry costs a single `Arc<V>` slot; there is no separate key
/// storage.
///
/// # Examples
///
/// ```
/// use keyed_hash::adapter::LongKey;
/// use keyed_hash::KeyedHashMap;
/// use std::sync::Arc;
///
/// struct Order {
///     id: i64,
///     total: u32,
/// }
///
/// let orders = KeyedHashMap::new(LongKey::new(|o: &Order| o.id));
/// orders.put(&7, Arc::new(Order { id: 7, total: 250 })).unwrap();
/// assert_eq!(orders.get(&7).unwrap().total, 250);
/// assert!(orders.put(&8, Arc::new(Order { id: 9, total: 0 })).is_err());
/// ```
pub struct KeyedHashMap<V, A: KeyAdapter<V>> {
    inner: KeyedHash<V, A>,
}

impl<V, A: KeyAdapter<V>> KeyedHashMap<V, A> {
    /// Creates a map with the default capacity and load factor.
    pub fn new(adapter: A) -> Self {
        KeyedHashMap {
            inner: KeyedHash::new(adapter),
        }
    }

    /// Creates a map that can hold `initial_capacity` entries before its
    /// first rehash.
    pub fn with_capacity(initial_capacity: usize, adapter: A) -> Self {
        KeyedHashMap {
            inner: KeyedHash::with_capacity(initial_capacity, adapter),
        }
    }

    /// Creates a map with the given pre-rehash capacity and load factor.
    pub fn with_capacity_and_load_factor(
        initial_capacity: usize,
        load_factor: f64,
        adapter: A,
    ) -> Self {
        KeyedHashMap {
            inner: KeyedHash::with_capacity_and_load_factor(initial_capacity, load_factor, adapter),
        }
    }

    /// The underlying keyed table.
    pub fn as_hash(&self) -> &KeyedHash<V, A> {
        &self.inner
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Current physical capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns the value mapped to `key`. Lock-free.
    pub fn get(&self, key: &A::Key) -> Option<Arc<V>> {
        self.inner.get(key)
    }

    /// True if `key` has a mapping.
    pub fn contains_key(&self, key: &A::Key) -> bool {
        self.inner.contains_key(key)
    }

    /// True if some entry's value compares equal to `value`. O(capacity).
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.inner.contains_value(value)
    }

    /// Maps `key` to `value`, returning the replaced value if the key was
    /// present.
    pub fn put(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        self.inner.put(key, value)
    }

    /// Maps `key` to `value` unless present; returns the existing value if
    /// one was there.
    pub fn put_if_absent(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        self.inner.put_if_absent(key, value)
    }

    /// Replaces the mapping for `key` only if present.
    pub fn replace(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        self.inner.replace(key, value)
    }

    /// Replaces the mapping for `key` only if its current value compares
    /// equal to `expected`.
    pub fn replace_exact(&self, key: &A::Key, expected: &V, value: Arc<V>) -> Result<bool, KeyError>
    where
        V: PartialEq,
    {
        self.inner.replace_exact(key, expected, value)
    }

    /// Returns the value for `key`, inserting a factory-made one on a miss.
    /// See [`KeyedHash::get_or_insert_with`].
    pub fn get_or_insert_with<F>(&self, key: A::Key, factory: F) -> Result<Arc<V>, KeyError>
    where
        F: FnOnce(&A::Key) -> Arc<V>,
    {
        self.inner.get_or_insert_with(key, factory)
    }

    /// Inserts every pair with [`put`](Self::put) semantics.
    pub fn put_all<I>(&self, entries: I) -> Result<(), KeyError>
    where
        I: IntoIterator<Item = (A::Key, Arc<V>)>,
    {
        self.inner.put_all(entries)
    }

    /// Removes and returns the mapping for `key`.
    pub fn remove(&self, key: &A::Key) -> Option<Arc<V>> {
        self.inner.remove_key(key)
    }

    /// Removes the mapping for `key` only if its value compares equal to
    /// `expected`.
    pub fn remove_exact(&self, key: &A::Key, expected: &V) -> bool
    where
        V: PartialEq,
    {
        self.inner.remove_exact(key, expected)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.inner.clear()
    }

    /// Pre-sizes for `additional` further entries.
    pub fn ensure_capacity(&self, additional: usize) {
        self.inner.ensure_capacity(additional)
    }

    /// Shrinks to the smallest admissible capacity and purges tombstones.
    pub fn compact(&self) {
        self.inner.compact()
    }

    /// Alias of [`compact`](Self::compact).
    pub fn trim_to_size(&self) {
        self.inner.trim_to_size()
    }

    /// Indexed access over a cached membership snapshot; see
    /// [`KeyedHash::get_by_index`].
    pub fn get_by_index(&self, index: usize) -> Option<Arc<V>> {
        self.inner.get_by_index(index)
    }

    /// Iterates over the values of a snapshot.
    pub fn values(&self) -> Values<'_, V, A> {
        self.inner.iter()
    }

    /// Iterates over the keys of a snapshot.
    pub fn keys(&self) -> Keys<'_, V, A> {
        self.inner.keys()
    }

    /// Iterates over `(key, value)` pairs of a snapshot.
    pub fn entries(&self) -> Entries<'_, V, A> {
        self.inner.entries()
    }

    /// Map hash code: the wrapping sum over entries of the key hash xor the
    /// value hash under `build_hasher`.
    pub fn map_hash<H>(&self, build_hasher: &H) -> u64
    where
        H: BuildHasher,
        V: Hash,
    {
        self.entries()
            .map(|(k, v)| {
                u64::from(self.inner.adapter().hash_key(&k)) ^ build_hasher.hash_one(&*v)
            })
            .fold(0u64, u64::wrapping_add)
    }
}

/// Two keyed maps are equal when they contain the same mappings, regardless
/// of capacity or adapter instance.
impl<V, A> PartialEq for KeyedHashMap<V, A>
where
    A: KeyAdapter<V>,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries()
                .all(|(k, v)| other.get(&k).map_or(false, |w| *w == *v))
    }
}

/// A keyed map equals a std `HashMap` holding the same mappings.
impl<V, A, S> PartialEq<HashMap<A::Key, Arc<V>, S>> for KeyedHashMap<V, A>
where
    A: KeyAdapter<V>,
    A::Key: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &HashMap<A::Key, Arc<V>, S>) -> bool {
        self.len() == other.len()
            && self
                .entries()
                .all(|(k, v)| other.get(&k).map_or(false, |w| **w == *v))
    }
}

#[cfg(feature = "serde")]
impl<V, A> Serialize for KeyedHashMap<V, A>
where
    A: KeyAdapter<V>,
    A::Key: Serialize,
    V: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.entries() {
            state.serialize_entry(&key, &*value)?;
        }
        state.end()
    }
}
