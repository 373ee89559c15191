//! The set view of the open-addressed table.

use std::collections::HashSet;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::ser::SerializeSeq;
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

use crate::adapter::KeyAdapter;
use crate::error::KeyError;

use super::{KeyedHash, Keys, Values};

/// A concurrently readable set of values with derived-key identity.
///
/// Membership is decided by each value's derived key, so the set doubles as
/// an index: [`get`](Self::get) finds the member carrying a key without
/// needing the member itself.
pub struct KeyedHashSet<V, A: KeyAdapter<V>> {
    inner: KeyedHash<V, A>,
}

impl<V, A: KeyAdapter<V>> KeyedHashSet<V, A> {
    /// Creates a set with the default capacity and load factor.
    pub fn new(adapter: A) -> Self {
        KeyedHashSet {
            inner: KeyedHash::new(adapter),
        }
    }

    /// Creates a set that can hold `initial_capacity` values before its
    /// first rehash.
    pub fn with_capacity(initial_capacity: usize, adapter: A) -> Self {
        KeyedHashSet {
            inner: KeyedHash::with_capacity(initial_capacity, adapter),
        }
    }

    /// Creates a set with the given pre-rehash capacity and load factor.
    pub fn with_capacity_and_load_factor(
        initial_capacity: usize,
        load_factor: f64,
        adapter: A,
    ) -> Self {
        KeyedHashSet {
            inner: KeyedHash::with_capacity_and_load_factor(initial_capacity, load_factor, adapter),
        }
    }

    /// The underlying keyed table.
    pub fn as_hash(&self) -> &KeyedHash<V, A> {
        &self.inner
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if the set holds no members.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Current physical capacity.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Returns the member carrying `key`. Lock-free.
    pub fn get(&self, key: &A::Key) -> Option<Arc<V>> {
        self.inner.get(key)
    }

    /// True if a member carries `key`.
    pub fn contains_key(&self, key: &A::Key) -> bool {
        self.inner.contains_key(key)
    }

    /// True if the member carrying `value`'s key compares equal to `value`.
    pub fn contains(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.inner
            .get(&self.inner.adapter().key_of(value))
            .map_or(false, |member| *member == *value)
    }

    /// Adds a value, displacing any member with an equal key. Returns true
    /// if the key was absent.
    pub fn add(&self, value: Arc<V>) -> bool {
        self.inner.add(value)
    }

    /// Adds every value. Returns true if any key was absent.
    pub fn add_all<I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = Arc<V>>,
    {
        self.inner.add_all(values)
    }

    /// Returns the member carrying `key`, inserting a factory-made one on a
    /// miss. See [`KeyedHash::get_or_insert_with`].
    pub fn get_or_insert_with<F>(&self, key: A::Key, factory: F) -> Result<Arc<V>, KeyError>
    where
        F: FnOnce(&A::Key) -> Arc<V>,
    {
        self.inner.get_or_insert_with(key, factory)
    }

    /// Removes the member carrying `value`'s key. Returns whether a member
    /// was removed.
    pub fn remove(&self, value: &V) -> bool {
        self.inner.remove_value(value)
    }

    /// Removes and returns the member carrying `key`.
    pub fn remove_key(&self, key: &A::Key) -> Option<Arc<V>> {
        self.inner.remove_key(key)
    }

    /// Removes the members carrying each value's key. Returns true if the
    /// set changed.
    pub fn remove_all<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        self.inner.remove_all(values)
    }

    /// Keeps only members equal to some element of `keep`; compacts when
    /// anything was dropped. Returns true if the set changed.
    pub fn retain_all(&self, keep: &[Arc<V>]) -> bool
    where
        V: PartialEq,
    {
        self.inner.retain_all(keep)
    }

    /// Drops every member.
    pub fn clear(&self) {
        self.inner.clear()
    }

    /// Pre-sizes for `additional` further members.
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

    /// Iterates over the members of a snapshot.
    pub fn iter(&self) -> Values<'_, V, A> {
        self.inner.iter()
    }

    /// Iterates over the derived keys of a snapshot.
    pub fn keys(&self) -> Keys<'_, V, A> {
        self.inner.keys()
    }

    /// Set hash code: the wrapping sum of the member hashes under
    /// `build_hasher`.
    pub fn set_hash<H>(&self, build_hasher: &H) -> u64
    where
        H: BuildHasher,
        V: Hash,
    {
        self.iter()
            .map(|v| build_hasher.hash_one(&*v))
            .fold(0u64, u64::wrapping_add)
    }
}

impl<'a, V, A: KeyAdapter<V>> IntoIterator for &'a KeyedHashSet<V, A> {
    type Item = Arc<V>;
    type IntoIter = Values<'a, V, A>;

    fn into_iter(self) -> Values<'a, V, A> {
        self.iter()
    }
}

/// Two keyed sets are equal when they have the same size and each member of
/// one is contained in the other.
impl<V, A> PartialEq for KeyedHashSet<V, A>
where
    A: KeyAdapter<V>,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|v| other.contains(&v))
    }
}

/// A keyed set equals a std `HashSet` with the same members.
impl<V, A, S> PartialEq<HashSet<Arc<V>, S>> for KeyedHashSet<V, A>
where
    A: KeyAdapter<V>,
    V: Hash + Eq,
    S: BuildHasher,
{
    fn eq(&self, other: &HashSet<Arc<V>, S>) -> bool {
        self.len() == other.len() && self.iter().all(|v| other.contains(&*v))
    }
}

#[cfg(feature = "serde")]
impl<V, A> Serialize for KeyedHashSet<V, A>
where
    A: KeyAdapter<V>,
    V: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_seq(Some(self.len()))?;
        for value in self.iter() {
            state.serialize_element(&*value)?;
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::HashedKey;

    #[derive(Debug, Hash, PartialEq, Eq)]
    struct Obj {
        id: String,
    }

    fn obj(id: &str) -> Arc<Obj> {
        Arc::new(Obj { id: id.to_string() })
    }

    type ObjSet = KeyedHashSet<Obj, HashedKey<String, fn(&Obj) -> String>>;

    fn set() -> ObjSet {
        let f: fn(&Obj) -> String = |o| o.id.clone();
        KeyedHashSet::with_capacity(4, HashedKey::new(f))
    }

    #[test]
    fn test_add_contains_remove() {
        let s = set();
        let a = obj("A");
        assert!(s.add(Arc::clone(&a)));
        assert!(!s.add(obj("A")));
        assert_eq!(s.len(), 1);
        assert!(s.contains(&Obj { id: "A".into() }));
        assert!(s.remove(&Obj { id: "A".into() }));
        assert!(!s.remove(&Obj { id: "A".into() }));
        assert!(s.is_empty());
    }

    #[test]
    fn test_set_equality_with_std() {
        let s = set();
        let mut reference = HashSet::new();
        for id in ["A", "B", "C"] {
            let v = obj(id);
            s.add(Arc::clone(&v));
            reference.insert(v);
        }
        assert!(s == reference);
        reference.remove(&Obj { id: "B".into() });
        assert!(s != reference);
    }

    #[test]
    fn test_set_equality_between_keyed_sets() {
        let a = set();
        let b = set();
        for id in ["A", "B", "C"] {
            a.add(obj(id));
            b.add(obj(id));
        }
        assert!(a == b);
        b.remove(&Obj { id: "C".into() });
        assert!(a != b);
    }
}
