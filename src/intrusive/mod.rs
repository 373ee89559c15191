//! The intrusive separately-chained keyed table.
//!
//! [`IntrusiveChainedHash`] threads its per-bucket chains *through the
//! values*: each value embeds a [`Link`], and the table reads and writes that
//! link through a [`ChainAdapter`]. No per-entry node allocations exist -
//! a bucket is nothing but a head pointer, and membership costs one `Arc<V>`
//! plus the link the value already carries.
//!
//! Writers are serialised by a mutex. Readers walk bucket heads and links
//! without locking; both are `ArcSwapOption` cells, so every pointer a
//! reader follows was published with release semantics and the value behind
//! it is fully visible. The size counter is atomic and can be read at any
//! time. Unlike the open-addressed table, a rehash here rethreads the live
//! values' own links, so iteration or gets that race a rehash may miss
//! entries; gets racing ordinary adds and removes are safe.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use tracing::trace;

#[cfg(feature = "serde")]
use serde::ser::SerializeSeq;
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

use crate::adapter::KeyAdapter;
use crate::error::KeyError;

mod iter;

pub use iter::{Entries, Iter, Keys};

/// Default pre-rehash capacity, as for the open-addressed family.
const DEFAULT_INITIAL_CAPACITY: usize = 11;

/// Default load factor: buckets are sized to half the capacity threshold.
const DEFAULT_LOAD_FACTOR: f64 = 0.5;

/// The "next" slot a value must embed to live in an
/// [`IntrusiveChainedHash`].
///
/// The table is the only writer of the link; values should treat it as
/// opaque. A value can belong to at most one chain at a time.
pub struct Link<V> {
    next: ArcSwapOption<V>,
}

impl<V> Link<V> {
    /// Creates an unlinked slot.
    pub fn new() -> Self {
        Link {
            next: ArcSwapOption::empty(),
        }
    }

    fn get(&self) -> Option<Arc<V>> {
        self.next.load_full()
    }

    fn set(&self, next: Option<Arc<V>>) {
        self.next.store(next);
    }
}

impl<V> Default for Link<V> {
    fn default() -> Self {
        Link::new()
    }
}

impl<V> fmt::Debug for Link<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Link")
    }
}

/// Grants the table access to the [`Link`] embedded in a value.
pub trait ChainAdapter<V> {
    /// Returns the value's embedded link.
    fn link<'a>(&self, value: &'a V) -> &'a Link<V>;
}

/// The swappable bucket-head array.
pub(super) struct Buckets<V> {
    pub(super) heads: Box<[ArcSwapOption<V>]>,
}

impl<V> Buckets<V> {
    fn new(count: usize) -> Self {
        let heads: Vec<_> = (0..count).map(|_| ArcSwapOption::empty()).collect();
        Buckets {
            heads: heads.into_boxed_slice(),
        }
    }
}

/// A keyed hashed collection whose chains live inside the values.
///
/// # Examples
///
/// ```
/// use keyed_hash::adapter::IntKey;
/// use keyed_hash::{ChainAdapter, IntrusiveChainedHash, Link};
/// use std::sync::Arc;
///
/// struct Node {
///     id: i32,
///     link: Link<Node>,
/// }
///
/// struct NodeChain;
///
/// impl ChainAdapter<Node> for NodeChain {
///     fn link<'a>(&self, value: &'a Node) -> &'a Link<Node> {
///         &value.link
///     }
/// }
///
/// let table = IntrusiveChainedHash::new(IntKey::new(|n: &Node| n.id), NodeChain);
/// table.add(Arc::new(Node { id: 3, link: Link::new() }));
/// assert_eq!(table.get(&3).unwrap().id, 3);
/// ```
pub struct IntrusiveChainedHash<V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    buckets: ArcSwap<Buckets<V>>,
    write: Mutex<()>,
    size: AtomicUsize,
    /// Size threshold above which the bucket array doubles.
    capacity: AtomicUsize,
    load_factor: f64,
    rehash_enabled: bool,
    adapter: A,
    chain: C,
}

impl<V, A, C> IntrusiveChainedHash<V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    /// Creates a table with the default capacity and load factor.
    pub fn new(adapter: A, chain: C) -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY, adapter, chain)
    }

    /// Creates a table that can hold `initial_capacity` values before its
    /// first rehash.
    pub fn with_capacity(initial_capacity: usize, adapter: A, chain: C) -> Self {
        Self::with_options(initial_capacity, DEFAULT_LOAD_FACTOR, true, adapter, chain)
    }

    /// Creates a table with every knob exposed: pre-rehash capacity, load
    /// factor, and whether the bucket array may grow at all.
    ///
    /// Panics unless `0.0 < load_factor < 1.0`.
    pub fn with_options(
        initial_capacity: usize,
        load_factor: f64,
        rehash_enabled: bool,
        adapter: A,
        chain: C,
    ) -> Self {
        assert!(
            load_factor > 0.0 && load_factor < 1.0,
            "load factor must lie in (0, 1)"
        );
        let bucket_count = std::cmp::max((initial_capacity as f64 * load_factor).ceil() as usize, 1);
        IntrusiveChainedHash {
            buckets: ArcSwap::from_pointee(Buckets::new(bucket_count)),
            write: Mutex::new(()),
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(initial_capacity),
            load_factor,
            rehash_enabled,
            adapter,
            chain,
        }
    }

    /// Returns the adapter this table derives keys with.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Number of values. Safe to call concurrently with writers.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// True if the table holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The size threshold that triggers the next growth.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Returns the value for `key`, if present. Lock-free.
    pub fn get(&self, key: &A::Key) -> Option<Arc<V>> {
        let buckets = self.buckets.load();
        let b = bucket_of(mask(self.adapter.hash_key(key)), buckets.heads.len());
        let mut cursor = buckets.heads[b].load_full();
        while let Some(value) = cursor {
            if self.adapter.eq_key(key, &value) {
                return Some(value);
            }
            cursor = self.chain.link(&value).get();
        }
        None
    }

    /// True if a value with this derived key is present.
    pub fn contains_key(&self, key: &A::Key) -> bool {
        self.get(key).is_some()
    }

    /// Adds `value` under its own derived key, splicing it in place of (and
    /// returning) any value already carrying an equal key.
    pub fn add(&self, value: Arc<V>) -> Option<Arc<V>> {
        let _guard = self.write.lock();
        self.internal_add(value, true)
    }

    /// Adds `value` unless its key is already present; on a hit the chain is
    /// untouched and the existing value is returned.
    pub fn add_if_absent(&self, value: Arc<V>) -> Option<Arc<V>> {
        let _guard = self.write.lock();
        self.internal_add(value, false)
    }

    /// Key-checked [`add`](Self::add), in map style.
    pub fn put(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        if !self.adapter.eq_key(key, &value) {
            return Err(KeyError::Inconsistent);
        }
        Ok(self.add(value))
    }

    /// Key-checked [`add_if_absent`](Self::add_if_absent), in map style.
    pub fn put_if_absent(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        if !self.adapter.eq_key(key, &value) {
            return Err(KeyError::Inconsistent);
        }
        Ok(self.add_if_absent(value))
    }

    /// Returns the value for `key`, manufacturing, verifying and appending a
    /// factory-made one on a miss.
    ///
    /// The factory runs inside the write lock and must not call back into
    /// this table. Fails with [`KeyError::FactoryMismatch`] if its value does
    /// not carry the requested key.
    pub fn get_or_insert_with<F>(&self, key: A::Key, factory: F) -> Result<Arc<V>, KeyError>
    where
        F: FnOnce(&A::Key) -> Arc<V>,
    {
        let _guard = self.write.lock();
        let buckets = self.buckets.load_full();
        let b = bucket_of(mask(self.adapter.hash_key(&key)), buckets.heads.len());

        let mut tail = None;
        let mut cursor = buckets.heads[b].load_full();
        while let Some(value) = cursor {
            if self.adapter.eq_key(&key, &value) {
                return Ok(value);
            }
            cursor = self.chain.link(&value).get();
            tail = Some(value);
        }

        let value = factory(&key);
        if !self.adapter.eq_key(&key, &value) {
            return Err(KeyError::FactoryMismatch);
        }
        self.chain.link(&value).set(None);
        match &tail {
            None => buckets.heads[b].store(Some(Arc::clone(&value))),
            Some(tail) => self.chain.link(tail).set(Some(Arc::clone(&value))),
        }
        self.bump_size();
        Ok(value)
    }

    /// Removes and returns the value with this derived key, unlinking it
    /// from its chain.
    pub fn remove_key(&self, key: &A::Key) -> Option<Arc<V>> {
        let _guard = self.write.lock();
        let buckets = self.buckets.load_full();
        let b = bucket_of(mask(self.adapter.hash_key(key)), buckets.heads.len());

        let mut prev: Option<Arc<V>> = None;
        let mut cursor = buckets.heads[b].load_full();
        while let Some(value) = cursor {
            if self.adapter.eq_key(key, &value) {
                let next = self.chain.link(&value).get();
                match &prev {
                    None => buckets.heads[b].store(next),
                    Some(prev) => self.chain.link(prev).set(next),
                }
                // clear the removed node's link so it does not retain its
                // old successor
                self.chain.link(&value).set(None);
                self.size.fetch_sub(1, Ordering::Relaxed);
                return Some(value);
            }
            cursor = self.chain.link(&value).get();
            prev = Some(value);
        }
        None
    }

    /// Removes the value carrying `value`'s own key. Returns whether a value
    /// was removed.
    pub fn remove_value(&self, value: &V) -> bool {
        self.remove_key(&self.adapter.key_of(value)).is_some()
    }

    /// Unlinks every value. Ends with an empty table or panics if the chain
    /// walk and the size counter disagree.
    pub fn clear(&self) {
        let _guard = self.write.lock();
        let buckets = self.buckets.load_full();
        trace!(buckets = buckets.heads.len(), "clear");
        for head in buckets.heads.iter() {
            let mut cursor = head.swap(None);
            while let Some(value) = cursor {
                cursor = self.chain.link(&value).get();
                self.chain.link(&value).set(None);
                self.size.fetch_sub(1, Ordering::Relaxed);
            }
        }
        let size = self.size.load(Ordering::Relaxed);
        if size != 0 {
            panic!("hash size inconsistent: after clear(), size = {}", size);
        }
    }

    /// A no-op: the chained layout has no tombstones to purge and never
    /// shrinks. Present so generic call sites can trim either table family.
    pub fn compact(&self) {}

    /// Alias of [`compact`](Self::compact); also a no-op.
    pub fn trim_to_size(&self) {
        self.compact()
    }

    /// Iterates over the values of a bucket-array snapshot, chain by chain.
    pub fn iter(&self) -> Iter<'_, V, A, C> {
        Iter::new(self)
    }

    /// Iterates over the derived keys of a snapshot.
    pub fn keys(&self) -> Keys<'_, V, A, C> {
        Keys::new(self)
    }

    /// Iterates over `(key, value)` pairs of a snapshot.
    pub fn entries(&self) -> Entries<'_, V, A, C> {
        Entries::new(self)
    }

    /// Map hash code over the live entries, as for
    /// [`KeyedHashMap::map_hash`](crate::KeyedHashMap::map_hash).
    pub fn map_hash<H>(&self, build_hasher: &H) -> u64
    where
        H: std::hash::BuildHasher,
        V: std::hash::Hash,
    {
        self.entries()
            .map(|(k, v)| u64::from(self.adapter.hash_key(&k)) ^ build_hasher.hash_one(&*v))
            .fold(0u64, u64::wrapping_add)
    }

    /// Set hash code over the live values.
    pub fn set_hash<H>(&self, build_hasher: &H) -> u64
    where
        H: std::hash::BuildHasher,
        V: std::hash::Hash,
    {
        self.iter()
            .map(|v| build_hasher.hash_one(&*v))
            .fold(0u64, u64::wrapping_add)
    }

    pub(super) fn snapshot(&self) -> Arc<Buckets<V>> {
        self.buckets.load_full()
    }

    pub(super) fn chain_adapter(&self) -> &C {
        &self.chain
    }

    /// Chain walk shared by `add` and `add_if_absent`. Requires the write
    /// lock.
    fn internal_add(&self, value: Arc<V>, replace: bool) -> Option<Arc<V>> {
        let buckets = self.buckets.load_full();
        let key = self.adapter.key_of(&value);
        let b = bucket_of(mask(self.adapter.hash_key(&key)), buckets.heads.len());

        let mut displaced = None;
        let mut prev: Option<Arc<V>> = None;
        let mut cursor = buckets.heads[b].load_full();
        if cursor.is_none() {
            self.chain.link(&value).set(None);
            buckets.heads[b].store(Some(value));
        } else {
            while let Some(candidate) = cursor {
                if self.adapter.eq_key(&key, &candidate) {
                    if replace {
                        // splice the new value into the old one's position:
                        // it inherits the successor, the old value drops out
                        // of the chain with its link cleared
                        self.chain.link(&value).set(self.chain.link(&candidate).get());
                        self.chain.link(&candidate).set(None);
                        match &prev {
                            None => buckets.heads[b].store(Some(value)),
                            Some(prev) => self.chain.link(prev).set(Some(value)),
                        }
                    }
                    displaced = Some(candidate);
                    break;
                }
                let next = self.chain.link(&candidate).get();
                match next {
                    None => {
                        // end of chain: append
                        self.chain.link(&value).set(None);
                        self.chain.link(&candidate).set(Some(value));
                        break;
                    }
                    Some(next) => {
                        prev = Some(candidate);
                        cursor = Some(next);
                    }
                }
            }
        }

        if displaced.is_none() {
            self.bump_size();
        }
        displaced
    }

    /// Size increment plus the grow check. Requires the write lock.
    fn bump_size(&self) {
        let size = self.size.fetch_add(1, Ordering::Relaxed) + 1;
        if size > self.capacity.load(Ordering::Relaxed) && self.rehash_enabled {
            self.grow();
        }
    }

    /// Doubles the bucket array and rethreads every chain, prepending into
    /// the new buckets (which reverses per-bucket order; iteration order is
    /// unspecified). Requires the write lock.
    fn grow(&self) {
        let old = self.buckets.load_full();
        let new_count = old.heads.len() * 2;
        let grown = Buckets::new(new_count);
        self.capacity
            .store((new_count as f64 / self.load_factor) as usize, Ordering::Relaxed);

        for head in old.heads.iter() {
            let mut cursor = head.load_full();
            while let Some(value) = cursor {
                cursor = self.chain.link(&value).get();
                let b = bucket_of(
                    mask(self.adapter.hash_key(&self.adapter.key_of(&value))),
                    new_count,
                );
                self.chain.link(&value).set(grown.heads[b].load_full());
                grown.heads[b].store(Some(value));
            }
        }
        self.buckets.store(Arc::new(grown));
        trace!(buckets = new_count, "rehash");
    }
}

impl<'a, V, A, C> IntoIterator for &'a IntrusiveChainedHash<V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    type Item = Arc<V>;
    type IntoIter = Iter<'a, V, A, C>;

    fn into_iter(self) -> Iter<'a, V, A, C> {
        self.iter()
    }
}

/// Two intrusive tables are equal when they contain the same mappings.
impl<V, A, C> PartialEq for IntrusiveChainedHash<V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries()
                .all(|(k, v)| other.get(&k).map_or(false, |w| *w == *v))
    }
}

/// An intrusive table equals a std `HashMap` holding the same mappings.
impl<V, A, C, S> PartialEq<std::collections::HashMap<A::Key, Arc<V>, S>>
    for IntrusiveChainedHash<V, A, C>
where
    A: KeyAdapter<V>,
    A::Key: std::hash::Hash + Eq,
    C: ChainAdapter<V>,
    V: PartialEq,
    S: std::hash::BuildHasher,
{
    fn eq(&self, other: &std::collections::HashMap<A::Key, Arc<V>, S>) -> bool {
        self.len() == other.len()
            && self
                .entries()
                .all(|(k, v)| other.get(&k).map_or(false, |w| **w == *v))
    }
}

#[cfg(feature = "serde")]
impl<V, A, C> Serialize for IntrusiveChainedHash<V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
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

#[inline]
fn mask(hash: u32) -> usize {
    (hash & 0x7FFF_FFFF) as usize
}

#[inline]
fn bucket_of(masked_hash: usize, bucket_count: usize) -> usize {
    masked_hash % bucket_count
}
