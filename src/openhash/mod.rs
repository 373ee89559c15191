//! The open-addressed keyed table - the "flat" family.
//!
//! [`KeyedHash`] stores `Arc<V>` handles in a contiguous prime-length slot
//! array and derives every key from the value through a
//! [`KeyAdapter`](crate::adapter::KeyAdapter). Lookups walk a double-hash
//! probe sequence; deletion writes a tombstone so existing probe chains are
//! never cut short.
//!
//! # Concurrency
//!
//! Writers are serialised by a single mutex. Readers take no lock at all, and
//! this is safe because of four properties working together:
//!
//! 1. The slot array is only ever replaced wholesale. A reader snapshots the
//!    array handle once and can never observe a partially rebuilt table; a
//!    rehash builds a complete fresh array off to the side and swaps it in
//!    with one atomic store.
//! 2. Within a live array, no write ever returns a slot to the empty state.
//!    A slot goes empty to live, live to live, or live to tombstone. Probe
//!    chains can therefore only lengthen, and a reader that is mid-probe when
//!    a writer lands can never have the end of its chain cut off.
//! 3. Every slot is an `ArcSwapOption`, so slot stores publish with release
//!    semantics and slot loads acquire. A reader that observes a value
//!    observes the memory that was written before the value was published.
//!    Without this fence there would be a visibility gap (a stale read), never
//!    an unterminated probe.
//! 4. At least one empty slot always exists; the table rehashes when the
//!    free count would drop to one. A probe over any snapshot therefore
//!    terminates, and a full cycle without termination is a broken-invariant
//!    panic, not a hang.
//!
//! Iteration during concurrent writes is permitted but sees an unspecified
//! mix of old and new entries, exactly like the write-path races it reflects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use tracing::trace;

use crate::adapter::KeyAdapter;
use crate::error::KeyError;
use crate::primes;

mod iter;
pub mod map;
pub mod set;

pub use iter::{Entries, Keys, Values};

/// Default initial capacity. One less than a prime so that the free-slot
/// headroom added during sizing lands back on a prime.
const DEFAULT_INITIAL_CAPACITY: usize = 10;

/// Default load factor; about as high as open addressing tolerates before
/// probe chains degrade. Cf. Knuth, Volume 3, Chapter 6.
const DEFAULT_LOAD_FACTOR: f64 = 0.5;

/// A filled slot: either a live value or the marker left behind by a removal.
pub(super) enum Slot<V> {
    /// A value once lived here; probes must keep going.
    Tombstone,
    /// A live value.
    Live(Arc<V>),
}

/// The swappable slot array. Identity of the array is what readers snapshot;
/// its cells are individually published.
pub(super) struct Storage<V> {
    pub(super) cells: Box<[ArcSwapOption<Slot<V>>]>,
    /// Shared tombstone marker, cloned into vacated cells.
    tombstone: Arc<Slot<V>>,
}

impl<V> Storage<V> {
    fn new(capacity: usize) -> Self {
        let cells: Vec<_> = (0..capacity).map(|_| ArcSwapOption::empty()).collect();
        Storage {
            cells: cells.into_boxed_slice(),
            tombstone: Arc::new(Slot::Tombstone),
        }
    }

    fn len(&self) -> usize {
        self.cells.len()
    }
}

/// Writer-side bookkeeping, guarded by the write mutex.
struct WriteState<V> {
    /// Number of empty (not tombstone) slots remaining.
    free: usize,
    /// Rehash threshold: `min(capacity - 1, floor(capacity * load_factor))`.
    max_size: usize,
    /// Cached snapshot list for [`KeyedHash::get_by_index`]; dropped by any
    /// mutation that changes membership.
    index_cache: Option<Arc<Vec<Arc<V>>>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PutMode {
    Normal,
    IfAbsent,
    Replace,
}

#[inline]
fn mask(hash: u32) -> usize {
    (hash & 0x7FFF_FFFF) as usize
}

/// Double-hash step; the capacity is prime, so every step in `1..=len-2`
/// generates the full cyclic group and the probe visits each slot once.
#[inline]
fn probe_step(hash: usize, len: usize) -> usize {
    1 + hash % (len - 2)
}

/// Probes walk downwards with modular wrap.
#[inline]
fn probe_next(index: usize, step: usize, len: usize) -> usize {
    if index >= step {
        index - step
    } else {
        index + len - step
    }
}

/// An open-addressed hashed collection of `Arc<V>` values keyed by a derived
/// key.
///
/// This is the shared core of [`KeyedHashMap`](map::KeyedHashMap) and
/// [`KeyedHashSet`](set::KeyedHashSet); it behaves as a set of values and a
/// map from derived key to value at the same time. Reads never lock; all
/// writes are serialised internally, so `&self` methods are the entire
/// surface.
///
/// # Examples
///
/// ```
/// use keyed_hash::adapter::HashedKey;
/// use keyed_hash::KeyedHash;
/// use std::sync::Arc;
///
/// struct Session {
///     user: String,
///     hits: u64,
/// }
///
/// let table = KeyedHash::new(HashedKey::new(|s: &Session| s.user.clone()));
/// let prior = table
///     .put(
///         &"ada".to_string(),
///         Arc::new(Session { user: "ada".into(), hits: 1 }),
///     )
///     .unwrap();
/// assert!(prior.is_none());
/// assert_eq!(table.get(&"ada".to_string()).unwrap().hits, 1);
/// ```
pub struct KeyedHash<V, A: KeyAdapter<V>> {
    storage: ArcSwap<Storage<V>>,
    state: Mutex<WriteState<V>>,
    size: AtomicUsize,
    load_factor: f64,
    adapter: A,
}

impl<V, A: KeyAdapter<V>> KeyedHash<V, A> {
    /// Creates a table with the default capacity and load factor.
    pub fn new(adapter: A) -> Self {
        Self::with_capacity_and_load_factor(DEFAULT_INITIAL_CAPACITY, DEFAULT_LOAD_FACTOR, adapter)
    }

    /// Creates a table that can hold `initial_capacity` values before its
    /// first rehash, with the default load factor.
    pub fn with_capacity(initial_capacity: usize, adapter: A) -> Self {
        Self::with_capacity_and_load_factor(initial_capacity, DEFAULT_LOAD_FACTOR, adapter)
    }

    /// Creates a table that can hold `initial_capacity` values before its
    /// first rehash at the given load factor.
    ///
    /// Panics unless `0.0 < load_factor < 1.0`.
    pub fn with_capacity_and_load_factor(
        initial_capacity: usize,
        load_factor: f64,
        adapter: A,
    ) -> Self {
        assert!(
            load_factor > 0.0 && load_factor < 1.0,
            "load factor must lie in (0, 1)"
        );
        let capacity = primes::next_prime((initial_capacity as f64 / load_factor).ceil() as usize);
        KeyedHash {
            storage: ArcSwap::from_pointee(Storage::new(capacity)),
            state: Mutex::new(WriteState {
                free: capacity,
                max_size: Self::max_size_for(capacity, load_factor),
                index_cache: None,
            }),
            size: AtomicUsize::new(0),
            load_factor,
            adapter,
        }
    }

    fn max_size_for(capacity: usize, load_factor: f64) -> usize {
        // at least one empty slot is required for probe termination
        std::cmp::min(capacity - 1, (capacity as f64 * load_factor).floor() as usize)
    }

    /// Returns the adapter this table derives keys with.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// True if the table holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current physical capacity of the slot array.
    pub fn capacity(&self) -> usize {
        self.storage.load().len()
    }

    /// Returns the value for `key`, if present.
    ///
    /// Lock-free: never blocks and never suspends, regardless of concurrent
    /// writers.
    ///
    /// Panics if the probe sequence cycles without terminating, which means a
    /// table invariant has been broken.
    pub fn get(&self, key: &A::Key) -> Option<Arc<V>> {
        let storage = self.storage.load();
        let len = storage.len();
        let hash = mask(self.adapter.hash_key(key));
        let step = probe_step(hash, len);
        let first = hash % len;
        let mut index = first;
        loop {
            let cell = storage.cells[index].load();
            match cell.as_deref() {
                None => return None,
                Some(Slot::Live(candidate)) if self.adapter.eq_key(key, candidate) => {
                    return Some(Arc::clone(candidate));
                }
                _ => {}
            }
            index = probe_next(index, step, len);
            if index == first {
                panic!("cycle detected in probe sequence - table invariants are broken");
            }
        }
    }

    /// True if a value with this derived key is present.
    pub fn contains_key(&self, key: &A::Key) -> bool {
        self.get(key).is_some()
    }

    /// True if some live value compares equal to `value`. O(capacity).
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        let storage = self.storage.load();
        for cell in storage.cells.iter() {
            if let Some(Slot::Live(v)) = cell.load().as_deref() {
                if **v == *value {
                    return true;
                }
            }
        }
        false
    }

    /// Inserts `value` under `key`, replacing and returning any previous
    /// value with an equal key.
    ///
    /// Fails with [`KeyError::Inconsistent`] if `key` is not the value's own
    /// derived key; the table is unchanged in that case.
    pub fn put(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        if !self.adapter.eq_key(key, &value) {
            return Err(KeyError::Inconsistent);
        }
        let mut state = self.state.lock();
        let (prev, _) = self.internal_put(&mut state, value, PutMode::Normal, no_pred());
        Ok(prev)
    }

    /// Inserts `value` under `key` only if the key is absent. Returns the
    /// existing value when one is present.
    pub fn put_if_absent(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        if !self.adapter.eq_key(key, &value) {
            return Err(KeyError::Inconsistent);
        }
        let mut state = self.state.lock();
        let (prev, _) = self.internal_put(&mut state, value, PutMode::IfAbsent, no_pred());
        Ok(prev)
    }

    /// Replaces the value under `key` only if the key is present. Returns the
    /// previous value, or `None` (and does nothing) when the key is absent.
    pub fn replace(&self, key: &A::Key, value: Arc<V>) -> Result<Option<Arc<V>>, KeyError> {
        if !self.adapter.eq_key(key, &value) {
            return Err(KeyError::Inconsistent);
        }
        let mut state = self.state.lock();
        let (prev, _) = self.internal_put(&mut state, value, PutMode::Replace, no_pred());
        Ok(prev)
    }

    /// Replaces the value under `key` only if the current value compares
    /// equal to `expected`. Returns whether a replacement was written.
    pub fn replace_exact(
        &self,
        key: &A::Key,
        expected: &V,
        value: Arc<V>,
    ) -> Result<bool, KeyError>
    where
        V: PartialEq,
    {
        if !self.adapter.eq_key(key, &value) {
            return Err(KeyError::Inconsistent);
        }
        let mut state = self.state.lock();
        let (prev, wrote) = self.internal_put(
            &mut state,
            value,
            PutMode::Replace,
            Some(|candidate: &V| candidate == expected),
        );
        Ok(prev.is_some() && wrote)
    }

    /// Inserts a value under its own derived key. Returns true if no value
    /// with that key was present before.
    pub fn add(&self, value: Arc<V>) -> bool {
        let mut state = self.state.lock();
        let (prev, _) = self.internal_put(&mut state, value, PutMode::Normal, no_pred());
        prev.is_none()
    }

    /// Inserts every value under its own derived key. Returns true if any
    /// insertion found its key absent.
    pub fn add_all<I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = Arc<V>>,
    {
        let mut state = self.state.lock();
        let mut changed = false;
        for value in values {
            let (prev, _) = self.internal_put(&mut state, value, PutMode::Normal, no_pred());
            changed |= prev.is_none();
        }
        changed
    }

    /// Inserts every `(key, value)` pair with normal put semantics.
    ///
    /// Fails on the first inconsistent pair; earlier pairs stay inserted.
    pub fn put_all<I>(&self, entries: I) -> Result<(), KeyError>
    where
        I: IntoIterator<Item = (A::Key, Arc<V>)>,
    {
        let mut state = self.state.lock();
        for (key, value) in entries {
            if !self.adapter.eq_key(&key, &value) {
                return Err(KeyError::Inconsistent);
            }
            self.internal_put(&mut state, value, PutMode::Normal, no_pred());
        }
        Ok(())
    }

    /// Returns the value for `key`, manufacturing and inserting one with
    /// `factory` if the key is absent.
    ///
    /// The factory runs at most once per winning insertion: concurrent
    /// callers racing on the same key observe the winner's value without
    /// their factory running. The factory executes inside the write lock and
    /// must not call back into this table.
    ///
    /// Fails with [`KeyError::FactoryMismatch`] if the factory's value does
    /// not carry the requested key; nothing is inserted in that case.
    pub fn get_or_insert_with<F>(&self, key: A::Key, factory: F) -> Result<Arc<V>, KeyError>
    where
        F: FnOnce(&A::Key) -> Arc<V>,
    {
        if let Some(existing) = self.get(&key) {
            return Ok(existing);
        }
        let mut state = self.state.lock();
        self.internal_create_if_absent(&mut state, key, factory)
    }

    /// Removes the value with this derived key, returning it.
    pub fn remove_key(&self, key: &A::Key) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        self.internal_remove(&mut state, key, no_pred()).0
    }

    /// Removes the entry for `key` only if its value compares equal to
    /// `expected`. Returns whether a removal happened.
    pub fn remove_exact(&self, key: &A::Key, expected: &V) -> bool
    where
        V: PartialEq,
    {
        let mut state = self.state.lock();
        let (prev, removed) =
            self.internal_remove(&mut state, key, Some(|candidate: &V| candidate == expected));
        prev.is_some() && removed
    }

    /// Removes the entry holding this value's derived key. Returns whether
    /// anything was removed.
    pub fn remove_value(&self, value: &V) -> bool {
        self.remove_key(&self.adapter.key_of(value)).is_some()
    }

    /// Removes each value's key in turn. Returns true if anything was
    /// removed.
    pub fn remove_all<'a, I>(&self, values: I) -> bool
    where
        I: IntoIterator<Item = &'a V>,
        V: 'a,
    {
        let mut state = self.state.lock();
        let mut changed = false;
        for value in values {
            let key = self.adapter.key_of(value);
            changed |= self.internal_remove(&mut state, &key, no_pred()).0.is_some();
        }
        changed
    }

    /// Keeps only values that compare equal to some element of `keep`, then
    /// compacts. Returns true if anything was dropped.
    pub fn retain_all(&self, keep: &[Arc<V>]) -> bool
    where
        V: PartialEq,
    {
        let mut state = self.state.lock();
        let snapshot = self.live_values();
        let mut changed = false;
        for value in snapshot {
            if !keep.iter().any(|k| **k == *value) {
                let key = self.adapter.key_of(&value);
                changed |= self.internal_remove(&mut state, &key, no_pred()).0.is_some();
            }
        }
        if changed {
            let capacity = primes::next_prime(self.compacted_capacity());
            self.rehash(&mut state, capacity);
        }
        changed
    }

    /// Drops every value. Readers that captured the old storage keep their
    /// consistent snapshot.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let capacity = self.capacity();
        trace!(capacity, "clear");
        self.storage.store(Arc::new(Storage::new(capacity)));
        self.size.store(0, Ordering::Relaxed);
        state.free = capacity;
        state.index_cache = None;
    }

    /// Ensures `additional` more values fit without a rehash. Call before a
    /// bulk insert.
    pub fn ensure_capacity(&self, additional: usize) {
        let mut state = self.state.lock();
        if additional > state.max_size.saturating_sub(self.len()) {
            let desired =
                ((additional + self.len()) as f64 / self.load_factor).ceil() as usize + 1;
            let capacity = primes::next_prime(desired);
            self.rehash(&mut state, capacity);
        }
    }

    /// Rehashes to the smallest prime capacity admitting the current size,
    /// releasing memory and purging every tombstone.
    ///
    /// Worth calling after heavy churn: removals leave tombstones behind,
    /// and long tombstone runs degrade probes toward O(capacity).
    pub fn compact(&self) {
        let mut state = self.state.lock();
        let capacity = primes::next_prime(self.compacted_capacity());
        self.rehash(&mut state, capacity);
    }

    /// Alias of [`compact`](Self::compact), for symmetry with other
    /// collections.
    pub fn trim_to_size(&self) {
        self.compact()
    }

    /// Returns the `index`-th live value of a membership snapshot taken on
    /// the first indexed access since the last mutation.
    ///
    /// The snapshot order is arbitrary but stable until the next mutation.
    pub fn get_by_index(&self, index: usize) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        if state.index_cache.is_none() {
            state.index_cache = Some(Arc::new(self.live_values()));
        }
        state.index_cache.as_ref().and_then(|list| list.get(index).cloned())
    }

    /// Iterates over the live values of a point-in-time snapshot.
    pub fn iter(&self) -> Values<'_, V, A> {
        Values::new(self)
    }

    /// Iterates over the derived keys of a point-in-time snapshot.
    pub fn keys(&self) -> Keys<'_, V, A> {
        Keys::new(self)
    }

    /// Iterates over `(key, value)` pairs of a point-in-time snapshot.
    pub fn entries(&self) -> Entries<'_, V, A> {
        Entries::new(self)
    }

    /// Collects the live values into a vector.
    pub fn to_vec(&self) -> Vec<Arc<V>> {
        self.live_values()
    }

    /// Collects the live values satisfying `pred` into a vector.
    pub fn to_vec_filtered<P>(&self, mut pred: P) -> Vec<Arc<V>>
    where
        P: FnMut(&V) -> bool,
    {
        let storage = self.storage.load();
        let mut out = Vec::new();
        for cell in storage.cells.iter() {
            if let Some(Slot::Live(v)) = cell.load().as_deref() {
                if pred(v) {
                    out.push(Arc::clone(v));
                }
            }
        }
        out
    }

    pub(super) fn snapshot(&self) -> Arc<Storage<V>> {
        self.storage.load_full()
    }

    fn live_values(&self) -> Vec<Arc<V>> {
        let storage = self.storage.load();
        let mut out = Vec::with_capacity(self.len());
        for cell in storage.cells.iter() {
            if let Some(Slot::Live(v)) = cell.load().as_deref() {
                out.push(Arc::clone(v));
            }
        }
        out
    }

    fn compacted_capacity(&self) -> usize {
        (self.len() as f64 / self.load_factor).ceil() as usize + 1
    }

    /// The one probe-and-write routine behind every keyed insertion mode.
    /// Requires the write lock.
    ///
    /// Returns the previously found value (whether or not it was replaced)
    /// and whether this call wrote to the table.
    fn internal_put<P>(
        &self,
        state: &mut WriteState<V>,
        value: Arc<V>,
        mode: PutMode,
        expected: Option<P>,
    ) -> (Option<Arc<V>>, bool)
    where
        P: Fn(&V) -> bool,
    {
        let storage = self.storage.load_full();
        let len = storage.len();
        let key = self.adapter.key_of(&value);
        let hash = mask(self.adapter.hash_key(&key));
        let step = probe_step(hash, len);
        let mut index = hash % len;
        // first tombstone seen on the probe; an insertion lands there to
        // shorten future probes for this key
        let mut first_tombstone: Option<usize> = None;

        loop {
            // the write lock is held, so an owned load per probe is cheap
            // and lets the slot be overwritten below without aliasing
            let cell = storage.cells[index].load_full();
            match cell.as_deref() {
                None => {
                    if mode != PutMode::Replace {
                        let target = first_tombstone.unwrap_or(index);
                        storage.cells[target].store(Some(Arc::new(Slot::Live(value))));
                        state.index_cache = None;
                        self.post_insert(state, &storage, first_tombstone.is_none());
                        return (None, true);
                    }
                    return (None, false);
                }
                Some(Slot::Tombstone) => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Some(Slot::Live(candidate)) if self.adapter.eq_key(&key, candidate) => {
                    let prev = Arc::clone(candidate);
                    let matched = expected.as_ref().map_or(true, |p| p(candidate));
                    if mode != PutMode::IfAbsent && matched {
                        storage.cells[index].store(Some(Arc::new(Slot::Live(value))));
                        state.index_cache = None;
                        return (Some(prev), true);
                    }
                    return (Some(prev), false);
                }
                Some(Slot::Live(_)) => {}
            }
            index = probe_next(index, step, len);
        }
    }

    /// Probe-and-create for the factory path. Requires the write lock; the
    /// factory runs only when the key is still absent under the lock.
    fn internal_create_if_absent<F>(
        &self,
        state: &mut WriteState<V>,
        key: A::Key,
        factory: F,
    ) -> Result<Arc<V>, KeyError>
    where
        F: FnOnce(&A::Key) -> Arc<V>,
    {
        let storage = self.storage.load_full();
        let len = storage.len();
        let hash = mask(self.adapter.hash_key(&key));
        let step = probe_step(hash, len);
        let mut index = hash % len;
        let mut first_tombstone: Option<usize> = None;

        loop {
            let cell = storage.cells[index].load_full();
            match cell.as_deref() {
                None => {
                    let value = factory(&key);
                    if !self.adapter.eq_key(&key, &value) {
                        return Err(KeyError::FactoryMismatch);
                    }
                    let target = first_tombstone.unwrap_or(index);
                    storage.cells[target].store(Some(Arc::new(Slot::Live(Arc::clone(&value)))));
                    state.index_cache = None;
                    self.post_insert(state, &storage, first_tombstone.is_none());
                    return Ok(value);
                }
                Some(Slot::Tombstone) => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Some(Slot::Live(candidate)) if self.adapter.eq_key(&key, candidate) => {
                    return Ok(Arc::clone(candidate));
                }
                Some(Slot::Live(_)) => {}
            }
            index = probe_next(index, step, len);
        }
    }

    /// Probe-and-remove. Requires the write lock. Returns the found value
    /// (whether or not it was removed) and whether a tombstone was written.
    fn internal_remove<P>(
        &self,
        state: &mut WriteState<V>,
        key: &A::Key,
        expected: Option<P>,
    ) -> (Option<Arc<V>>, bool)
    where
        P: Fn(&V) -> bool,
    {
        let storage = self.storage.load_full();
        let len = storage.len();
        let hash = mask(self.adapter.hash_key(key));
        let step = probe_step(hash, len);
        let mut index = hash % len;

        loop {
            let cell = storage.cells[index].load_full();
            match cell.as_deref() {
                None => return (None, false),
                Some(Slot::Live(candidate)) if self.adapter.eq_key(key, candidate) => {
                    let prev = Arc::clone(candidate);
                    let matched = expected.as_ref().map_or(true, |p| p(candidate));
                    if matched {
                        // removal never empties the slot: the tombstone keeps
                        // longer probe chains intact. The free count is
                        // untouched until a rehash reclaims these.
                        storage.cells[index].store(Some(Arc::clone(&storage.tombstone)));
                        self.size.fetch_sub(1, Ordering::Relaxed);
                        state.index_cache = None;
                    }
                    return (Some(prev), matched);
                }
                _ => {}
            }
            index = probe_next(index, step, len);
        }
    }

    /// Adjusts the size/free accounting after a successful insert and
    /// rehashes if required. Requires the write lock.
    fn post_insert(&self, state: &mut WriteState<V>, storage: &Storage<V>, used_free_slot: bool) {
        if used_free_slot {
            state.free -= 1;
        }
        let size = self.size.fetch_add(1, Ordering::Relaxed) + 1;

        // Rehash when we outgrow the threshold, or when the last-but-one
        // empty slot is gone. We never let free hit zero: a reader probing a
        // snapshot with no empty slot could loop forever.
        if size > state.max_size || state.free == 1 {
            let capacity = storage.len();
            let new_capacity = if size > state.max_size {
                primes::next_prime(capacity << 1)
            } else {
                // same capacity: this rehash exists to turn tombstones back
                // into free slots
                capacity
            };
            if new_capacity < capacity {
                panic!(
                    "internal error: newCapacity < capacity, new={}, capacity={}, free={}, size={}, max_size={}",
                    new_capacity, capacity, state.free, size, state.max_size
                );
            }
            self.rehash(state, new_capacity);
        }
    }

    /// Builds a fresh slot array at `new_capacity`, re-inserts every live
    /// value, and swaps it in with a single atomic store. Requires the write
    /// lock.
    ///
    /// Readers that captured the old array continue over a complete,
    /// consistent snapshot; readers arriving after the store see the new one.
    fn rehash(&self, state: &mut WriteState<V>, new_capacity: usize) {
        let old = self.storage.load_full();
        trace!(old_capacity = old.len(), new_capacity, "rehash");
        let fresh = Storage::new(new_capacity);
        let mut live = 0usize;
        for cell in old.cells.iter() {
            if let Some(slot) = cell.load_full() {
                if matches!(&*slot, Slot::Live(_)) {
                    self.insert_fresh(&fresh, slot);
                    live += 1;
                }
            }
        }
        self.size.store(live, Ordering::Relaxed);
        state.max_size = Self::max_size_for(new_capacity, self.load_factor);
        state.free = new_capacity - live;
        self.storage.store(Arc::new(fresh));
    }

    /// Inserts an already-live slot into a not-yet-published array, which by
    /// construction holds no tombstones and no equal key.
    fn insert_fresh(&self, storage: &Storage<V>, slot: Arc<Slot<V>>) {
        let value = match &*slot {
            Slot::Live(v) => v,
            Slot::Tombstone => unreachable!("only live slots are carried across a rehash"),
        };
        let len = storage.len();
        let key = self.adapter.key_of(value);
        let hash = mask(self.adapter.hash_key(&key));
        let step = probe_step(hash, len);
        let mut index = hash % len;
        while storage.cells[index].load().is_some() {
            index = probe_next(index, step, len);
        }
        storage.cells[index].store(Some(slot));
    }
}

impl<'a, V, A: KeyAdapter<V>> IntoIterator for &'a KeyedHash<V, A> {
    type Item = Arc<V>;
    type IntoIter = Values<'a, V, A>;

    fn into_iter(self) -> Values<'a, V, A> {
        self.iter()
    }
}

fn no_pred<V>() -> Option<fn(&V) -> bool> {
    None
}
