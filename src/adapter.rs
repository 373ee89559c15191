//! Key adapters - how a table derives, hashes and compares the key of a
//! value.
//!
//! The defining property of these collections is that the key is never stored
//! in the table. Every lookup and insertion goes through a [`KeyAdapter`],
//! which extracts the key from a value, hashes a key, and compares a key
//! against a value. The provided adapters cover the common cases:
//!
//! * [`HashedKey`] for ordinary `Hash + Eq` keys, hashed through a
//!   `BuildHasher`.
//! * [`IntKey`], [`LongKey`] and [`DoubleKey`] for unboxed primitive keys,
//!   where the hash is derived from the key bits directly and no hasher runs
//!   on the hot path.
//!
//! Custom key disciplines implement the trait directly.

use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

#[cfg(feature = "ahash")]
pub(crate) type DefaultBuildHasher = ahash::RandomState;
#[cfg(not(feature = "ahash"))]
pub(crate) type DefaultBuildHasher = std::collections::hash_map::RandomState;

/// Derives, hashes and compares the key of a value.
///
/// Implementations must uphold three rules for any value `v` held by a table:
///
/// * `eq_key(&key_of(v), v)` holds;
/// * `hash_key(&key_of(v))` is stable for as long as `v` is in the table;
/// * keys that compare equal hash equally.
///
/// The tables mask the returned hash with `0x7FFF_FFFF` before reducing it
/// modulo the capacity, so the full 32 bits may be used freely.
pub trait KeyAdapter<V> {
    /// The derived key type.
    type Key;

    /// Returns the key of a value.
    fn key_of(&self, value: &V) -> Self::Key;

    /// Returns the hash of a key.
    fn hash_key(&self, key: &Self::Key) -> u32;

    /// Compares a key against the key of a value.
    fn eq_key(&self, key: &Self::Key, value: &V) -> bool;
}

/// A [`KeyAdapter`] for ordinary `Hash + Eq` keys.
///
/// The key is extracted by a closure and hashed through a [`BuildHasher`] -
/// `ahash` by default, or the std hasher when the `ahash` feature is
/// disabled. The 64-bit hash is folded to 32 bits.
pub struct HashedKey<K, F, S = DefaultBuildHasher> {
    key_fn: F,
    build_hasher: S,
    _marker: PhantomData<fn() -> K>,
}

impl<K, F> HashedKey<K, F> {
    /// Creates an adapter extracting keys with `key_fn`, hashing with the
    /// default hasher.
    pub fn new(key_fn: F) -> Self {
        Self::with_hasher(key_fn, DefaultBuildHasher::default())
    }
}

impl<K, F, S> HashedKey<K, F, S> {
    /// Creates an adapter extracting keys with `key_fn`, hashing with the
    /// given hasher.
    pub fn with_hasher(key_fn: F, build_hasher: S) -> Self {
        HashedKey {
            key_fn,
            build_hasher,
            _marker: PhantomData,
        }
    }
}

impl<V, K, F, S> KeyAdapter<V> for HashedKey<K, F, S>
where
    K: Hash + Eq,
    F: Fn(&V) -> K,
    S: BuildHasher,
{
    type Key = K;

    fn key_of(&self, value: &V) -> K {
        (self.key_fn)(value)
    }

    fn hash_key(&self, key: &K) -> u32 {
        let h = self.build_hasher.hash_one(key);
        (h ^ (h >> 32)) as u32
    }

    fn eq_key(&self, key: &K, value: &V) -> bool {
        *key == (self.key_fn)(value)
    }
}

/// A [`KeyAdapter`] for unboxed `i32` keys. The key is its own hash.
pub struct IntKey<F> {
    key_fn: F,
}

impl<F> IntKey<F> {
    /// Creates an adapter extracting `i32` keys with `key_fn`.
    pub fn new(key_fn: F) -> Self {
        IntKey { key_fn }
    }
}

impl<V, F> KeyAdapter<V> for IntKey<F>
where
    F: Fn(&V) -> i32,
{
    type Key = i32;

    fn key_of(&self, value: &V) -> i32 {
        (self.key_fn)(value)
    }

    fn hash_key(&self, key: &i32) -> u32 {
        *key as u32
    }

    fn eq_key(&self, key: &i32, value: &V) -> bool {
        *key == (self.key_fn)(value)
    }
}

/// A [`KeyAdapter`] for unboxed `i64` keys. The hash folds the two 32-bit
/// halves of the key.
pub struct LongKey<F> {
    key_fn: F,
}

impl<F> LongKey<F> {
    /// Creates an adapter extracting `i64` keys with `key_fn`.
    pub fn new(key_fn: F) -> Self {
        LongKey { key_fn }
    }
}

impl<V, F> KeyAdapter<V> for LongKey<F>
where
    F: Fn(&V) -> i64,
{
    type Key = i64;

    fn key_of(&self, value: &V) -> i64 {
        (self.key_fn)(value)
    }

    fn hash_key(&self, key: &i64) -> u32 {
        let k = *key as u64;
        (k ^ (k >> 32)) as u32
    }

    fn eq_key(&self, key: &i64, value: &V) -> bool {
        *key == (self.key_fn)(value)
    }
}

/// A [`KeyAdapter`] for unboxed `f64` keys.
///
/// Both the hash and the equality are defined on the raw bit pattern of the
/// key. As a consequence `+0.0` and `-0.0` are distinct keys occupying
/// distinct slots, and a NaN is equal to itself (for the same payload bits),
/// so NaN keys are usable.
pub struct DoubleKey<F> {
    key_fn: F,
}

impl<F> DoubleKey<F> {
    /// Creates an adapter extracting `f64` keys with `key_fn`.
    pub fn new(key_fn: F) -> Self {
        DoubleKey { key_fn }
    }
}

impl<V, F> KeyAdapter<V> for DoubleKey<F>
where
    F: Fn(&V) -> f64,
{
    type Key = f64;

    fn key_of(&self, value: &V) -> f64 {
        (self.key_fn)(value)
    }

    fn hash_key(&self, key: &f64) -> u32 {
        let bits = key.to_bits();
        (bits ^ (bits >> 32)) as u32
    }

    fn eq_key(&self, key: &f64, value: &V) -> bool {
        key.to_bits() == (self.key_fn)(value).to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Obj {
        id: i64,
    }

    #[test]
    fn test_long_key_fold() {
        let adapter = LongKey::new(|o: &Obj| o.id);
        let o = Obj { id: 0x1_0000_0001 };
        assert_eq!(adapter.key_of(&o), 0x1_0000_0001);
        // high and low words xor together
        assert_eq!(adapter.hash_key(&0x1_0000_0001), 0);
        assert_eq!(adapter.hash_key(&7), 7);
        assert!(adapter.eq_key(&0x1_0000_0001, &o));
        assert!(!adapter.eq_key(&1, &o));
    }

    #[test]
    fn test_int_key_is_identity_hash() {
        let adapter = IntKey::new(|o: &Obj| o.id as i32);
        assert_eq!(adapter.hash_key(&-1), u32::MAX);
        assert_eq!(adapter.hash_key(&42), 42);
    }

    #[test]
    fn test_double_key_signed_zero_and_nan() {
        struct D {
            id: f64,
        }
        let adapter = DoubleKey::new(|d: &D| d.id);
        // +0.0 and -0.0 hash differently and do not compare equal as keys
        assert_ne!(adapter.hash_key(&0.0), adapter.hash_key(&-0.0));
        assert!(!adapter.eq_key(&-0.0, &D { id: 0.0 }));
        // a NaN key finds a NaN value
        assert!(adapter.eq_key(&f64::NAN, &D { id: f64::NAN }));
    }

    #[test]
    fn test_hashed_key_agrees_with_itself() {
        struct S {
            id: String,
        }
        let adapter = HashedKey::new(|s: &S| s.id.clone());
        let v = S { id: "alpha".into() };
        let k = adapter.key_of(&v);
        assert_eq!(adapter.hash_key(&k), adapter.hash_key(&"alpha".to_string()));
        assert!(adapter.eq_key(&k, &v));
        assert!(!adapter.eq_key(&"beta".to_string(), &v));
    }
}
