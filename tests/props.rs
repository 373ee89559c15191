//! Property tests for the open-addressed table.

use std::collections::HashMap;
use std::sync::Arc;

use keyed_hash::adapter::LongKey;
use keyed_hash::KeyedHashMap;

#[derive(Debug, PartialEq, Eq)]
struct LongItem {
    id: i64,
}

type LongMap = KeyedHashMap<LongItem, LongKey<fn(&LongItem) -> i64>>;

fn long_map(capacity: usize, load_factor: f64) -> LongMap {
    let f: fn(&LongItem) -> i64 = |i| i.id;
    KeyedHashMap::with_capacity_and_load_factor(capacity, load_factor, LongKey::new(f))
}

proptest::proptest! {
    /// Any load factor in (0, 1) and any small starting capacity survive
    /// add/remove cycles of twice the capacity without tripping a probe
    /// cycle or an internal invariant.
    #[test]
    fn admissible_under_any_load_factor(
        load_factor in 0.001f64..0.999,
        initial_capacity in 0usize..100,
        keys in proptest::collection::vec(0i64..10, 1..256),
    ) {
        let m = long_map(initial_capacity, load_factor);
        for i in 0..initial_capacity * 2 {
            if m.len() >= m.capacity() - 1 {
                // drop the first indexed entry to make room
                let victim = m.get_by_index(0).unwrap();
                m.remove(&victim.id);
            }
            let id = keys[i % keys.len()];
            m.put(&id, Arc::new(LongItem { id })).unwrap();
        }
    }

    /// A put sequence reproduces exactly the mapping a reference map holds,
    /// and unknown keys stay absent.
    #[test]
    fn insertion_round_trip(keys in proptest::collection::vec(-500i64..500, 0..300)) {
        let m = long_map(4, 0.5);
        let mut reference = HashMap::new();
        for &id in &keys {
            let v = Arc::new(LongItem { id });
            m.put(&id, Arc::clone(&v)).unwrap();
            reference.insert(id, v);
        }
        proptest::prop_assert!(m == reference);
        for probe in 500..600 {
            proptest::prop_assert!(m.get(&probe).is_none());
        }
    }

    /// Removing a key once or twice leaves the same state, and the second
    /// removal reports absence.
    #[test]
    fn remove_is_idempotent(keys in proptest::collection::vec(0i64..50, 1..100), victim in 0i64..50) {
        let m = long_map(8, 0.5);
        let mut reference = HashMap::new();
        for &id in &keys {
            let v = Arc::new(LongItem { id });
            m.put(&id, Arc::clone(&v)).unwrap();
            reference.insert(id, v);
        }
        let had = reference.remove(&victim).is_some();
        proptest::prop_assert_eq!(m.remove(&victim).is_some(), had);
        proptest::prop_assert!(m.remove(&victim).is_none());
        proptest::prop_assert!(m == reference);
    }
}
