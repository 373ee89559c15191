//! End-to-end tests of the open-addressed family, including the concurrent
//! scenarios the table is designed around.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::scope;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use keyed_hash::adapter::{HashedKey, LongKey};
use keyed_hash::KeyedHashMap;

#[derive(Debug, PartialEq, Eq)]
struct Item {
    id: String,
}

impl Item {
    fn new(id: &str) -> Arc<Item> {
        Arc::new(Item { id: id.to_string() })
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LongItem {
    id: i64,
}

impl LongItem {
    fn new(id: i64) -> Arc<LongItem> {
        Arc::new(LongItem { id })
    }
}

type ItemMap = KeyedHashMap<Item, HashedKey<String, fn(&Item) -> String>>;
type LongMap = KeyedHashMap<LongItem, LongKey<fn(&LongItem) -> i64>>;

fn item_map(capacity: usize, load_factor: f64) -> ItemMap {
    let f: fn(&Item) -> String = |i| i.id.clone();
    KeyedHashMap::with_capacity_and_load_factor(capacity, load_factor, HashedKey::new(f))
}

fn long_map(capacity: usize) -> LongMap {
    let f: fn(&LongItem) -> i64 = |i| i.id;
    KeyedHashMap::with_capacity(capacity, LongKey::new(f))
}

/// Basic flat-map behaviour from a tiny starting capacity.
#[test]
fn test_basic_flat_map() {
    let m = item_map(2, 0.5);
    let originals: Vec<_> = ["A", "B", "C", "D"].iter().map(|id| Item::new(id)).collect();
    for o in &originals {
        assert!(m.put(&o.id, Arc::clone(o)).unwrap().is_none());
    }
    assert_eq!(m.len(), 4);
    for o in &originals {
        assert!(Arc::ptr_eq(&m.get(&o.id).unwrap(), o));
    }

    // re-inserting equal keys returns the prior objects and installs the new
    for o in &originals {
        let newer = Item::new(&o.id);
        let prior = m.put(&o.id, Arc::clone(&newer)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&prior, o));
        assert!(Arc::ptr_eq(&m.get(&o.id).unwrap(), &newer));
    }
    assert_eq!(m.len(), 4);
}

/// Tombstone reuse with primitive long keys: a removed slot on another key's
/// probe path must not break conditional replacement.
#[test]
fn test_replace_over_tombstone() {
    let m = long_map(10);
    let capacity = m.capacity() as i64;

    // hashes to slot 0
    let o1 = LongItem::new(capacity);
    assert!(m.put_if_absent(&capacity, Arc::clone(&o1)).unwrap().is_none());
    assert!(Arc::ptr_eq(&m.get(&capacity).unwrap(), &o1));

    // also probes slot 0 first, then double-hashes elsewhere
    let o2 = LongItem::new(0);
    assert!(m.put_if_absent(&0, Arc::clone(&o2)).unwrap().is_none());
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o2));

    // leave a tombstone at slot 0
    let removed = m.remove(&capacity).unwrap();
    assert!(Arc::ptr_eq(&removed, &o1));

    // replace must not match a wrong expected value...
    let o3 = LongItem::new(0);
    let o4 = LongItem::new(0);
    assert!(!m.replace_exact(&0, &LongItem { id: 10 }, Arc::clone(&o4)).unwrap());
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o2));

    // ...and must succeed when the expected value matches
    assert!(m.replace_exact(&0, &o3, Arc::clone(&o4)).unwrap());
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o4));
}

/// The unboxed replace/put-if-absent semantics over one key.
#[test]
fn test_put_if_absent_then_replace() {
    let m = long_map(10);
    let o1 = LongItem::new(0);
    let o2 = LongItem::new(0);
    let o3 = LongItem::new(0);

    assert!(m.put_if_absent(&0, Arc::clone(&o1)).unwrap().is_none());
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o1));

    let existing = m.put_if_absent(&0, Arc::clone(&o2)).unwrap().unwrap();
    assert!(Arc::ptr_eq(&existing, &o1));
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o1));

    let prior = m.put(&0, Arc::clone(&o2)).unwrap().unwrap();
    assert!(Arc::ptr_eq(&prior, &o1));
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o2));

    assert!(!m.replace_exact(&0, &LongItem { id: 10 }, Arc::clone(&o3)).unwrap());
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o2));
    assert!(m.replace_exact(&0, &LongItem { id: 0 }, Arc::clone(&o3)).unwrap());
    assert!(Arc::ptr_eq(&m.get(&0).unwrap(), &o3));
}

/// Find-or-create race: N threads hammering the same keys invoke the factory
/// exactly once per winning insertion.
#[test]
fn test_put_if_absent_race() {
    const KEYS: i64 = 1000;
    const THREADS: usize = 5;
    const PASSES: usize = 100;

    let m = long_map(16);
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let successful_removes = Arc::new(AtomicUsize::new(0));

    scope(|s| {
        for t in 0..THREADS {
            let m = &m;
            let factory_calls = Arc::clone(&factory_calls);
            let successful_removes = Arc::clone(&successful_removes);
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xC0FFEE + t as u64);
                for pass in 0..PASSES {
                    for k in 0..KEYS {
                        let v = m
                            .get_or_insert_with(k, |key| {
                                factory_calls.fetch_add(1, Ordering::Relaxed);
                                LongItem::new(*key)
                            })
                            .unwrap();
                        assert_eq!(v.id, k);
                    }
                    // churn roughly 40% of the keys between passes
                    if pass % 10 == 9 {
                        for k in 0..KEYS {
                            if rng.gen_bool(0.4) && m.remove(&k).is_some() {
                                successful_removes.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            });
        }
    });

    // settle: every key present again, counting any final re-creations
    for k in 0..KEYS {
        m.get_or_insert_with(k, |key| {
            factory_calls.fetch_add(1, Ordering::Relaxed);
            LongItem::new(*key)
        })
        .unwrap();
    }

    let mut reference = HashMap::new();
    for k in 0..KEYS {
        reference.insert(k, LongItem::new(k));
    }
    assert!(m == reference);

    // every absent->present transition is one factory call: the initial
    // population plus exactly one per successful remove
    assert_eq!(
        factory_calls.load(Ordering::Relaxed),
        KEYS as usize + successful_removes.load(Ordering::Relaxed)
    );
}

/// Lock-free gets under heavy put/remove churn neither hang nor panic.
#[test]
fn test_get_under_churn() {
    let m = long_map(16);
    let capacity = m.capacity() as i64;
    let stop = AtomicBool::new(false);
    let fixed = capacity / 2;

    scope(|s| {
        s.spawn(|| {
            let deadline = Instant::now() + Duration::from_secs(1);
            while Instant::now() < deadline {
                for k in 0..capacity {
                    m.put(&k, LongItem::new(k)).unwrap();
                }
                for k in 0..capacity {
                    m.remove(&k);
                }
            }
            stop.store(true, Ordering::Release);
        });
        s.spawn(|| {
            let mut hits = 0u64;
            while !stop.load(Ordering::Acquire) {
                if let Some(v) = m.get(&fixed) {
                    assert_eq!(v.id, fixed);
                    hits += 1;
                }
            }
            // the reader must have made progress rather than spinning on a
            // broken probe
            let _ = hits;
        });
    });
}

/// A key inserted before a storm of rehash-forcing inserts stays visible to a
/// concurrent reader throughout.
#[test]
fn test_rehash_keeps_concurrent_readers_consistent() {
    const INSERTS: i64 = 20_000;

    let m = long_map(2);
    m.put(&0, LongItem::new(0)).unwrap();
    let done = AtomicBool::new(false);

    scope(|s| {
        s.spawn(|| {
            for k in 1..INSERTS {
                m.put(&k, LongItem::new(k)).unwrap();
            }
            done.store(true, Ordering::Release);
        });
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                let v = m.get(&0).expect("key 0 was always present");
                assert_eq!(v.id, 0);
            }
        });
    });
    assert_eq!(m.len(), INSERTS as usize);
}

/// Batched growth and shrinkage against a reference map, with compaction
/// between the removal steps.
#[test]
fn test_mixed_batches_with_compact() {
    let mut rng = StdRng::seed_from_u64(101_763);
    let m = long_map(8);
    let mut reference: HashMap<i64, Arc<LongItem>> = HashMap::new();

    // five disjoint random batches, ~65x the starting size in total
    let mut batches: Vec<Vec<Arc<LongItem>>> = Vec::new();
    for b in 0..5i64 {
        let mut batch = Vec::new();
        for _ in 0..130 {
            // keys are disjoint per batch by construction
            let id = b * 1_000_000 + rng.gen_range(0..500_000) * 2 + (b % 2);
            batch.push(LongItem::new(id));
        }
        batches.push(batch);
    }

    for batch in &batches {
        for v in batch {
            m.put(&v.id, Arc::clone(v)).unwrap();
            reference.insert(v.id, Arc::clone(v));
        }
        assert!(m == reference);
    }

    for batch in batches.iter().rev() {
        for v in batch {
            assert_eq!(m.remove(&v.id).is_some(), reference.remove(&v.id).is_some());
        }
        m.compact();
        assert!(m == reference);
    }
    assert!(m.is_empty());
}

/// Clearing forgets every key while preserving capacity for reuse.
#[test]
fn test_clear_forgets_everything() {
    let m = long_map(10);
    for k in 0..100 {
        m.put(&k, LongItem::new(k)).unwrap();
    }
    m.clear();
    assert_eq!(m.len(), 0);
    assert!(m.is_empty());
    for k in 0..100 {
        assert!(m.get(&k).is_none());
    }
    // the table remains fully usable
    for k in 0..100 {
        m.put(&k, LongItem::new(k)).unwrap();
    }
    assert_eq!(m.len(), 100);
}

/// Indexed access agrees with keyed access between mutations.
#[test]
fn test_indexed_view_identity() {
    let m = long_map(10);
    for k in 0..50 {
        m.put(&k, LongItem::new(k)).unwrap();
    }
    for i in 0..50 {
        let v = m.get_by_index(i).unwrap();
        assert!(Arc::ptr_eq(&m.get(&v.id).unwrap(), &v));
    }
    assert!(m.get_by_index(50).is_none());
}
