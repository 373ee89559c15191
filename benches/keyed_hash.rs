use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::{thread_rng, Rng};

use keyed_hash::adapter::LongKey;
use keyed_hash::KeyedHashMap;

// ranges of counts for different benchmarks:
const INSERT_COUNT: (u32, u32) = (120, 140);

#[derive(Debug)]
struct Item {
    id: i64,
}

type LongMap = KeyedHashMap<Item, LongKey<fn(&Item) -> i64>>;

fn new_map() -> LongMap {
    let f: fn(&Item) -> i64 = |i| i.id;
    KeyedHashMap::with_capacity(16, LongKey::new(f))
}

pub fn insert_values(c: &mut Criterion) {
    c.bench_function("insert_values", |b| {
        b.iter_batched(
            || {
                let mut rng = thread_rng();
                let count = rng.gen_range(INSERT_COUNT.0..INSERT_COUNT.1);
                let list: Vec<Arc<Item>> = (0..count)
                    .map(|_| {
                        Arc::new(Item {
                            id: rng.gen_range(0..i64::from(INSERT_COUNT.1 << 8)),
                        })
                    })
                    .collect();
                (new_map(), list)
            },
            |(map, list)| {
                for v in &list {
                    map.put(&v.id, Arc::clone(v)).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

pub fn get_hit_and_miss(c: &mut Criterion) {
    c.bench_function("get_hit_and_miss", |b| {
        b.iter_batched(
            || {
                let map = new_map();
                for id in 0..1024i64 {
                    map.put(&id, Arc::new(Item { id })).unwrap();
                }
                map
            },
            |map| {
                for id in 0..2048i64 {
                    let _ = map.get(&id);
                }
            },
            BatchSize::SmallInput,
        )
    });
}

pub fn find_or_create_churn(c: &mut Criterion) {
    c.bench_function("find_or_create_churn", |b| {
        b.iter_batched(
            new_map,
            |map| {
                for id in 0..512i64 {
                    map.get_or_insert_with(id, |k| Arc::new(Item { id: *k })).unwrap();
                }
                for id in 0..512i64 {
                    map.get_or_insert_with(id, |k| Arc::new(Item { id: *k })).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(inserts, insert_values);
criterion_group!(reads, get_hit_and_miss, find_or_create_churn);
criterion_main!(inserts, reads);
