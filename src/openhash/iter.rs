//! Snapshot iterators over the open-addressed table.
//!
//! Each iterator captures the storage array handle at construction, so it
//! walks a consistent membership snapshot no matter what writers do in the
//! meantime. Removal through an iterator goes back to the live table by key,
//! like every other removal.

use std::sync::Arc;

use crate::adapter::KeyAdapter;

use super::{KeyedHash, Slot, Storage};

/// Iterates over the live values of a table snapshot.
pub struct Values<'a, V, A: KeyAdapter<V>> {
    table: &'a KeyedHash<V, A>,
    storage: Arc<Storage<V>>,
    pos: usize,
    last: Option<Arc<V>>,
}

impl<'a, V, A: KeyAdapter<V>> Values<'a, V, A> {
    pub(super) fn new(table: &'a KeyedHash<V, A>) -> Self {
        Values {
            table,
            storage: table.snapshot(),
            pos: 0,
            last: None,
        }
    }

    fn scan(&mut self) -> Option<Arc<V>> {
        while self.pos < self.storage.cells.len() {
            let cell = self.storage.cells[self.pos].load();
            self.pos += 1;
            if let Some(Slot::Live(v)) = cell.as_deref() {
                let v = Arc::clone(v);
                self.last = Some(Arc::clone(&v));
                return Some(v);
            }
        }
        None
    }

    /// Removes the last value this iterator returned from the live table.
    pub fn remove(&mut self) {
        if let Some(last) = self.last.take() {
            self.table.remove_value(&last);
        }
    }
}

impl<V, A: KeyAdapter<V>> Iterator for Values<'_, V, A> {
    type Item = Arc<V>;

    fn next(&mut self) -> Option<Arc<V>> {
        self.scan()
    }
}

/// Iterates over the derived keys of a table snapshot.
pub struct Keys<'a, V, A: KeyAdapter<V>> {
    values: Values<'a, V, A>,
}

impl<'a, V, A: KeyAdapter<V>> Keys<'a, V, A> {
    pub(super) fn new(table: &'a KeyedHash<V, A>) -> Self {
        Keys {
            values: Values::new(table),
        }
    }

    /// Removes the entry whose key was last returned.
    pub fn remove(&mut self) {
        self.values.remove();
    }
}

impl<V, A: KeyAdapter<V>> Iterator for Keys<'_, V, A> {
    type Item = A::Key;

    fn next(&mut self) -> Option<A::Key> {
        let table = self.values.table;
        self.values.next().map(|v| table.adapter().key_of(&v))
    }
}

/// Iterates over `(key, value)` pairs of a table snapshot.
pub struct Entries<'a, V, A: KeyAdapter<V>> {
    values: Values<'a, V, A>,
}

impl<'a, V, A: KeyAdapter<V>> Entries<'a, V, A> {
    pub(super) fn new(table: &'a KeyedHash<V, A>) -> Self {
        Entries {
            values: Values::new(table),
        }
    }

    /// Removes the entry last returned.
    pub fn remove(&mut self) {
        self.values.remove();
    }
}

impl<V, A: KeyAdapter<V>> Iterator for Entries<'_, V, A> {
    type Item = (A::Key, Arc<V>);

    fn next(&mut self) -> Option<(A::Key, Arc<V>)> {
        let table = self.values.table;
        self.values
            .next()
            .map(|v| (table.adapter().key_of(&v), v))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use crate::adapter::LongKey;
    use crate::openhash::KeyedHash;

    #[derive(Debug, PartialEq, Eq)]
    struct Obj {
        id: i64,
    }

    fn table(n: i64) -> KeyedHash<Obj, LongKey<fn(&Obj) -> i64>> {
        let f: fn(&Obj) -> i64 = |o| o.id;
        let t = KeyedHash::with_capacity(16, LongKey::new(f));
        for id in 0..n {
            t.add(Arc::new(Obj { id }));
        }
        t
    }

    #[test]
    fn test_values_cover_membership() {
        let t = table(10);
        let seen: BTreeSet<i64> = t.iter().map(|v| v.id).collect();
        assert_eq!(seen, (0..10).collect());
    }

    #[test]
    fn test_keys_and_entries_agree() {
        let t = table(6);
        let keys: BTreeSet<i64> = t.keys().collect();
        assert_eq!(keys, (0..6).collect());
        for (k, v) in t.entries() {
            assert_eq!(k, v.id);
        }
    }

    #[test]
    fn test_iterator_remove() {
        let t = table(8);
        let mut iter = t.iter();
        let first = iter.next().unwrap();
        iter.remove();
        assert_eq!(t.len(), 7);
        assert!(t.get(&first.id).is_none());
        // removing twice without advancing does nothing further
        iter.remove();
        assert_eq!(t.len(), 7);
        // the rest of the snapshot is still reachable
        let remaining = iter.count();
        assert_eq!(remaining, 7);
    }

    #[test]
    fn test_iteration_is_snapshot() {
        let t = table(4);
        let mut iter = t.iter();
        let _ = iter.next();
        t.add(Arc::new(Obj { id: 100 }));
        // the snapshot predates the insert; counting the remainder sees at
        // most the original membership
        assert!(iter.count() <= 3 + 1);
        assert!(t.get(&100).is_some());
    }
}
