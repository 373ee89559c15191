//! Iteration over the intrusive chained table.
//!
//! The iterator snapshots the bucket array once and then follows live chain
//! links, so it tolerates concurrent mutation without ever tearing, though
//! what it observes under concurrent writes is unspecified.

use std::sync::Arc;

use crate::adapter::KeyAdapter;

use super::{Buckets, ChainAdapter, IntrusiveChainedHash};

/// Iterates over the values of an intrusive table, bucket by bucket and
/// chain by chain.
pub struct Iter<'a, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    table: &'a IntrusiveChainedHash<V, A, C>,
    buckets: Arc<Buckets<V>>,
    /// Next bucket to scan once the current chain is exhausted.
    next_bucket: usize,
    /// Last value returned; the chain link of this value leads to the
    /// successor.
    last: Option<Arc<V>>,
    /// Set by [`Iter::remove`]: `last` already points at the successor, so
    /// the next call yields it without advancing again.
    removed: bool,
}

impl<'a, V, A, C> Iter<'a, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    pub(super) fn new(table: &'a IntrusiveChainedHash<V, A, C>) -> Self {
        Iter {
            table,
            buckets: table.snapshot(),
            next_bucket: 0,
            last: None,
            removed: false,
        }
    }

    fn scan(&mut self) -> Option<Arc<V>> {
        if self.removed {
            self.removed = false;
            return self.last.clone();
        }
        let chain = self.table.chain_adapter();
        if let Some(next) = self.last.as_ref().and_then(|v| chain.link(v).get()) {
            self.last = Some(Arc::clone(&next));
            return Some(next);
        }
        // first call, or current chain exhausted: find the next occupied
        // bucket
        while self.next_bucket < self.buckets.heads.len() {
            let head = self.buckets.heads[self.next_bucket].load_full();
            self.next_bucket += 1;
            if let Some(head) = head {
                self.last = Some(Arc::clone(&head));
                return Some(head);
            }
        }
        self.last = None;
        None
    }

    /// Removes the last value this iterator returned from the live table.
    ///
    /// The iterator advances to the successor before unlinking, so the next
    /// call to `next` remains valid.
    pub fn remove(&mut self) {
        if let Some(victim) = self.last.clone() {
            self.scan();
            self.removed = true;
            self.table.remove_value(&victim);
        }
    }
}

impl<V, A, C> Iterator for Iter<'_, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    type Item = Arc<V>;

    fn next(&mut self) -> Option<Arc<V>> {
        self.scan()
    }
}

/// Iterates over the derived keys of an intrusive table snapshot.
pub struct Keys<'a, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    iter: Iter<'a, V, A, C>,
}

impl<'a, V, A, C> Keys<'a, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    pub(super) fn new(table: &'a IntrusiveChainedHash<V, A, C>) -> Self {
        Keys {
            iter: Iter::new(table),
        }
    }

    /// Removes the entry whose key was last returned.
    pub fn remove(&mut self) {
        self.iter.remove();
    }
}

impl<V, A, C> Iterator for Keys<'_, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    type Item = A::Key;

    fn next(&mut self) -> Option<A::Key> {
        let table = self.iter.table;
        self.iter.next().map(|v| table.adapter().key_of(&v))
    }
}

/// Iterates over `(key, value)` pairs of an intrusive table snapshot.
pub struct Entries<'a, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    iter: Iter<'a, V, A, C>,
}

impl<'a, V, A, C> Entries<'a, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    pub(super) fn new(table: &'a IntrusiveChainedHash<V, A, C>) -> Self {
        Entries {
            iter: Iter::new(table),
        }
    }

    /// Removes the entry last returned.
    pub fn remove(&mut self) {
        self.iter.remove();
    }
}

impl<V, A, C> Iterator for Entries<'_, V, A, C>
where
    A: KeyAdapter<V>,
    C: ChainAdapter<V>,
{
    type Item = (A::Key, Arc<V>);

    fn next(&mut self) -> Option<(A::Key, Arc<V>)> {
        let table = self.iter.table;
        self.iter.next().map(|v| (table.adapter().key_of(&v), v))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::adapter::HashedKey;
    use crate::intrusive::{ChainAdapter, IntrusiveChainedHash, Link};

    #[derive(Debug)]
    struct Node {
        id: String,
        link: Link<Node>,
    }

    impl Node {
        fn new(id: &str) -> Arc<Node> {
            Arc::new(Node {
                id: id.to_string(),
                link: Link::new(),
            })
        }
    }

    struct NodeChain;

    impl ChainAdapter<Node> for NodeChain {
        fn link<'a>(&self, value: &'a Node) -> &'a Link<Node> {
            &value.link
        }
    }

    type NodeTable = IntrusiveChainedHash<Node, HashedKey<String, fn(&Node) -> String>, NodeChain>;

    fn single_bucket_table() -> NodeTable {
        let f: fn(&Node) -> String = |n| n.id.clone();
        IntrusiveChainedHash::with_options(1, 0.5, false, HashedKey::new(f), NodeChain)
    }

    #[test]
    fn test_insertion_order_in_one_bucket() {
        let t = single_bucket_table();
        for id in ["A", "B", "C", "D"] {
            t.add(Node::new(id));
        }
        let order: Vec<String> = t.iter().map(|n| n.id.clone()).collect();
        assert_eq!(order, ["A", "B", "C", "D"]);
    }

    #[test]
    fn test_keys_and_entries() {
        let t = single_bucket_table();
        for id in ["A", "B", "C"] {
            t.add(Node::new(id));
        }
        let keys: Vec<String> = t.keys().collect();
        assert_eq!(keys, ["A", "B", "C"]);
        for (k, v) in t.entries() {
            assert_eq!(k, v.id);
        }
    }

    #[test]
    fn test_iterator_remove_keeps_position() {
        let t = single_bucket_table();
        for id in ["A", "B", "C", "D"] {
            t.add(Node::new(id));
        }
        let mut iter = t.iter();
        assert_eq!(iter.next().unwrap().id, "A");
        assert_eq!(iter.next().unwrap().id, "B");
        iter.remove();
        assert_eq!(t.len(), 3);
        assert!(t.get(&"B".to_string()).is_none());
        // iteration resumes at the successor of the removed value
        assert_eq!(iter.next().unwrap().id, "C");
        assert_eq!(iter.next().unwrap().id, "D");
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_remove_before_next_is_a_noop() {
        let t = single_bucket_table();
        t.add(Node::new("A"));
        let mut iter = t.iter();
        iter.remove();
        assert_eq!(t.len(), 1);
        assert_eq!(iter.next().unwrap().id, "A");
    }

    #[test]
    fn test_remove_last_element() {
        let t = single_bucket_table();
        for id in ["A", "B"] {
            t.add(Node::new(id));
        }
        let mut iter = t.iter();
        let _ = iter.next();
        let _ = iter.next();
        iter.remove();
        assert!(iter.next().is_none());
        assert_eq!(t.len(), 1);
        assert!(t.get(&"B".to_string()).is_none());
    }
}
