//! Keyed hash collections - maps and sets whose keys live inside the values.
//!
//! Every collection here derives the key of an entry from the value through a
//! [`KeyAdapter`](adapter::KeyAdapter) instead of storing the key alongside
//! it. For workloads where the key is already a field of the value (an id, a
//! name, a sequence number) this halves the per-entry footprint, and with the
//! primitive adapters the hot paths never box or hash-dispatch at all.
//!
//! Two storage families are provided:
//!
//! * [`KeyedHash`] (with its [`KeyedHashMap`] and [`KeyedHashSet`] views) -
//!   an open-addressed table with double-hash probing and tombstone
//!   deletion. Writers are serialised internally; readers are completely
//!   lock-free, relying on snapshot-swapped storage and release/acquire slot
//!   publication.
//! * [`IntrusiveChainedHash`] - separate chaining where the links are
//!   threaded *through the values* via an embedded [`Link`], so chains cost
//!   no per-entry node allocations.
//!
//! Both behave as a set of values and a map from derived key to value at the
//! same time, and both offer an atomic find-or-create
//! (`get_or_insert_with`) whose factory runs at most once per winning
//! insertion.
//!
//! Open addressing is a deliberate trade: removals leave tombstones that
//! lengthen probe sequences, so populations that churn heavily should call
//! `compact()` now and then, or prefer the intrusive family.
//!
//! # Features
//!
//! * `ahash` (default) - hash generic keys with the cpu accelerated ahash
//!   crate; without it the std hasher is used.
//! * `serde` - `Serialize` implementations for the tables and views.
//!
//! # Example
//!
//! ```
//! use keyed_hash::adapter::LongKey;
//! use keyed_hash::KeyedHashMap;
//! use std::sync::Arc;
//!
//! struct Account {
//!     number: i64,
//!     owner: String,
//! }
//!
//! let accounts = KeyedHashMap::new(LongKey::new(|a: &Account| a.number));
//! accounts
//!     .put(&401, Arc::new(Account { number: 401, owner: "ada".into() }))
//!     .unwrap();
//!
//! // find-or-create runs the factory at most once per key
//! let acct = accounts
//!     .get_or_insert_with(402, |n| {
//!         Arc::new(Account { number: *n, owner: "grace".into() })
//!     })
//!     .unwrap();
//! assert_eq!(acct.owner, "grace");
//! assert_eq!(accounts.len(), 2);
//! ```

#![deny(warnings)]
#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod adapter;
mod error;
pub mod intrusive;
pub mod openhash;
mod primes;

pub use error::KeyError;
pub use intrusive::{ChainAdapter, IntrusiveChainedHash, Link};
pub use openhash::map::KeyedHashMap;
pub use openhash::set::KeyedHashSet;
pub use openhash::KeyedHash;
