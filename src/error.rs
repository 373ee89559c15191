//! Errors surfaced by the keyed tables.
//!
//! Only user-input failures are represented here; they leave the table
//! untouched and can be handled by the caller. Invariant violations (a probe
//! cycle, an inconsistent size after `clear`, a shrinking rehash) are not
//! recoverable and panic instead.

use thiserror::Error;

/// A recoverable failure of a mutating table operation.
///
/// The failing operation has no effect on the table.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    /// The supplied key is not equal to the key derived from the supplied
    /// value.
    #[error("key and value are inconsistent")]
    Inconsistent,
    /// A value factory produced a value whose derived key differs from the
    /// key that was requested.
    #[error("factory value key and requested key don't match")]
    FactoryMismatch,
}
