//! Byte-level encodings shared by the backends.
//!
//! * [`packed`] is the batch representation used by packed operations.
//! * [`keycode`] builds order-preserving keys for documents stored over a
//!   key-value backend.
//! * [`bincode`] serializes small metadata records.
//! * [`format`] renders raw keys for log output.

pub mod bincode;
pub mod format;
pub mod keycode;
pub mod packed;

pub use packed::{BitField, ItemSize, Packed, PackedBuf, PackedWriter};

use crate::error::Result;

/// Trait for encoding keys with order preservation.
///
/// Encoded keys must sort the same way as the values they encode so that
/// range listings over the key-value store visit them in order.
pub trait Key<'de>: Sized {
    fn encode(&self) -> Vec<u8>;

    fn decode(bytes: &'de [u8]) -> Result<Self>;
}

/// Trait for encoding metadata values, which need no ordering.
pub trait Value: Sized {
    fn encode(&self) -> Result<Vec<u8>>;

    fn decode(bytes: &[u8]) -> Result<Self>;
}
