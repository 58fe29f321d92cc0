//! Packed batch representation: one contiguous byte buffer plus a parallel
//! array of per-item lengths.
//!
//! ```text
//! data:  | item 0 | item 1 |   | item 3 | ...
//! sizes: [  n0,      n1,    0,   n3,   ...]
//! ```
//!
//! Items are laid out back to back in input order; a zero-length item
//! occupies no bytes. The self-describing image produced by
//! [`PackedBuf::encode`] is `u64 count ‖ count × u64 size ‖ data`, big-endian.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Raw marker for an absent key or document.
pub const KEY_NOT_FOUND: u64 = u64::MAX;
/// Raw marker for an item whose destination buffer was too small.
pub const SIZE_TOO_SMALL: u64 = u64::MAX - 1;
/// Raw marker for listing slots past the end of the store.
pub const NO_MORE_KEYS: u64 = u64::MAX - 2;

/// Per-slot outcome of a batch read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemSize {
    Size(usize),
    #[default]
    NotFound,
    TooSmall,
    NoMore,
}

impl ItemSize {
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            KEY_NOT_FOUND => ItemSize::NotFound,
            SIZE_TOO_SMALL => ItemSize::TooSmall,
            NO_MORE_KEYS => ItemSize::NoMore,
            n => ItemSize::Size(n as usize),
        }
    }

    pub fn to_raw(self) -> u64 {
        match self {
            ItemSize::Size(n) => n as u64,
            ItemSize::NotFound => KEY_NOT_FOUND,
            ItemSize::TooSmall => SIZE_TOO_SMALL,
            ItemSize::NoMore => NO_MORE_KEYS,
        }
    }

    /// The byte length, if the item was found and delivered.
    pub fn size(self) -> Option<usize> {
        match self {
            ItemSize::Size(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, ItemSize::Size(_))
    }
}

/// Borrowed, validated view over a packed batch.
#[derive(Debug, Clone, Copy)]
pub struct Packed<'a> {
    data: &'a [u8],
    sizes: &'a [usize],
}

impl<'a> Packed<'a> {
    /// Validates that the sizes describe at most `data.len()` bytes.
    pub fn new(data: &'a [u8], sizes: &'a [usize]) -> Result<Self> {
        let total = sizes
            .iter()
            .try_fold(0usize, |acc, &n| acc.checked_add(n))
            .ok_or_else(|| Error::InvalidArgument("packed sizes overflow".into()))?;
        if total > data.len() {
            return Err(Error::InvalidArgument(format!(
                "packed sizes describe {} bytes but buffer holds {}",
                total,
                data.len()
            )));
        }
        Ok(Self { data, sizes })
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn sizes(&self) -> &'a [usize] {
        self.sizes
    }

    pub fn total_size(&self) -> usize {
        self.sizes.iter().sum()
    }

    pub fn iter(&self) -> PackedIter<'a> {
        PackedIter {
            data: self.data,
            sizes: self.sizes.iter(),
            offset: 0,
        }
    }

    /// Splits the batch into per-item slices.
    pub fn to_slices(&self) -> Vec<&'a [u8]> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for Packed<'a> {
    type Item = &'a [u8];
    type IntoIter = PackedIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct PackedIter<'a> {
    data: &'a [u8],
    sizes: std::slice::Iter<'a, usize>,
    offset: usize,
}

impl<'a> Iterator for PackedIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let n = *self.sizes.next()?;
        let item = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sizes.size_hint()
    }
}

impl ExactSizeIterator for PackedIter<'_> {}

/// Owned packed batch builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackedBuf {
    data: Vec<u8>,
    sizes: Vec<usize>,
}

impl PackedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: &[u8]) {
        self.data.extend_from_slice(item);
        self.sizes.push(item.len());
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn as_packed(&self) -> Packed<'_> {
        Packed {
            data: &self.data,
            sizes: &self.sizes,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 * self.sizes.len() + self.data.len());
        // Writes into a Vec cannot fail.
        let _ = out.write_u64::<BigEndian>(self.sizes.len() as u64);
        for &n in &self.sizes {
            let _ = out.write_u64::<BigEndian>(n as u64);
        }
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let count = cursor
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("packed count", e))?;
        let header_len = count
            .checked_mul(8)
            .and_then(|n| n.checked_add(8))
            .filter(|&n| n <= bytes.len() as u64)
            .ok_or_else(|| Error::InvalidArgument("packed image truncated".into()))?;

        let mut sizes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let n = cursor
                .read_u64::<BigEndian>()
                .map_err(|e| Error::Decode("packed size", e))?;
            sizes.push(n as usize);
        }
        let mut data = Vec::with_capacity(bytes.len() - header_len as usize);
        cursor.read_to_end(&mut data)?;

        Packed::new(&data, &sizes)?;
        let total: usize = sizes.iter().sum();
        if total != data.len() {
            return Err(Error::InvalidArgument(format!(
                "packed image carries {} trailing bytes",
                data.len() - total
            )));
        }
        Ok(Self { data, sizes })
    }
}

impl<T: AsRef<[u8]>> FromIterator<T> for PackedBuf {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut buf = PackedBuf::new();
        for item in iter {
            buf.push(item.as_ref());
        }
        buf
    }
}

/// Packed bitmap of per-item booleans, least significant bit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    bytes: Vec<u8>,
    len: usize,
}

impl BitField {
    pub fn with_len(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, i: usize, value: bool) {
        let mask = 1u8 << (i % 8);
        if value {
            self.bytes[i / 8] |= mask;
        } else {
            self.bytes[i / 8] &= !mask;
        }
    }

    pub fn get(&self, i: usize) -> bool {
        i < self.len && self.bytes[i / 8] & (1u8 << (i % 8)) != 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Places values contiguously into one caller buffer.
///
/// The first value that does not fit exhausts the writer: it and every
/// later value report [`ItemSize::TooSmall`], even ones small enough to fit
/// the remaining gap, so that delivered items always form a prefix.
pub struct PackedWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
    exhausted: bool,
}

impl<'a> PackedWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            exhausted: false,
        }
    }

    pub fn write(&mut self, value: &[u8]) -> ItemSize {
        if self.exhausted || value.len() > self.buf.len() - self.offset {
            self.exhausted = true;
            return ItemSize::TooSmall;
        }
        self.buf[self.offset..self.offset + value.len()].copy_from_slice(value);
        self.offset += value.len();
        ItemSize::Size(value.len())
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.offset
    }
}
