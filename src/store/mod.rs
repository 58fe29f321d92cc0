//! The key-value backend contract.
//!
//! Every backend implements a handful of multi-key primitives
//! (`put_multi`, `fetch_multi`, `erase_multi`, `list`); the scalar and
//! packed shapes of each operation are provided on top of them so that all
//! three shapes share one set of semantics:
//!
//! ```text
//!   scalar  get(key)            ─┐
//!   multi   get_multi(keys)     ─┼─> fetch_multi(keys, callback)
//!   packed  get_packed(packed)  ─┘
//! ```
//!
//! Batch descriptors are validated before any item is touched; after that,
//! each item succeeds or fails on its own (a missing key yields
//! [`ItemSize::NotFound`] in its slot, never an error for the batch).

pub mod iterator;
pub mod map;
pub mod set;
pub mod unordered;
pub mod unordered_set;

pub use iterator::{IterOptions, KeyValueIter};
pub use map::MapStore;
pub use set::SetStore;
pub use unordered::UnorderedMapStore;
pub use unordered_set::UnorderedSetStore;

use std::ops::Bound;

use crate::encoding::{BitField, ItemSize, Packed, PackedWriter};
use crate::error::{Error, Result};
use crate::mode::Mode;

/// Callback receiving `(index, key, value)` for each key of a fetch, with
/// `None` for absent keys. The value is borrowed from the store.
pub type FetchFn<'f> = dyn FnMut(usize, &[u8], Option<&[u8]>) -> Result<()> + 'f;

/// A listed key-value pair as stored, before any mode-driven rewriting.
pub type KeyValue = (Vec<u8>, Vec<u8>);

pub trait KeyValueStore: Send + Sync {
    /// Backend name as used in configuration.
    fn name(&self) -> &'static str;

    /// Whether listings visit keys in ascending byte order.
    fn is_sorted(&self) -> bool;

    fn supported_modes(&self) -> Mode;

    /// Number of keys in the store.
    fn count(&self) -> Result<usize>;

    /// Stores `values[i]` at `keys[i]`, honoring `APPEND`, `NEW_ONLY` and
    /// `EXIST_ONLY`.
    fn put_multi(&self, mode: Mode, keys: &[&[u8]], values: &[&[u8]]) -> Result<()>;

    /// Calls `f` once per key, in input order. Under `CONSUME` the present
    /// keys are erased once every callback has run.
    fn fetch_multi(&self, mode: Mode, keys: &[&[u8]], f: &mut FetchFn<'_>) -> Result<()>;

    /// Removes the keys; absent keys are ignored.
    fn erase_multi(&self, mode: Mode, keys: &[&[u8]]) -> Result<()>;

    /// One page of at most `max` pairs with keys after `from_key` (or at it
    /// under `INCLUSIVE`) matching `filter`. An empty `from_key` starts at
    /// the beginning. Keys are returned as stored; `NO_PREFIX` and
    /// `IGNORE_KEYS` are applied by the callers. Under `CONSUME` the returned
    /// pairs are erased.
    fn list(&self, mode: Mode, from_key: &[u8], filter: &[u8], max: usize)
        -> Result<Vec<KeyValue>>;

    fn check_mode(&self, mode: Mode) -> Result<()> {
        let unsupported = mode.difference(self.supported_modes());
        if unsupported.is_empty() {
            Ok(())
        } else {
            Err(Error::Unsupported(format!(
                "{:?} on {} backend",
                unsupported,
                self.name()
            )))
        }
    }

    fn exists_multi(&self, mode: Mode, keys: &[&[u8]], found: &mut BitField) -> Result<()> {
        check_batch(keys.len(), found.len(), "exists flags")?;
        self.fetch_multi(mode.difference(Mode::CONSUME), keys, &mut |i, _, value| {
            found.set(i, value.is_some());
            Ok(())
        })
    }

    fn length_multi(&self, mode: Mode, keys: &[&[u8]], sizes: &mut [ItemSize]) -> Result<()> {
        check_batch(keys.len(), sizes.len(), "sizes")?;
        self.fetch_multi(mode.difference(Mode::CONSUME), keys, &mut |i, _, value| {
            sizes[i] = value.map_or(ItemSize::NotFound, |v| ItemSize::Size(v.len()));
            Ok(())
        })
    }

    /// Copies each value into its own caller buffer. A buffer smaller than
    /// its value reports [`ItemSize::TooSmall`] and is left untouched. Under
    /// `CONSUME` only delivered values are erased.
    fn get_multi(
        &self,
        mode: Mode,
        keys: &[&[u8]],
        values: &mut [&mut [u8]],
        sizes: &mut [ItemSize],
    ) -> Result<()> {
        check_batch(keys.len(), values.len(), "value buffers")?;
        check_batch(keys.len(), sizes.len(), "sizes")?;
        self.check_mode(mode)?;
        self.fetch_multi(mode.difference(Mode::CONSUME), keys, &mut |i, _, value| {
            sizes[i] = match value {
                None => ItemSize::NotFound,
                Some(v) if v.len() > values[i].len() => ItemSize::TooSmall,
                Some(v) => {
                    values[i][..v.len()].copy_from_slice(v);
                    ItemSize::Size(v.len())
                }
            };
            Ok(())
        })?;
        consume_delivered(self, mode, keys, sizes)
    }

    /// Writes the values back to back into `out`. Returns the bytes used.
    fn get_packed(
        &self,
        mode: Mode,
        keys: &Packed<'_>,
        out: &mut [u8],
        sizes: &mut [ItemSize],
    ) -> Result<usize> {
        check_batch(keys.len(), sizes.len(), "sizes")?;
        self.check_mode(mode)?;
        let keys = keys.to_slices();
        let mut writer = PackedWriter::new(out);
        self.fetch_multi(mode.difference(Mode::CONSUME), &keys, &mut |i, _, value| {
            sizes[i] = value.map_or(ItemSize::NotFound, |v| writer.write(v));
            Ok(())
        })?;
        let written = writer.written();
        consume_delivered(self, mode, &keys, sizes)?;
        Ok(written)
    }

    fn put_packed(&self, mode: Mode, keys: &Packed<'_>, values: &Packed<'_>) -> Result<()> {
        check_batch(keys.len(), values.len(), "values")?;
        self.put_multi(mode, &keys.to_slices(), &values.to_slices())
    }

    fn exists_packed(&self, mode: Mode, keys: &Packed<'_>, found: &mut BitField) -> Result<()> {
        self.exists_multi(mode, &keys.to_slices(), found)
    }

    fn length_packed(&self, mode: Mode, keys: &Packed<'_>, sizes: &mut [ItemSize]) -> Result<()> {
        self.length_multi(mode, &keys.to_slices(), sizes)
    }

    fn erase_packed(&self, mode: Mode, keys: &Packed<'_>) -> Result<()> {
        self.erase_multi(mode, &keys.to_slices())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_multi(Mode::DEFAULT, &[key], &[value])
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut out = None;
        self.fetch_multi(Mode::DEFAULT, &[key], &mut |_, _, value| {
            out = value.map(<[u8]>::to_vec);
            Ok(())
        })?;
        out.ok_or(Error::NotFound)
    }

    /// Copies the value into `buf`, failing with `BufferTooSmall` rather
    /// than truncating.
    fn get_into(&self, key: &[u8], buf: &mut [u8]) -> Result<usize> {
        let mut sizes = [ItemSize::NotFound];
        self.get_multi(Mode::DEFAULT, &[key], &mut [buf], &mut sizes)?;
        match sizes[0] {
            ItemSize::Size(n) => Ok(n),
            ItemSize::TooSmall => Err(Error::BufferTooSmall),
            _ => Err(Error::NotFound),
        }
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        let mut found = BitField::with_len(1);
        self.exists_multi(Mode::DEFAULT, &[key], &mut found)?;
        Ok(found.get(0))
    }

    fn length(&self, key: &[u8]) -> Result<usize> {
        let mut sizes = [ItemSize::NotFound];
        self.length_multi(Mode::DEFAULT, &[key], &mut sizes)?;
        sizes[0].size().ok_or(Error::NotFound)
    }

    fn erase(&self, key: &[u8]) -> Result<()> {
        self.erase_multi(Mode::DEFAULT, &[key])
    }

    /// Listed keys, with the filter stripped under `NO_PREFIX`. The key
    /// modes apply as in [`KeyValueStore::list_keyvals`].
    fn list_keys(
        &self,
        mode: Mode,
        from_key: &[u8],
        filter: &[u8],
        max: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let page = self.list(mode, from_key, filter, max)?;
        let last = page.len().saturating_sub(1);
        Ok(page
            .into_iter()
            .enumerate()
            .map(|(i, (key, _))| rewrite_key(mode, filter, key, i == last))
            .collect())
    }

    /// Listed pairs; keys are stripped under `NO_PREFIX` and emptied under
    /// `IGNORE_KEYS`, all but the last one under `KEEP_LAST`.
    fn list_keyvals(
        &self,
        mode: Mode,
        from_key: &[u8],
        filter: &[u8],
        max: usize,
    ) -> Result<Vec<KeyValue>> {
        let page = self.list(mode, from_key, filter, max)?;
        let last = page.len().saturating_sub(1);
        Ok(page
            .into_iter()
            .enumerate()
            .map(|(i, (key, value))| (rewrite_key(mode, filter, key, i == last), value))
            .collect())
    }

    /// Lists up to `sizes.len()` keys into `out`. Slots past the last key
    /// report [`ItemSize::NoMore`]. Returns the bytes used.
    fn list_keys_packed(
        &self,
        mode: Mode,
        from_key: &[u8],
        filter: &[u8],
        out: &mut [u8],
        sizes: &mut [ItemSize],
    ) -> Result<usize> {
        let keys = self.list_keys(mode, from_key, filter, sizes.len())?;
        let mut writer = PackedWriter::new(out);
        for (slot, size) in sizes.iter_mut().enumerate() {
            *size = keys.get(slot).map_or(ItemSize::NoMore, |k| writer.write(k));
        }
        Ok(writer.written())
    }

    /// Lists up to `key_sizes.len()` pairs. Keys and values are packed into
    /// separate buffers, each exhausting independently. Returns the bytes
    /// used in each.
    fn list_keyvals_packed(
        &self,
        mode: Mode,
        from_key: &[u8],
        filter: &[u8],
        keys_out: &mut [u8],
        key_sizes: &mut [ItemSize],
        values_out: &mut [u8],
        value_sizes: &mut [ItemSize],
    ) -> Result<(usize, usize)> {
        check_batch(key_sizes.len(), value_sizes.len(), "value sizes")?;
        let pairs = self.list_keyvals(mode, from_key, filter, key_sizes.len())?;
        let mut keys = PackedWriter::new(keys_out);
        let mut values = PackedWriter::new(values_out);
        for slot in 0..key_sizes.len() {
            match pairs.get(slot) {
                Some((key, value)) => {
                    key_sizes[slot] = keys.write(key);
                    value_sizes[slot] = values.write(value);
                }
                None => {
                    key_sizes[slot] = ItemSize::NoMore;
                    value_sizes[slot] = ItemSize::NoMore;
                }
            }
        }
        Ok((keys.written(), values.written()))
    }
}

/// Lazy paging iteration, for concrete stores and trait objects alike.
pub trait KeyValueStoreExt: KeyValueStore {
    fn iter(&self, options: IterOptions) -> KeyValueIter<'_, Self> {
        KeyValueIter::new(self, options)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

/// Fails a call whose parallel arrays disagree in length.
pub(crate) fn check_batch(expected: usize, actual: usize, what: &str) -> Result<()> {
    if expected != actual {
        return Err(Error::InvalidArgument(format!(
            "batch of {} items but {} {}",
            expected, actual, what
        )));
    }
    Ok(())
}

fn consume_delivered<S: KeyValueStore + ?Sized>(
    store: &S,
    mode: Mode,
    keys: &[&[u8]],
    sizes: &[ItemSize],
) -> Result<()> {
    if !mode.contains(Mode::CONSUME) {
        return Ok(());
    }
    let delivered: Vec<&[u8]> = keys
        .iter()
        .zip(sizes)
        .filter(|(_, size)| size.is_found())
        .map(|(key, _)| *key)
        .collect();
    store.erase_multi(Mode::DEFAULT, &delivered)
}

/// Applies the listing key modes to one listed key. `last` marks the final
/// pair of a page, whose key survives `KEEP_LAST`.
pub(crate) fn rewrite_key(mode: Mode, filter: &[u8], key: Vec<u8>, last: bool) -> Vec<u8> {
    if mode.contains(Mode::IGNORE_KEYS) && !(last && mode.contains(Mode::KEEP_LAST)) {
        Vec::new()
    } else if mode.contains(Mode::NO_PREFIX) {
        crate::mode::KeyFilter::new(filter, mode).strip(&key).to_vec()
    } else {
        key
    }
}

/// The exclusive upper bound of all keys starting with `prefix`.
pub(crate) fn prefix_end(prefix: &[u8]) -> Bound<Vec<u8>> {
    match prefix.iter().rposition(|b| *b != 0xff) {
        Some(i) => Bound::Excluded(
            prefix[..i]
                .iter()
                .chain(std::iter::once(&(prefix[i] + 1)))
                .copied()
                .collect::<Vec<u8>>(),
        ),
        None => Bound::Unbounded,
    }
}

/// Range bounds for an ordered listing: start at `from_key` (or at the
/// filter prefix when that comes later), stop after the prefix. `None`
/// when `from_key` is already past the prefix.
pub(crate) fn scan_bounds(
    mode: Mode,
    from_key: &[u8],
    prefix: &[u8],
) -> Option<(Bound<Vec<u8>>, Bound<Vec<u8>>)> {
    let start = if from_key.is_empty() || from_key < prefix {
        if prefix.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(prefix.to_vec())
        }
    } else if mode.contains(Mode::INCLUSIVE) {
        Bound::Included(from_key.to_vec())
    } else {
        Bound::Excluded(from_key.to_vec())
    };
    let end = if prefix.is_empty() {
        Bound::Unbounded
    } else {
        prefix_end(prefix)
    };
    if let (Bound::Included(s) | Bound::Excluded(s), Bound::Excluded(e)) = (&start, &end) {
        if s >= e {
            return None;
        }
    }
    Some((start, end))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"matt"), Bound::Excluded(b"matu".to_vec()));
        assert_eq!(prefix_end(b"a\xff"), Bound::Excluded(b"b".to_vec()));
        assert_eq!(prefix_end(b"\xff\xff"), Bound::Unbounded);
    }

    #[test]
    fn test_scan_bounds() {
        assert_eq!(
            scan_bounds(Mode::DEFAULT, b"", b""),
            Some((Bound::Unbounded, Bound::Unbounded))
        );

        let start = scan_bounds(Mode::DEFAULT, b"a", b"matt").map(|(s, _)| s);
        assert_eq!(start, Some(Bound::Included(b"matt".to_vec())));

        assert_eq!(
            scan_bounds(Mode::INCLUSIVE, b"matthew", b"matt"),
            Some((
                Bound::Included(b"matthew".to_vec()),
                Bound::Excluded(b"matu".to_vec())
            ))
        );

        let start = scan_bounds(Mode::DEFAULT, b"matthew", b"matt").map(|(s, _)| s);
        assert_eq!(start, Some(Bound::Excluded(b"matthew".to_vec())));

        // Resuming past the prefix yields nothing instead of an inverted range.
        assert_eq!(scan_bounds(Mode::DEFAULT, b"phil", b"matt"), None);
        assert_eq!(scan_bounds(Mode::INCLUSIVE, b"matu", b"matt"), None);
    }

    pub(crate) const NAMES: [&str; 8] = [
        "matthew", "matthias", "mattie", "phil", "philip", "phillipa", "alice", "bob",
    ];

    /// Shared conformance suite run against every key-value backend.
    pub(crate) fn exercise_batches(store: &dyn KeyValueStore) -> Result<()> {
        let value_of = |k: &str| -> Vec<u8> {
            if store.name().ends_with("set") {
                Vec::new()
            } else {
                format!("value-of-{}", k).into_bytes()
            }
        };

        // Put every other name; the rest stay absent.
        let present: Vec<&str> = NAMES.iter().copied().step_by(2).collect();
        let values: Vec<Vec<u8>> = present.iter().map(|k| value_of(*k)).collect();
        let keys: Vec<&[u8]> = present.iter().map(|k| k.as_bytes()).collect();
        let vals: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
        store.put_multi(Mode::DEFAULT, &keys, &vals)?;
        assert_eq!(store.count()?, present.len());

        let mut rng = StdRng::seed_from_u64(7);
        let mut order: Vec<&str> = NAMES.to_vec();
        for _ in 0..4 {
            order.shuffle(&mut rng);
            let keys: Vec<&[u8]> = order.iter().map(|k| k.as_bytes()).collect();

            let mut found = BitField::with_len(keys.len());
            store.exists_multi(Mode::DEFAULT, &keys, &mut found)?;
            let mut sizes = vec![ItemSize::NotFound; keys.len()];
            store.length_multi(Mode::DEFAULT, &keys, &mut sizes)?;

            let mut bufs = vec![vec![0u8; 64]; keys.len()];
            let mut slots: Vec<&mut [u8]> = bufs.iter_mut().map(Vec::as_mut_slice).collect();
            let mut got = vec![ItemSize::NotFound; keys.len()];
            store.get_multi(Mode::DEFAULT, &keys, &mut slots, &mut got)?;

            let packed_keys: crate::encoding::PackedBuf = keys.iter().collect();
            let mut out = vec![0u8; 1024];
            let mut packed_sizes = vec![ItemSize::NotFound; keys.len()];
            store.get_packed(
                Mode::DEFAULT,
                &packed_keys.as_packed(),
                &mut out,
                &mut packed_sizes,
            )?;

            let mut offset = 0;
            for (i, name) in order.iter().enumerate() {
                let expected = present.contains(name).then(|| value_of(*name));
                assert_eq!(found.get(i), expected.is_some(), "exists {}", name);
                match &expected {
                    Some(v) => {
                        assert_eq!(sizes[i], ItemSize::Size(v.len()));
                        assert_eq!(got[i], ItemSize::Size(v.len()));
                        assert_eq!(&bufs[i][..v.len()], v.as_slice());
                        assert_eq!(packed_sizes[i], ItemSize::Size(v.len()));
                        assert_eq!(&out[offset..offset + v.len()], v.as_slice());
                        offset += v.len();
                    }
                    None => {
                        assert_eq!(sizes[i], ItemSize::NotFound);
                        assert_eq!(got[i], ItemSize::NotFound);
                        assert_eq!(packed_sizes[i], ItemSize::NotFound);
                    }
                }
            }
        }

        // Mismatched descriptors fail before touching anything.
        let mut sizes = vec![ItemSize::NotFound; 1];
        assert!(matches!(
            store.length_multi(Mode::DEFAULT, &keys, &mut sizes),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.put_multi(Mode::DEFAULT, &[&b"x"[..]], &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!store.exists(b"x")?);

        store.erase_multi(Mode::DEFAULT, &[&b"matthew"[..], &b"nobody"[..]])?;
        assert!(matches!(store.get(b"matthew"), Err(Error::NotFound)));
        assert_eq!(store.count()?, present.len() - 1);
        Ok(())
    }
}
