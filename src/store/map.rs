use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{check_batch, scan_bounds, FetchFn, KeyValue, KeyValueStore};
use crate::encoding::format::Raw;
use crate::error::Result;
use crate::mode::{KeyFilter, Mode};

/// Ordered in-memory key-value store.
#[derive(Debug, Default)]
pub struct MapStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Applies one put under `mode` to an ordered or unordered map.
macro_rules! put_one {
    ($map:expr, $mode:expr, $key:expr, $value:expr) => {{
        match $map.get_mut($key) {
            Some(existing) => {
                if $mode.contains(Mode::NEW_ONLY) {
                    // keep the existing value
                } else if $mode.contains(Mode::APPEND) {
                    existing.extend_from_slice($value);
                } else {
                    existing.clear();
                    existing.extend_from_slice($value);
                }
            }
            None => {
                if !$mode.contains(Mode::EXIST_ONLY) {
                    $map.insert($key.to_vec(), $value.to_vec());
                }
            }
        }
    }};
}
pub(crate) use put_one;

impl KeyValueStore for MapStore {
    fn name(&self) -> &'static str {
        "map"
    }

    fn is_sorted(&self) -> bool {
        true
    }

    fn supported_modes(&self) -> Mode {
        Mode::INCLUSIVE
            | Mode::APPEND
            | Mode::CONSUME
            | Mode::NEW_ONLY
            | Mode::EXIST_ONLY
            | Mode::NO_PREFIX
            | Mode::IGNORE_KEYS
            | Mode::KEEP_LAST
            | Mode::SUFFIX
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries.read()?.len())
    }

    fn put_multi(&self, mode: Mode, keys: &[&[u8]], values: &[&[u8]]) -> Result<()> {
        check_batch(keys.len(), values.len(), "values")?;
        self.check_mode(mode)?;
        let mut entries = self.entries.write()?;
        for (key, value) in keys.iter().zip(values) {
            put_one!(entries, mode, *key, *value);
        }
        Ok(())
    }

    fn fetch_multi(&self, mode: Mode, keys: &[&[u8]], f: &mut FetchFn<'_>) -> Result<()> {
        self.check_mode(mode)?;
        {
            let entries = self.entries.read()?;
            for (i, key) in keys.iter().enumerate() {
                f(i, key, entries.get(*key).map(Vec::as_slice))?;
            }
        }
        if mode.contains(Mode::CONSUME) {
            self.erase_multi(Mode::DEFAULT, keys)?;
        }
        Ok(())
    }

    fn erase_multi(&self, mode: Mode, keys: &[&[u8]]) -> Result<()> {
        self.check_mode(mode)?;
        let mut entries = self.entries.write()?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    fn list(
        &self,
        mode: Mode,
        from_key: &[u8],
        filter: &[u8],
        max: usize,
    ) -> Result<Vec<KeyValue>> {
        self.check_mode(mode)?;
        let filter = KeyFilter::new(filter, mode);
        let Some(range) = scan_bounds(mode, from_key, filter.scan_prefix()) else {
            return Ok(Vec::new());
        };

        let page: Vec<KeyValue> = {
            let entries = self.entries.read()?;
            entries
                .range(range)
                .filter(|(k, _)| filter.matches(k))
                .take(max)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        if mode.contains(Mode::CONSUME) {
            let keys: Vec<&[u8]> = page.iter().map(|(k, _)| k.as_slice()).collect();
            self.erase_multi(Mode::DEFAULT, &keys)?;
            tracing::debug!(keys = %Raw::list(keys.iter().copied()), "Consumed listed keys");
        }
        Ok(page)
    }
}
