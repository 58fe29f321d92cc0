use std::collections::BTreeSet;
use std::sync::RwLock;

use super::{check_batch, scan_bounds, FetchFn, KeyValue, KeyValueStore};
use crate::encoding::format::Raw;
use crate::error::{Error, Result};
use crate::mode::{KeyFilter, Mode};

/// Ordered in-memory set of keys. Every value is empty: puts with a value
/// are rejected and present keys read back with length zero.
#[derive(Debug, Default)]
pub struct SetStore {
    keys: RwLock<BTreeSet<Vec<u8>>>,
}

impl SetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for SetStore {
    fn name(&self) -> &'static str {
        "set"
    }

    fn is_sorted(&self) -> bool {
        true
    }

    fn supported_modes(&self) -> Mode {
        Mode::INCLUSIVE
            | Mode::CONSUME
            | Mode::NEW_ONLY
            | Mode::EXIST_ONLY
            | Mode::NO_PREFIX
            | Mode::IGNORE_KEYS
            | Mode::KEEP_LAST
            | Mode::SUFFIX
    }

    fn count(&self) -> Result<usize> {
        Ok(self.keys.read()?.len())
    }

    fn put_multi(&self, mode: Mode, keys: &[&[u8]], values: &[&[u8]]) -> Result<()> {
        check_batch(keys.len(), values.len(), "values")?;
        self.check_mode(mode)?;
        if let Some(i) = values.iter().position(|v| !v.is_empty()) {
            return Err(Error::InvalidArgument(format!(
                "set backend stores keys only, got a value for {}",
                Raw::truncated(keys[i], 64)
            )));
        }
        // Inserting an existing key is a no-op, so NEW_ONLY needs no check.
        if mode.contains(Mode::EXIST_ONLY) {
            return Ok(());
        }
        let mut set = self.keys.write()?;
        for key in keys {
            if !set.contains(*key) {
                set.insert(key.to_vec());
            }
        }
        Ok(())
    }

    fn fetch_multi(&self, mode: Mode, keys: &[&[u8]], f: &mut FetchFn<'_>) -> Result<()> {
        self.check_mode(mode)?;
        {
            let set = self.keys.read()?;
            for (i, key) in keys.iter().enumerate() {
                let value = set.contains(*key).then_some(b"".as_slice());
                f(i, key, value)?;
            }
        }
        if mode.contains(Mode::CONSUME) {
            self.erase_multi(Mode::DEFAULT, keys)?;
        }
        Ok(())
    }

    fn erase_multi(&self, mode: Mode, keys: &[&[u8]]) -> Result<()> {
        self.check_mode(mode)?;
        let mut set = self.keys.write()?;
        for key in keys {
            set.remove(*key);
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
            let set = self.keys.read()?;
            set.range(range)
                .filter(|k| filter.matches(k))
                .take(max)
                .map(|k| (k.clone(), Vec::new()))
                .collect()
        };
        if mode.contains(Mode::CONSUME) {
            let keys: Vec<&[u8]> = page.iter().map(|(k, _)| k.as_slice()).collect();
            self.erase_multi(Mode::DEFAULT, &keys)?;
        }
        Ok(page)
    }
}
