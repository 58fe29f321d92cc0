use std::collections::HashMap;
use std::sync::RwLock;

use super::map::put_one;
use super::{check_batch, FetchFn, KeyValue, KeyValueStore};
use crate::error::{Error, Result};
use crate::mode::Mode;

/// Hash-based in-memory key-value store. It has no key order, so it cannot
/// list or iterate.
#[derive(Debug, Default)]
pub struct UnorderedMapStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl UnorderedMapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for UnorderedMapStore {
    fn name(&self) -> &'static str {
        "unordered_map"
    }

    fn is_sorted(&self) -> bool {
        false
    }

    fn supported_modes(&self) -> Mode {
        Mode::APPEND | Mode::CONSUME | Mode::NEW_ONLY | Mode::EXIST_ONLY
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

    fn list(&self, _: Mode, _: &[u8], _: &[u8], _: usize) -> Result<Vec<KeyValue>> {
        Err(Error::Unsupported(
            "listing keys of an unordered_map backend".into(),
        ))
    }
}
