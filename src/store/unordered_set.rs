use std::collections::HashSet;
use std::sync::RwLock;

use super::{check_batch, FetchFn, KeyValue, KeyValueStore};
use crate::encoding::format::Raw;
use crate::error::{Error, Result};
use crate::mode::Mode;

/// Hash-based in-memory set of keys. Values are empty as in
/// [`SetStore`](super::SetStore), and like
/// [`UnorderedMapStore`](super::UnorderedMapStore) it cannot list.
#[derive(Debug, Default)]
pub struct UnorderedSetStore {
    keys: RwLock<HashSet<Vec<u8>>>,
}

impl UnorderedSetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for UnorderedSetStore {
    fn name(&self) -> &'static str {
        "unordered_set"
    }

    fn is_sorted(&self) -> bool {
        false
    }

    fn supported_modes(&self) -> Mode {
        Mode::CONSUME | Mode::NEW_ONLY | Mode::EXIST_ONLY
    }

    fn count(&self) -> Result<usize> {
        Ok(self.keys.read()?.len())
    }

    fn put_multi(&self, mode: Mode, keys: &[&[u8]], values: &[&[u8]]) -> Result<()> {
        check_batch(keys.len(), values.len(), "values")?;
        self.check_mode(mode)?;
        if let Some(i) = values.iter().position(|v| !v.is_empty()) {
            return Err(Error::InvalidArgument(format!(
                "unordered_set backend stores keys only, got a value for {}",
                Raw::truncated(keys[i], 64)
            )));
        }
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
                f(i, key, set.contains(*key).then_some(b"".as_slice()))?;
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

    fn list(&self, _: Mode, _: &[u8], _: &[u8], _: usize) -> Result<Vec<KeyValue>> {
        Err(Error::Unsupported(
            "listing keys of an unordered_set backend".into(),
        ))
    }
}
