use std::collections::VecDeque;

use super::{rewrite_key, KeyValue, KeyValueStore};
use crate::error::Result;
use crate::mode::Mode;

const DEFAULT_BATCH_SIZE: usize = 64;

/// Where an iteration starts and what it yields.
#[derive(Debug, Clone)]
pub struct IterOptions {
    pub mode: Mode,
    pub from_key: Vec<u8>,
    pub filter: Vec<u8>,
    pub batch_size: usize,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            mode: Mode::DEFAULT,
            from_key: Vec::new(),
            filter: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl IterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Resume after (or at, when `inclusive`) `key`.
    pub fn from_key(mut self, key: impl Into<Vec<u8>>, inclusive: bool) -> Self {
        self.from_key = key.into();
        if inclusive {
            self.mode |= Mode::INCLUSIVE;
        } else {
            self.mode = self.mode.difference(Mode::INCLUSIVE);
        }
        self
    }

    pub fn filter(mut self, filter: impl Into<Vec<u8>>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Pairs fetched per page; at least one.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Lazy iteration over a key-value store, one page at a time.
///
/// Each page is a snapshot of the store at the moment it is listed; the
/// next page resumes strictly after the last key of the previous one, so
/// keys inserted behind the cursor are not seen and nothing is repeated.
pub struct KeyValueIter<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
    options: IterOptions,
    cursor: Vec<u8>,
    first: bool,
    page: VecDeque<KeyValue>,
    exhausted: bool,
}

impl<'a, S: KeyValueStore + ?Sized> KeyValueIter<'a, S> {
    pub fn new(store: &'a S, options: IterOptions) -> Self {
        Self {
            store,
            cursor: options.from_key.clone(),
            options,
            first: true,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let mode = if self.first {
            self.options.mode
        } else {
            self.options.mode.difference(Mode::INCLUSIVE)
        };
        let page = self.store.list(
            mode,
            &self.cursor,
            &self.options.filter,
            self.options.batch_size,
        )?;
        self.first = false;
        if page.len() < self.options.batch_size {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.cursor = last.clone();
        }
        self.page.extend(page);
        Ok(())
    }
}

impl<S: KeyValueStore + ?Sized> Iterator for KeyValueIter<'_, S> {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (key, value) = self.page.pop_front()?;
        let last = self.page.is_empty();
        let key = rewrite_key(self.options.mode, &self.options.filter, key, last);
        Some(Ok((key, value)))
    }
}
