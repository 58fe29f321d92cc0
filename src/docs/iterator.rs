use std::collections::VecDeque;

use super::DocumentStore;
use crate::error::Result;
use crate::DocId;

#[derive(Debug, Clone)]
pub struct DocIterOptions {
    pub from_id: DocId,
    pub inclusive: bool,
    pub batch_size: usize,
}

impl Default for DocIterOptions {
    fn default() -> Self {
        Self {
            from_id: 0,
            inclusive: true,
            batch_size: 64,
        }
    }
}

impl DocIterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_id(mut self, id: DocId, inclusive: bool) -> Self {
        self.from_id = id;
        self.inclusive = inclusive;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Lazy iteration over the live documents of a collection in id order,
/// fetched one page at a time.
pub struct DocumentIter<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    collection: &'a str,
    batch_size: usize,
    cursor: DocId,
    inclusive: bool,
    page: VecDeque<(DocId, Vec<u8>)>,
    exhausted: bool,
}

impl<'a, S: DocumentStore + ?Sized> DocumentIter<'a, S> {
    pub fn new(store: &'a S, collection: &'a str, options: DocIterOptions) -> Self {
        Self {
            store,
            collection,
            batch_size: options.batch_size,
            cursor: options.from_id,
            inclusive: options.inclusive,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let page = self
            .store
            .list(self.collection, self.cursor, self.inclusive, self.batch_size)?;
        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some((last, _)) = page.last() {
            self.cursor = *last;
            self.inclusive = false;
        }
        self.page.extend(page);
        Ok(())
    }
}

impl<S: DocumentStore + ?Sized> Iterator for DocumentIter<'_, S> {
    type Item = Result<(DocId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }
}
