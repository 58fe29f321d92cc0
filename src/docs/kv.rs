//! Document collections layered over an ordinary key-value store.
//!
//! Each document is stored at [`DocKey`] `collection ‖ 0x00 ‖ id`; the
//! collection record `{size, next_id}` lives at the bare collection name.
//! Mutations that touch the record are serialized by one lock; reads go
//! straight to the key-value store.

use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{validate_collection_name, DocFetchFn, DocumentStore};
use crate::encoding::keycode::DocKey;
use crate::encoding::{BitField, Key, Value};
use crate::error::{Error, Result};
use crate::mode::Mode;
use crate::store::{check_batch, KeyValueStore};
use crate::DocId;

const DROP_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CollectionRecord {
    size: u64,
    next_id: DocId,
}

pub struct KvDocumentStore<S> {
    kv: S,
    records: Mutex<()>,
}

impl<S: KeyValueStore> KvDocumentStore<S> {
    pub fn new(kv: S) -> Self {
        Self {
            kv,
            records: Mutex::new(()),
        }
    }

    /// The underlying key-value store, which shares its key space with the
    /// collections.
    pub fn key_values(&self) -> &S {
        &self.kv
    }

    fn try_record(&self, collection: &str) -> Result<Option<CollectionRecord>> {
        validate_collection_name(collection)?;
        match self.kv.get(collection.as_bytes()) {
            Ok(bytes) => Ok(Some(CollectionRecord::decode(&bytes)?)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn record(&self, collection: &str) -> Result<CollectionRecord> {
        self.try_record(collection)?.ok_or(Error::NotFound)
    }

    fn write_record(&self, collection: &str, record: &CollectionRecord) -> Result<()> {
        self.kv.put(collection.as_bytes(), &record.encode()?)
    }

    fn doc_keys(collection: &str, ids: &[DocId]) -> Vec<Vec<u8>> {
        ids.iter()
            .map(|&id| DocKey::new(collection, id).encode())
            .collect()
    }

    fn present(&self, keys: &[Vec<u8>]) -> Result<BitField> {
        let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
        let mut found = BitField::with_len(keys.len());
        self.kv.exists_multi(Mode::DEFAULT, &refs, &mut found)?;
        Ok(found)
    }
}

impl<S: KeyValueStore> DocumentStore for KvDocumentStore<S> {
    fn name(&self) -> &'static str {
        self.kv.name()
    }

    fn collection_create(&self, collection: &str) -> Result<()> {
        let _guard = self.records.lock()?;
        if self.try_record(collection)?.is_some() {
            return Err(Error::AlreadyExists(format!("collection {}", collection)));
        }
        self.write_record(collection, &CollectionRecord::default())?;
        tracing::info!(collection = %collection, backend = self.kv.name(), "Created collection");
        Ok(())
    }

    fn collection_drop(&self, collection: &str) -> Result<()> {
        let _guard = self.records.lock()?;
        let record = self.record(collection)?;

        if self.kv.is_sorted() {
            let prefix = DocKey::prefix(collection);
            loop {
                let keys = self.kv.list_keys(Mode::DEFAULT, b"", &prefix, DROP_BATCH)?;
                let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
                self.kv.erase_multi(Mode::DEFAULT, &refs)?;
                if keys.len() < DROP_BATCH {
                    break;
                }
            }
        } else {
            let ids: Vec<DocId> = (0..record.next_id).collect();
            for batch in ids.chunks(DROP_BATCH) {
                let keys = Self::doc_keys(collection, batch);
                let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
                self.kv.erase_multi(Mode::DEFAULT, &refs)?;
            }
        }
        self.kv.erase(collection.as_bytes())?;
        tracing::info!(collection = %collection, documents = record.size, "Dropped collection");
        Ok(())
    }

    fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.try_record(collection)?.is_some())
    }

    fn collection_size(&self, collection: &str) -> Result<u64> {
        Ok(self.record(collection)?.size)
    }

    fn collection_last_id(&self, collection: &str) -> Result<DocId> {
        Ok(self.record(collection)?.next_id)
    }

    fn store_multi(&self, collection: &str, documents: &[&[u8]], ids: &mut [DocId]) -> Result<()> {
        check_batch(documents.len(), ids.len(), "ids")?;
        let _guard = self.records.lock()?;
        let mut record = self.record(collection)?;

        let first = record.next_id;
        for (i, id) in ids.iter_mut().enumerate() {
            *id = first + i as DocId;
        }
        let keys = Self::doc_keys(collection, ids);
        let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
        self.kv.put_multi(Mode::DEFAULT, &refs, documents)?;

        record.next_id += documents.len() as DocId;
        record.size += documents.len() as u64;
        self.write_record(collection, &record)
    }

    fn update_multi(
        &self,
        collection: &str,
        ids: &[DocId],
        documents: &[&[u8]],
        updated: &mut [bool],
    ) -> Result<()> {
        check_batch(ids.len(), documents.len(), "documents")?;
        check_batch(ids.len(), updated.len(), "update flags")?;
        let _guard = self.records.lock()?;
        self.record(collection)?;

        let keys = Self::doc_keys(collection, ids);
        let found = self.present(&keys)?;
        let mut refs = Vec::new();
        let mut docs = Vec::new();
        for (i, flag) in updated.iter_mut().enumerate() {
            *flag = found.get(i);
            if *flag {
                refs.push(keys[i].as_slice());
                docs.push(documents[i]);
            }
        }
        self.kv.put_multi(Mode::DEFAULT, &refs, &docs)
    }

    fn fetch_multi(&self, collection: &str, ids: &[DocId], f: &mut DocFetchFn<'_>) -> Result<()> {
        self.record(collection)?;
        let keys = Self::doc_keys(collection, ids);
        let refs: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
        self.kv
            .fetch_multi(Mode::DEFAULT, &refs, &mut |i, _, doc| f(i, ids[i], doc))
    }

    fn erase_multi(&self, collection: &str, ids: &[DocId]) -> Result<()> {
        let _guard = self.records.lock()?;
        let mut record = self.record(collection)?;

        let keys = Self::doc_keys(collection, ids);
        let found = self.present(&keys)?;
        let live: BTreeSet<&[u8]> = keys
            .iter()
            .enumerate()
            .filter(|(i, _)| found.get(*i))
            .map(|(_, k)| k.as_slice())
            .collect();
        let refs: Vec<&[u8]> = live.iter().copied().collect();
        self.kv.erase_multi(Mode::DEFAULT, &refs)?;

        record.size -= live.len() as u64;
        self.write_record(collection, &record)
    }

    fn list(
        &self,
        collection: &str,
        from_id: DocId,
        inclusive: bool,
        max: usize,
    ) -> Result<Vec<(DocId, Vec<u8>)>> {
        let record = self.record(collection)?;

        if self.kv.is_sorted() {
            let mode = if inclusive {
                Mode::INCLUSIVE
            } else {
                Mode::DEFAULT
            };
            let from = DocKey::new(collection, from_id).encode();
            let page = self
                .kv
                .list(mode, &from, &DocKey::prefix(collection), max)?;
            return page
                .into_iter()
                .map(|(key, doc)| Ok((DocKey::decode(&key)?.id, doc)))
                .collect();
        }

        // Without key order, check ids one window at a time.
        let start = if inclusive {
            from_id
        } else {
            from_id.saturating_add(1)
        };
        let mut page = Vec::new();
        let mut next = start;
        while page.len() < max && next < record.next_id {
            let end = record.next_id.min(next.saturating_add(max as DocId));
            let ids: Vec<DocId> = (next..end).collect();
            self.fetch_multi(collection, &ids, &mut |_, id, doc| {
                if let Some(doc) = doc {
                    if page.len() < max {
                        page.push((id, doc.to_vec()));
                    }
                }
                Ok(())
            })?;
            next = end;
        }
        Ok(page)
    }
}
