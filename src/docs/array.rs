//! In-memory document collections kept as dense arrays.
//!
//! Each collection appends document bytes to one buffer and indexes them
//! through a slot table addressed by id. Erasing clears a slot, so ids are
//! never reused. An update that fits the old bytes overwrites them;
//! otherwise the new bytes are appended and the old ones are stranded.
//!
//! ```text
//! slots: [ Some(0..5) | None | Some(5..12) | Some(12..14) ]
//! data:  |  doc 0  | doc 2  |doc 3|
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use super::{validate_collection_name, DocFetchFn, DocumentStore};
use crate::error::{Error, Result};
use crate::store::check_batch;
use crate::DocId;

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    len: usize,
}

#[derive(Debug, Default)]
struct ArrayCollection {
    data: Vec<u8>,
    slots: Vec<Option<Slot>>,
    live: u64,
}

impl ArrayCollection {
    /// Slot index of a live document.
    fn index(&self, id: DocId) -> Option<usize> {
        let i = usize::try_from(id).ok()?;
        self.slots.get(i)?.as_ref().map(|_| i)
    }

    fn get(&self, id: DocId) -> Option<&[u8]> {
        let slot = self.slots[self.index(id)?]?;
        Some(&self.data[slot.offset..slot.offset + slot.len])
    }

    fn append(&mut self, doc: &[u8]) -> Slot {
        let slot = Slot {
            offset: self.data.len(),
            len: doc.len(),
        };
        self.data.extend_from_slice(doc);
        slot
    }

    fn replace(&mut self, i: usize, doc: &[u8]) {
        let slot = match self.slots[i] {
            Some(slot) if doc.len() <= slot.len => {
                self.data[slot.offset..slot.offset + doc.len()].copy_from_slice(doc);
                Slot {
                    offset: slot.offset,
                    len: doc.len(),
                }
            }
            _ => self.append(doc),
        };
        self.slots[i] = Some(slot);
    }

    fn stranded(&self) -> usize {
        let used: usize = self.slots.iter().flatten().map(|slot| slot.len).sum();
        self.data.len() - used
    }
}

/// Document backend holding every collection in memory.
#[derive(Debug, Default)]
pub struct ArrayStore {
    collections: RwLock<HashMap<String, ArrayCollection>>,
}

impl ArrayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the collection's buffer that no live document uses.
    pub fn stranded_bytes(&self, collection: &str) -> Result<usize> {
        self.read(collection, |coll| Ok(coll.stranded()))
    }

    fn read<T>(&self, collection: &str, f: impl FnOnce(&ArrayCollection) -> Result<T>) -> Result<T> {
        validate_collection_name(collection)?;
        let collections = self.collections.read()?;
        f(collections.get(collection).ok_or(Error::NotFound)?)
    }

    fn write<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut ArrayCollection) -> Result<T>,
    ) -> Result<T> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write()?;
        f(collections.get_mut(collection).ok_or(Error::NotFound)?)
    }
}

impl DocumentStore for ArrayStore {
    fn name(&self) -> &'static str {
        "array"
    }

    fn collection_create(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write()?;
        if collections.contains_key(collection) {
            return Err(Error::AlreadyExists(format!("collection {}", collection)));
        }
        collections.insert(collection.to_string(), ArrayCollection::default());
        tracing::info!(collection = %collection, backend = "array", "Created collection");
        Ok(())
    }

    fn collection_drop(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let dropped = self
            .collections
            .write()?
            .remove(collection)
            .ok_or(Error::NotFound)?;
        tracing::info!(collection = %collection, documents = dropped.live, "Dropped collection");
        Ok(())
    }

    fn collection_exists(&self, collection: &str) -> Result<bool> {
        validate_collection_name(collection)?;
        Ok(self.collections.read()?.contains_key(collection))
    }

    fn collection_size(&self, collection: &str) -> Result<u64> {
        self.read(collection, |coll| Ok(coll.live))
    }

    fn collection_last_id(&self, collection: &str) -> Result<DocId> {
        self.read(collection, |coll| Ok(coll.slots.len() as DocId))
    }

    fn store_multi(&self, collection: &str, documents: &[&[u8]], ids: &mut [DocId]) -> Result<()> {
        check_batch(documents.len(), ids.len(), "ids")?;
        self.write(collection, |coll| {
            coll.data.reserve(documents.iter().map(|doc| doc.len()).sum());
            for (doc, id) in documents.iter().zip(ids.iter_mut()) {
                *id = coll.slots.len() as DocId;
                let slot = coll.append(doc);
                coll.slots.push(Some(slot));
                coll.live += 1;
            }
            Ok(())
        })
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
        self.write(collection, |coll| {
            for (i, flag) in updated.iter_mut().enumerate() {
                *flag = match coll.index(ids[i]) {
                    Some(slot) => {
                        coll.replace(slot, documents[i]);
                        true
                    }
                    None => false,
                };
            }
            Ok(())
        })
    }

    fn fetch_multi(&self, collection: &str, ids: &[DocId], f: &mut DocFetchFn<'_>) -> Result<()> {
        self.read(collection, |coll| {
            for (i, &id) in ids.iter().enumerate() {
                f(i, id, coll.get(id))?;
            }
            Ok(())
        })
    }

    fn erase_multi(&self, collection: &str, ids: &[DocId]) -> Result<()> {
        self.write(collection, |coll| {
            for &id in ids {
                if let Some(i) = coll.index(id) {
                    coll.slots[i] = None;
                    coll.live -= 1;
                }
            }
            Ok(())
        })
    }

    fn list(
        &self,
        collection: &str,
        from_id: DocId,
        inclusive: bool,
        max: usize,
    ) -> Result<Vec<(DocId, Vec<u8>)>> {
        self.read(collection, |coll| {
            let start = if inclusive {
                Some(from_id)
            } else {
                from_id.checked_add(1)
            };
            let Some(start) = start.and_then(|id| usize::try_from(id).ok()) else {
                return Ok(Vec::new());
            };
            Ok(coll
                .slots
                .iter()
                .enumerate()
                .skip(start)
                .filter_map(|(i, slot)| {
                    slot.as_ref()
                        .map(|s| (i as DocId, coll.data[s.offset..s.offset + s.len].to_vec()))
                })
                .take(max)
                .collect())
        })
    }
}
