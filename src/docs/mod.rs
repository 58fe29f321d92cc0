//! The document collection contract.
//!
//! Collections hold opaque documents addressed by dense ids that the store
//! assigns on `store`. Ids grow monotonically and are never reused: erasing
//! a document leaves a hole. As with key-value stores, backends implement
//! multi-document primitives and the scalar and packed shapes are derived
//! from them.

pub mod array;
pub mod iterator;
pub mod kv;

pub use array::ArrayStore;
pub use iterator::{DocIterOptions, DocumentIter};
pub use kv::KvDocumentStore;

use crate::encoding::{BitField, ItemSize, Packed, PackedWriter};
use crate::error::{Error, Result};
use crate::store::check_batch;
use crate::DocId;

/// Callback receiving `(index, id, document)` for each requested id.
pub type DocFetchFn<'f> = dyn FnMut(usize, DocId, Option<&[u8]>) -> Result<()> + 'f;

pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with `AlreadyExists` if the collection exists.
    fn collection_create(&self, collection: &str) -> Result<()>;

    /// Removes the collection and every document in it.
    fn collection_drop(&self, collection: &str) -> Result<()>;

    fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Number of live documents.
    fn collection_size(&self, collection: &str) -> Result<u64>;

    /// The id the next stored document will receive.
    fn collection_last_id(&self, collection: &str) -> Result<DocId>;

    /// Stores the documents under fresh ids, written to `ids` in input order.
    fn store_multi(&self, collection: &str, documents: &[&[u8]], ids: &mut [DocId]) -> Result<()>;

    /// Replaces existing documents. `updated[i]` tells whether `ids[i]`
    /// existed; absent ids are never created.
    fn update_multi(
        &self,
        collection: &str,
        ids: &[DocId],
        documents: &[&[u8]],
        updated: &mut [bool],
    ) -> Result<()>;

    /// Calls `f` once per id, in input order, with the borrowed document.
    fn fetch_multi(&self, collection: &str, ids: &[DocId], f: &mut DocFetchFn<'_>) -> Result<()>;

    /// Erases the documents; absent ids are ignored.
    fn erase_multi(&self, collection: &str, ids: &[DocId]) -> Result<()>;

    /// One page of at most `max` live documents in id order, starting after
    /// `from_id` (or at it when `inclusive`).
    fn list(
        &self,
        collection: &str,
        from_id: DocId,
        inclusive: bool,
        max: usize,
    ) -> Result<Vec<(DocId, Vec<u8>)>>;

    fn store(&self, collection: &str, document: &[u8]) -> Result<DocId> {
        let mut ids = [0];
        self.store_multi(collection, &[document], &mut ids)?;
        Ok(ids[0])
    }

    fn store_packed(&self, collection: &str, documents: &Packed<'_>, ids: &mut [DocId]) -> Result<()> {
        self.store_multi(collection, &documents.to_slices(), ids)
    }

    fn update(&self, collection: &str, id: DocId, document: &[u8]) -> Result<()> {
        let mut updated = [false];
        self.update_multi(collection, &[id], &[document], &mut updated)?;
        if updated[0] {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    fn update_packed(
        &self,
        collection: &str,
        ids: &[DocId],
        documents: &Packed<'_>,
        updated: &mut [bool],
    ) -> Result<()> {
        self.update_multi(collection, ids, &documents.to_slices(), updated)
    }

    fn load(&self, collection: &str, id: DocId) -> Result<Vec<u8>> {
        let mut out = None;
        self.fetch_multi(collection, &[id], &mut |_, _, doc| {
            out = doc.map(<[u8]>::to_vec);
            Ok(())
        })?;
        out.ok_or(Error::NotFound)
    }

    /// Copies the document into `buf`, failing with `BufferTooSmall` rather
    /// than truncating.
    fn load_into(&self, collection: &str, id: DocId, buf: &mut [u8]) -> Result<usize> {
        let mut sizes = [ItemSize::NotFound];
        self.load_multi(collection, &[id], &mut [buf], &mut sizes)?;
        match sizes[0] {
            ItemSize::Size(n) => Ok(n),
            ItemSize::TooSmall => Err(Error::BufferTooSmall),
            _ => Err(Error::NotFound),
        }
    }

    /// Copies each document into its own caller buffer.
    fn load_multi(
        &self,
        collection: &str,
        ids: &[DocId],
        buffers: &mut [&mut [u8]],
        sizes: &mut [ItemSize],
    ) -> Result<()> {
        check_batch(ids.len(), buffers.len(), "document buffers")?;
        check_batch(ids.len(), sizes.len(), "sizes")?;
        self.fetch_multi(collection, ids, &mut |i, _, doc| {
            sizes[i] = match doc {
                None => ItemSize::NotFound,
                Some(d) if d.len() > buffers[i].len() => ItemSize::TooSmall,
                Some(d) => {
                    buffers[i][..d.len()].copy_from_slice(d);
                    ItemSize::Size(d.len())
                }
            };
            Ok(())
        })
    }

    /// Writes the documents back to back into `out`. Returns the bytes used.
    fn load_packed(
        &self,
        collection: &str,
        ids: &[DocId],
        out: &mut [u8],
        sizes: &mut [ItemSize],
    ) -> Result<usize> {
        check_batch(ids.len(), sizes.len(), "sizes")?;
        let mut writer = PackedWriter::new(out);
        self.fetch_multi(collection, ids, &mut |i, _, doc| {
            sizes[i] = doc.map_or(ItemSize::NotFound, |d| writer.write(d));
            Ok(())
        })?;
        Ok(writer.written())
    }

    fn length_multi(&self, collection: &str, ids: &[DocId], sizes: &mut [ItemSize]) -> Result<()> {
        check_batch(ids.len(), sizes.len(), "sizes")?;
        self.fetch_multi(collection, ids, &mut |i, _, doc| {
            sizes[i] = doc.map_or(ItemSize::NotFound, |d| ItemSize::Size(d.len()));
            Ok(())
        })
    }

    fn length(&self, collection: &str, id: DocId) -> Result<usize> {
        let mut sizes = [ItemSize::NotFound];
        self.length_multi(collection, &[id], &mut sizes)?;
        sizes[0].size().ok_or(Error::NotFound)
    }

    fn exists_multi(&self, collection: &str, ids: &[DocId], found: &mut BitField) -> Result<()> {
        check_batch(ids.len(), found.len(), "exists flags")?;
        self.fetch_multi(collection, ids, &mut |i, _, doc| {
            found.set(i, doc.is_some());
            Ok(())
        })
    }

    fn exists(&self, collection: &str, id: DocId) -> Result<bool> {
        let mut found = BitField::with_len(1);
        self.exists_multi(collection, &[id], &mut found)?;
        Ok(found.get(0))
    }

    fn erase(&self, collection: &str, id: DocId) -> Result<()> {
        self.erase_multi(collection, &[id])
    }
}

/// Lazy iteration over a collection, for concrete stores and trait
/// objects alike.
pub trait DocumentStoreExt: DocumentStore {
    fn iter<'a>(&'a self, collection: &'a str, options: DocIterOptions) -> DocumentIter<'a, Self> {
        DocumentIter::new(self, collection, options)
    }
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {}

/// Collection names double as directory names and as key prefixes.
pub(crate) fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.bytes().any(|b| matches!(b, 0 | b'/' | b'\\'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "invalid collection name {:?}",
            name
        )))
    }
}
