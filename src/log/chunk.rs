//! Fixed-size chunk holding many documents.
//!
//! ```text
//! 0        16                     tail                      end
//! +--------+----------------------+-----------+--------------+
//! | header | doc | doc | ...      |   free    | index  entries|
//! +--------+----------------------+-----------+--------------+
//!            data grows upward ->      <- index grows downward
//!
//! header: magic u32 | count u32 | tail u32 | crc32c u32
//! entry:  id u64 | offset u32 | len u32 | allocated u32
//! ```
//!
//! A slot's `allocated` span may exceed its `len` after an in-place shrink.
//! Space given up by relocation or erasure is stranded: it stays inside the
//! data region and is never handed out again. The checksum covers the
//! header fields, the data region and the live index entries.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::hasher::Hasher;
use crate::DocId;

pub const CHUNK_HEADER_SIZE: usize = 16;
pub const INDEX_ENTRY_SIZE: usize = 20;
const CHUNK_MAGIC: u32 = 0x454D_4348; // "EMCH"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u32,
    pub len: u32,
    pub allocated: u32,
}

impl Slot {
    fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..(self.offset + self.len) as usize
    }

    fn end(&self) -> usize {
        (self.offset + self.allocated) as usize
    }
}

/// Outcome of rewriting a document inside its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Fit in the slot's allocated span.
    InPlace,
    /// Grew into the free space right after the slot.
    Extended,
    /// Needs a new slot.
    TooLarge,
    Missing,
}

pub struct Chunk {
    buf: Vec<u8>,
    slots: BTreeMap<DocId, Slot>,
    tail: usize,
    stranded: usize,
    dirty: bool,
}

impl Chunk {
    /// A fresh chunk. It is dirty until first written out.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buf: vec![0; chunk_size],
            slots: BTreeMap::new(),
            tail: CHUNK_HEADER_SIZE,
            stranded: 0,
            dirty: true,
        }
    }

    /// Largest document an empty chunk of `chunk_size` bytes can hold.
    pub fn max_document(chunk_size: usize) -> usize {
        chunk_size.saturating_sub(CHUNK_HEADER_SIZE + INDEX_ENTRY_SIZE)
    }

    /// Decodes a chunk image. An all-zero header denotes a chunk that was
    /// allocated but never written.
    pub fn decode(buf: Vec<u8>) -> Result<Self> {
        let size = buf.len();
        if size < CHUNK_HEADER_SIZE {
            return Err(Error::Corruption(format!("chunk image of {} bytes", size)));
        }
        if buf[..CHUNK_HEADER_SIZE].iter().all(|b| *b == 0) {
            let mut chunk = Self::new(size);
            chunk.buf = buf;
            chunk.dirty = false;
            return Ok(chunk);
        }

        let magic = BigEndian::read_u32(&buf[0..4]);
        let count = BigEndian::read_u32(&buf[4..8]) as usize;
        let tail = BigEndian::read_u32(&buf[8..12]) as usize;
        let crc = BigEndian::read_u32(&buf[12..16]);
        if magic != CHUNK_MAGIC {
            return Err(Error::Corruption(format!("bad chunk magic {:#x}", magic)));
        }
        let index_start = count
            .checked_mul(INDEX_ENTRY_SIZE)
            .and_then(|n| size.checked_sub(n))
            .filter(|&start| start >= CHUNK_HEADER_SIZE && tail <= start && tail >= CHUNK_HEADER_SIZE)
            .ok_or_else(|| {
                Error::Corruption(format!("chunk with {} entries and tail {}", count, tail))
            })?;
        if checksum(&buf, tail, index_start) != crc {
            return Err(Error::Corruption("chunk checksum mismatch".into()));
        }

        let mut slots = BTreeMap::new();
        let mut allocated = 0;
        for k in 0..count {
            let at = size - (k + 1) * INDEX_ENTRY_SIZE;
            let entry = &buf[at..at + INDEX_ENTRY_SIZE];
            let id = BigEndian::read_u64(&entry[0..8]);
            let slot = Slot {
                offset: BigEndian::read_u32(&entry[8..12]),
                len: BigEndian::read_u32(&entry[12..16]),
                allocated: BigEndian::read_u32(&entry[16..20]),
            };
            if (slot.offset as usize) < CHUNK_HEADER_SIZE
                || slot.len > slot.allocated
                || slot.end() > tail
            {
                return Err(Error::Corruption(format!(
                    "document {} has slot {:?} outside the data region",
                    id, slot
                )));
            }
            if slots.insert(id, slot).is_some() {
                return Err(Error::Corruption(format!("document {} indexed twice", id)));
            }
            allocated += slot.allocated as usize;
        }
        let stranded = (tail - CHUNK_HEADER_SIZE).checked_sub(allocated).ok_or_else(|| {
            Error::Corruption("chunk slots overlap".into())
        })?;

        Ok(Self {
            buf,
            slots,
            tail,
            stranded,
            dirty: false,
        })
    }

    /// Writes the header and index into the image and returns it.
    pub fn encode(&mut self) -> &[u8] {
        let size = self.buf.len();
        for (k, (id, slot)) in self.slots.iter().enumerate() {
            let at = size - (k + 1) * INDEX_ENTRY_SIZE;
            let entry = &mut self.buf[at..at + INDEX_ENTRY_SIZE];
            BigEndian::write_u64(&mut entry[0..8], *id);
            BigEndian::write_u32(&mut entry[8..12], slot.offset);
            BigEndian::write_u32(&mut entry[12..16], slot.len);
            BigEndian::write_u32(&mut entry[16..20], slot.allocated);
        }
        let index_start = size - self.slots.len() * INDEX_ENTRY_SIZE;
        BigEndian::write_u32(&mut self.buf[0..4], CHUNK_MAGIC);
        BigEndian::write_u32(&mut self.buf[4..8], self.slots.len() as u32);
        BigEndian::write_u32(&mut self.buf[8..12], self.tail as u32);
        let crc = checksum(&self.buf, self.tail, index_start);
        BigEndian::write_u32(&mut self.buf[12..16], crc);
        &self.buf
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes between the data tail and the index.
    pub fn free(&self) -> usize {
        self.buf.len() - self.tail - self.slots.len() * INDEX_ENTRY_SIZE
    }

    /// Whether a new document of `len` bytes, with its index entry, fits.
    pub fn fits(&self, len: usize) -> bool {
        self.free() >= len + INDEX_ENTRY_SIZE
    }

    /// Appends a new document at the tail. Returns false if it does not fit.
    pub fn insert(&mut self, id: DocId, doc: &[u8]) -> bool {
        if !self.fits(doc.len()) {
            return false;
        }
        let slot = self.append(doc);
        if let Some(old) = self.slots.insert(id, slot) {
            self.stranded += old.allocated as usize;
        }
        true
    }

    pub fn get(&self, id: DocId) -> Option<&[u8]> {
        self.slots.get(&id).map(|slot| &self.buf[slot.range()])
    }

    pub fn slot(&self, id: DocId) -> Option<Slot> {
        self.slots.get(&id).copied()
    }

    pub fn contains(&self, id: DocId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Rewrites a document within its own slot, growing into the free
    /// space when the slot ends at the tail.
    pub fn rewrite(&mut self, id: DocId, doc: &[u8]) -> Rewrite {
        let Some(slot) = self.slots.get(&id).copied() else {
            return Rewrite::Missing;
        };
        if doc.len() <= slot.allocated as usize {
            self.write_at(slot.offset as usize, doc);
            self.set_slot(id, Slot { len: doc.len() as u32, ..slot });
            return Rewrite::InPlace;
        }
        let growth = doc.len() - slot.allocated as usize;
        if slot.end() == self.tail && self.free() >= growth {
            self.write_at(slot.offset as usize, doc);
            self.tail += growth;
            self.set_slot(
                id,
                Slot {
                    len: doc.len() as u32,
                    allocated: doc.len() as u32,
                    ..slot
                },
            );
            return Rewrite::Extended;
        }
        Rewrite::TooLarge
    }

    /// Moves a document to a new slot at the tail of this chunk, stranding
    /// the old slot. The index entry is reused, so only `doc.len()` bytes
    /// of free space are needed.
    pub fn relocate(&mut self, id: DocId, doc: &[u8]) -> bool {
        let Some(old) = self.slots.get(&id).copied() else {
            return false;
        };
        if self.free() < doc.len() {
            return false;
        }
        let slot = self.append(doc);
        self.set_slot(id, slot);
        self.stranded += old.allocated as usize;
        true
    }

    /// Drops a document from the index; its bytes become stranded.
    pub fn remove(&mut self, id: DocId) -> bool {
        match self.slots.remove(&id) {
            Some(slot) => {
                self.stranded += slot.allocated as usize;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.slots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bytes of the data region no live document uses.
    pub fn stranded(&self) -> usize {
        self.stranded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn append(&mut self, doc: &[u8]) -> Slot {
        let offset = self.tail;
        self.write_at(offset, doc);
        self.tail += doc.len();
        Slot {
            offset: offset as u32,
            len: doc.len() as u32,
            allocated: doc.len() as u32,
        }
    }

    fn write_at(&mut self, offset: usize, doc: &[u8]) {
        self.buf[offset..offset + doc.len()].copy_from_slice(doc);
        self.dirty = true;
    }

    fn set_slot(&mut self, id: DocId, slot: Slot) {
        self.slots.insert(id, slot);
        self.dirty = true;
    }
}

fn checksum(buf: &[u8], tail: usize, index_start: usize) -> u32 {
    let mut hasher = Hasher::new();
    hasher.write(&buf[0..12]);
    hasher.write(&buf[CHUNK_HEADER_SIZE..tail]);
    hasher.write(&buf[index_start..]);
    hasher.checksum()
}
