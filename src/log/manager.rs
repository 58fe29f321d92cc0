//! Document placement across the chunks of one collection.
//!
//! New documents go to the open chunk, the highest numbered one; when it
//! is full a new chunk is opened. An update is rewritten in its own slot
//! when it fits there, otherwise it moves to the open chunk and its old
//! slot is stranded.
//!
//! Lock order: chunk locks in ascending chunk number, then the location
//! table, then the open chunk pointer. A cross-chunk move holds the old
//! chunk and the open chunk, and the open chunk always has the higher
//! number, and it is written to the file before the old chunk gives the
//! document up. The location of a document only changes while its chunk is
//! write-locked, so a caller holding a chunk and seeing the document's
//! location still point at it reads the current version.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use super::cache::ChunkCache;
use super::chunk::{Chunk, Rewrite};
use super::file::ChunkFile;
use crate::error::{Error, Result};
use crate::DocId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    /// Chunks allocated, including the open one.
    pub chunks: u64,
    pub open_chunk: u64,
    /// Chunks currently decoded in memory.
    pub cached: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub live_documents: u64,
    /// Data bytes no live document uses.
    pub stranded_bytes: u64,
}

pub struct ChunkManager {
    cache: ChunkCache,
    chunk_size: usize,
    locations: RwLock<BTreeMap<DocId, u64>>,
    open_chunk: Mutex<u64>,
    stranded: AtomicU64,
}

impl ChunkManager {
    /// Opens the chunks in `file`, rebuilding the location table from
    /// every chunk's index. A document found in several chunks, left over
    /// from an interrupted move, keeps the copy in the highest chunk.
    pub fn open(file: ChunkFile, chunk_size: usize, cache_size: usize) -> Result<Self> {
        let count = file.chunk_count()?;
        let mut locations = BTreeMap::new();
        let mut stale = Vec::new();
        let mut stranded = 0;
        for n in 0..count {
            let chunk = Chunk::decode(file.read_chunk(n)?)?;
            stranded += chunk.stranded() as u64;
            for id in chunk.ids() {
                if let Some(older) = locations.insert(id, n) {
                    stale.push((older, id));
                }
            }
        }

        let cache = ChunkCache::new(file, chunk_size, cache_size);
        for (n, id) in stale {
            let handle = cache.get(n)?;
            let mut chunk = handle.write()?;
            let before = chunk.stranded();
            chunk.remove(id);
            stranded += (chunk.stranded() - before) as u64;
            tracing::warn!(chunk = n, id, "Removed stale document copy");
        }

        let open = match count {
            0 => {
                cache.create(0)?;
                0
            }
            n => n - 1,
        };
        Ok(Self {
            cache,
            chunk_size,
            locations: RwLock::new(locations),
            open_chunk: Mutex::new(open),
            stranded: AtomicU64::new(stranded),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn open_chunk(&self) -> Result<u64> {
        Ok(*self.open_chunk.lock()?)
    }

    fn location(&self, id: DocId) -> Result<Option<u64>> {
        Ok(self.locations.read()?.get(&id).copied())
    }

    fn check_fits(&self, doc: &[u8]) -> Result<()> {
        let max = Chunk::max_document(self.chunk_size);
        if doc.len() > max {
            return Err(Error::InvalidArgument(format!(
                "document of {} bytes exceeds the {} byte limit of a chunk",
                doc.len(),
                max
            )));
        }
        Ok(())
    }

    fn add_stranded(&self, bytes: usize) {
        self.stranded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Opens chunk `full + 1` unless another caller already moved past `full`.
    fn roll_over(&self, full: u64) -> Result<()> {
        let mut open = self.open_chunk.lock()?;
        if *open == full {
            self.cache.create(full + 1)?;
            *open = full + 1;
            tracing::debug!(chunk = full + 1, "Opened chunk");
        }
        Ok(())
    }

    /// Appends a new document to the open chunk. Returns its chunk number.
    pub fn place(&self, id: DocId, doc: &[u8]) -> Result<u64> {
        self.check_fits(doc)?;
        loop {
            let n = self.open_chunk()?;
            let handle = self.cache.get(n)?;
            let mut chunk = handle.write()?;
            if chunk.insert(id, doc) {
                self.locations.write()?.insert(id, n);
                return Ok(n);
            }
            drop(chunk);
            self.roll_over(n)?;
        }
    }

    /// Calls `f` with the borrowed document, or `None` when it is absent.
    pub fn read<T>(&self, id: DocId, f: impl FnOnce(Option<&[u8]>) -> Result<T>) -> Result<T> {
        loop {
            let Some(n) = self.location(id)? else {
                return f(None);
            };
            let handle = self.cache.get(n)?;
            let chunk = handle.read()?;
            if self.location(id)? == Some(n) {
                return f(chunk.get(id));
            }
        }
    }

    /// Replaces a document. Returns false if it does not exist.
    pub fn update(&self, id: DocId, doc: &[u8]) -> Result<bool> {
        self.check_fits(doc)?;
        loop {
            let Some(n) = self.location(id)? else {
                return Ok(false);
            };
            let handle = self.cache.get(n)?;
            let mut chunk = handle.write()?;
            if self.location(id)? != Some(n) {
                continue;
            }

            let before = chunk.stranded();
            match chunk.rewrite(id, doc) {
                Rewrite::InPlace | Rewrite::Extended => return Ok(true),
                Rewrite::Missing => return Ok(false),
                Rewrite::TooLarge => {}
            }

            let open = self.open_chunk()?;
            if n == open {
                if chunk.relocate(id, doc) {
                    self.add_stranded(chunk.stranded() - before);
                    tracing::debug!(id, chunk = n, "Relocated document within chunk");
                    return Ok(true);
                }
                drop(chunk);
                self.roll_over(n)?;
                continue;
            }

            let target = self.cache.get(open)?;
            let mut moved = target.write()?;
            if !moved.insert(id, doc) {
                drop(moved);
                drop(chunk);
                self.roll_over(open)?;
                continue;
            }
            // The new copy reaches the file before the removal from the old
            // chunk can, so a crash in between leaves a duplicate rather
            // than no copy at all.
            if let Err(e) = self.cache.write_back(open, &mut moved) {
                let undo = moved.stranded();
                moved.remove(id);
                self.add_stranded(moved.stranded() - undo);
                return Err(e);
            }
            chunk.remove(id);
            self.add_stranded(chunk.stranded() - before);
            self.locations.write()?.insert(id, open);
            tracing::debug!(id, from = n, to = open, "Relocated document");
            return Ok(true);
        }
    }

    /// Removes a document. Returns false if it does not exist.
    pub fn erase(&self, id: DocId) -> Result<bool> {
        loop {
            let Some(n) = self.location(id)? else {
                return Ok(false);
            };
            let handle = self.cache.get(n)?;
            let mut chunk = handle.write()?;
            if self.location(id)? != Some(n) {
                continue;
            }
            let before = chunk.stranded();
            chunk.remove(id);
            self.add_stranded(chunk.stranded() - before);
            self.locations.write()?.remove(&id);
            return Ok(true);
        }
    }

    /// Up to `max` live ids in ascending order, starting at or after `from`.
    pub fn ids_from(&self, from: DocId, inclusive: bool, max: usize) -> Result<Vec<DocId>> {
        let start = if inclusive {
            Bound::Included(from)
        } else {
            Bound::Excluded(from)
        };
        Ok(self
            .locations
            .read()?
            .range((start, Bound::Unbounded))
            .take(max)
            .map(|(id, _)| *id)
            .collect())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.locations.read()?.len() as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.locations.read()?.is_empty())
    }

    /// Highest live id, if any.
    pub fn max_id(&self) -> Result<Option<DocId>> {
        Ok(self.locations.read()?.keys().next_back().copied())
    }

    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }

    pub fn stats(&self) -> Result<CollectionStats> {
        let open_chunk = self.open_chunk()?;
        let cache = self.cache.stats()?;
        Ok(CollectionStats {
            chunks: open_chunk + 1,
            open_chunk,
            cached: cache.resident,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            live_documents: self.len()?,
            stranded_bytes: self.stranded.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    const SIZE: usize = 256;

    fn manager(dir: &TempDir, cache_size: usize) -> Result<ChunkManager> {
        let file = ChunkFile::open(dir.path().join("chunks"), SIZE)?;
        ChunkManager::open(file, SIZE, cache_size)
    }

    fn load(manager: &ChunkManager, id: DocId) -> Result<Option<Vec<u8>>> {
        manager.read(id, |doc| Ok(doc.map(<[u8]>::to_vec)))
    }

    fn doc(id: DocId, len: usize) -> Vec<u8> {
        (0..len).map(|i| (id as usize * 31 + i) as u8).collect()
    }

    #[test]
    fn test_place_rolls_over() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = manager(&dir, 2)?;
        let mut chunks = Vec::new();
        for id in 0..40 {
            chunks.push(manager.place(id, &doc(id, 40))?);
        }
        // Four 60-byte entries fit in the 240 usable bytes of a chunk.
        assert_eq!(chunks[..4], [0, 0, 0, 0]);
        assert_eq!(chunks[4], 1);
        assert_eq!(manager.stats()?.chunks, 10);
        for id in 0..40 {
            assert_eq!(load(&manager, id)?, Some(doc(id, 40)));
        }
        assert_eq!(load(&manager, 40)?, None);
        assert_eq!(manager.len()?, 40);
        assert_eq!(manager.max_id()?, Some(39));
        Ok(())
    }

    #[test]
    fn test_oversized_document() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = manager(&dir, 2)?;
        let too_big = vec![0u8; Chunk::max_document(SIZE) + 1];
        assert!(matches!(
            manager.place(0, &too_big),
            Err(Error::InvalidArgument(_))
        ));
        manager.place(0, &too_big[1..])?;
        assert_eq!(manager.stats()?.chunks, 1);
        Ok(())
    }

    #[test]
    fn test_update_in_place_and_relocate() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = manager(&dir, 4)?;
        for id in 0..8 {
            manager.place(id, &doc(id, 40))?;
        }
        assert_eq!(manager.stats()?.open_chunk, 1);

        // Shrinking stays in place.
        assert!(manager.update(0, b"short")?);
        assert_eq!(load(&manager, 0)?, Some(b"short".to_vec()));
        assert_eq!(manager.stats()?.stranded_bytes, 0);

        // Growing a document in a sealed chunk moves it to the open one.
        assert!(manager.update(1, &doc(1, 90))?);
        assert_eq!(load(&manager, 1)?, Some(doc(1, 90)));
        assert_eq!(manager.stats()?.stranded_bytes, 40);

        // Chunk 1 was full, so the move opened chunk 2. The document now
        // ends at its tail and grows without moving again.
        assert_eq!(manager.stats()?.open_chunk, 2);
        assert!(manager.update(1, &doc(1, 150))?);
        assert_eq!(load(&manager, 1)?, Some(doc(1, 150)));
        assert_eq!(manager.stats()?.open_chunk, 2);
        assert_eq!(manager.stats()?.stranded_bytes, 40);

        // A document in the open chunk moves to that chunk's tail.
        manager.place(8, b"tail")?;
        manager.place(9, b"x")?;
        assert!(manager.update(8, &doc(8, 20))?);
        assert_eq!(load(&manager, 8)?, Some(doc(8, 20)));
        assert_eq!(manager.stats()?.open_chunk, 2);
        assert_eq!(manager.stats()?.stranded_bytes, 44);

        assert!(!manager.update(100, b"nope")?);
        for id in 2..8 {
            assert_eq!(load(&manager, id)?, Some(doc(id, 40)));
        }
        Ok(())
    }

    #[test]
    fn test_moved_document_survives_crash() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let manager = manager(&dir, 2)?;
            for id in 0..8 {
                manager.place(id, &doc(id, 40))?;
            }
            manager.flush()?;

            assert!(manager.update(1, &doc(1, 90))?);
            assert_eq!(manager.stats()?.open_chunk, 2);
            let on_disk = Chunk::decode(manager.cache.file().read_chunk(2)?)?;
            assert_eq!(on_disk.get(1), Some(&doc(1, 90)[..]));

            // A miss pushes the old chunk, now without document 1, out to
            // the file. The manager then goes away without a flush.
            drop(manager.cache.get(7)?);
        }
        let manager = manager(&dir, 2)?;
        assert_eq!(load(&manager, 1)?, Some(doc(1, 90)));
        for id in (0..8).filter(|id| *id != 1) {
            assert_eq!(load(&manager, id)?, Some(doc(id, 40)));
        }
        Ok(())
    }

    #[test]
    fn test_erase_leaves_hole() -> Result<()> {
        let dir = TempDir::new()?;
        let manager = manager(&dir, 4)?;
        for id in 0..6 {
            manager.place(id, &doc(id, 20))?;
        }
        assert!(manager.erase(3)?);
        assert!(!manager.erase(3)?);
        assert_eq!(load(&manager, 3)?, None);
        assert!(!manager.update(3, b"back")?);
        assert_eq!(manager.ids_from(2, true, 3)?, vec![2, 4, 5]);
        assert_eq!(manager.ids_from(2, false, 10)?, vec![4, 5]);
        assert_eq!(manager.stats()?.stranded_bytes, 20);
        Ok(())
    }

    #[test]
    fn test_reopen_recovers_locations() -> Result<()> {
        let dir = TempDir::new()?;
        {
            let manager = manager(&dir, 1)?;
            for id in 0..20 {
                manager.place(id, &doc(id, 30))?;
            }
            manager.update(2, &doc(2, 100))?;
            manager.erase(5)?;
            manager.flush()?;
        }
        let manager = manager(&dir, 1)?;
        assert_eq!(manager.len()?, 19);
        assert_eq!(load(&manager, 2)?, Some(doc(2, 100)));
        assert_eq!(load(&manager, 5)?, None);
        assert_eq!(load(&manager, 19)?, Some(doc(19, 30)));
        assert_eq!(manager.stats()?.stranded_bytes, 60);

        // New documents keep going into the last chunk.
        let open = manager.stats()?.open_chunk;
        assert!(manager.place(20, b"tail")? >= open);
        Ok(())
    }

    #[test]
    fn test_recovery_prefers_highest_chunk() -> Result<()> {
        let dir = TempDir::new()?;
        let file = ChunkFile::open(dir.path().join("chunks"), SIZE)?;
        let mut old = Chunk::new(SIZE);
        old.insert(5, b"old copy");
        old.insert(6, b"six");
        let mut new = Chunk::new(SIZE);
        new.insert(5, b"new copy");
        file.write_chunk(0, old.encode())?;
        file.write_chunk(1, new.encode())?;

        let manager = ChunkManager::open(file, SIZE, 4)?;
        assert_eq!(load(&manager, 5)?, Some(b"new copy".to_vec()));
        assert_eq!(load(&manager, 6)?, Some(b"six".to_vec()));
        assert_eq!(manager.len()?, 2);
        assert_eq!(manager.stats()?.open_chunk, 1);
        manager.flush()?;

        let file = ChunkFile::open(dir.path().join("chunks"), SIZE)?;
        let chunk = Chunk::decode(file.read_chunk(0)?)?;
        assert!(!chunk.contains(5));
        Ok(())
    }
}
