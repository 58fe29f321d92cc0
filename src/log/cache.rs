//! Bounded cache of decoded chunks.
//!
//! The index (which chunk numbers are resident, in LRU order) sits behind a
//! short-held mutex that is never held across decoding or file I/O. Each
//! resident chunk is an `Arc<ChunkHandle>` with its own reader/writer lock;
//! callers hold the `Arc` for the duration of one operation, and a chunk
//! whose `Arc` is shared by any caller is never chosen for eviction.
//!
//! ```text
//!  get(n) ──> index hit ──────────────────────────────> handle
//!        └──> in `evicting` (write-back pending) ──────> handle, resident again
//!        └──> miss: take the load guard for n, read + decode, insert
//! ```
//!
//! A chunk leaving the index moves to `evicting` until its write-back is
//! done, so a concurrent miss never reads a stale image from disk; the
//! per-number load guard ensures one decoded instance per chunk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use super::chunk::Chunk;
use super::file::ChunkFile;
use crate::cache::Cache;
use crate::error::{Error, Result};

pub struct ChunkHandle {
    number: u64,
    chunk: RwLock<Chunk>,
}

impl ChunkHandle {
    fn new(number: u64, chunk: Chunk) -> Self {
        Self {
            number,
            chunk: RwLock::new(chunk),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Chunk>> {
        Ok(self.chunk.read()?)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Chunk>> {
        Ok(self.chunk.write()?)
    }
}

struct CacheIndex {
    resident: Cache<u64, Arc<ChunkHandle>>,
    evicting: HashMap<u64, Arc<ChunkHandle>>,
    loading: HashMap<u64, Arc<Mutex<()>>>,
}

impl CacheIndex {
    /// Finds a chunk in memory, making an evicting one resident again.
    fn lookup(&mut self, n: u64) -> Option<Arc<ChunkHandle>> {
        if let Some(handle) = self.resident.get(&n) {
            return Some(handle.clone());
        }
        self.revive(n)
    }

    /// Like `lookup`, for a caller whose miss is already counted.
    fn recheck(&mut self, n: u64) -> Option<Arc<ChunkHandle>> {
        if let Some(handle) = self.resident.peek(&n) {
            return Some(handle.clone());
        }
        self.revive(n)
    }

    fn revive(&mut self, n: u64) -> Option<Arc<ChunkHandle>> {
        let handle = self.evicting.get(&n)?.clone();
        self.resident.insert(n, handle.clone());
        Some(handle)
    }

    fn evict(&mut self) -> Vec<Arc<ChunkHandle>> {
        // Only the cache itself holds an unused handle.
        let victims = self
            .resident
            .evict_while_over(|_, handle| Arc::strong_count(handle) == 1);
        victims
            .into_iter()
            .map(|(n, handle)| {
                self.evicting.insert(n, handle.clone());
                handle
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub resident: usize,
    pub hits: usize,
    pub misses: usize,
}

pub struct ChunkCache {
    file: ChunkFile,
    chunk_size: usize,
    index: Mutex<CacheIndex>,
}

impl ChunkCache {
    pub fn new(file: ChunkFile, chunk_size: usize, capacity: usize) -> Self {
        Self {
            file,
            chunk_size,
            index: Mutex::new(CacheIndex {
                resident: Cache::new(capacity),
                evicting: HashMap::new(),
                loading: HashMap::new(),
            }),
        }
    }

    pub fn file(&self) -> &ChunkFile {
        &self.file
    }

    /// Returns chunk `n`, loading it from the file on a miss.
    pub fn get(&self, n: u64) -> Result<Arc<ChunkHandle>> {
        let guard = {
            let mut index = self.index.lock()?;
            if let Some(handle) = index.lookup(n) {
                return Ok(handle);
            }
            index
                .loading
                .entry(n)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let handle = {
            let _loading = guard.lock()?;
            // Another caller may have finished loading while we waited.
            if let Some(handle) = self.index.lock()?.recheck(n) {
                return Ok(handle);
            }
            let chunk = Chunk::decode(self.file.read_chunk(n)?)?;
            let handle = Arc::new(ChunkHandle::new(n, chunk));

            let mut index = self.index.lock()?;
            index.resident.insert(n, handle.clone());
            if index
                .loading
                .get(&n)
                .is_some_and(|g| Arc::ptr_eq(g, &guard))
            {
                index.loading.remove(&n);
            }
            handle
        };
        tracing::trace!(chunk = n, "Loaded chunk");
        self.shrink()?;
        Ok(handle)
    }

    /// Installs a brand-new empty chunk `n` without touching the file.
    pub fn create(&self, n: u64) -> Result<Arc<ChunkHandle>> {
        let handle = Arc::new(ChunkHandle::new(n, Chunk::new(self.chunk_size)));
        self.index.lock()?.resident.insert(n, handle.clone());
        self.shrink()?;
        Ok(handle)
    }

    /// Evicts unused chunks beyond capacity, writing back the dirty ones.
    /// Never blocks on a chunk lock: a victim that is locked has been
    /// revived by another caller and stays resident.
    fn shrink(&self) -> Result<()> {
        let victims = self.index.lock()?.evict();
        for handle in victims {
            let written = match handle.chunk.try_write() {
                Ok(mut chunk) => {
                    self.write_back(handle.number, &mut chunk)?;
                    true
                }
                Err(TryLockError::WouldBlock) => false,
                Err(TryLockError::Poisoned(_)) => return Err(Error::MutexPoisoned),
            };
            let mut index = self.index.lock()?;
            let revived = index.resident.contains(&handle.number);
            if (written || revived)
                && index
                    .evicting
                    .get(&handle.number)
                    .is_some_and(|h| Arc::ptr_eq(h, &handle))
            {
                index.evicting.remove(&handle.number);
            }
        }
        Ok(())
    }

    /// Writes chunk `number` to the file now if it is dirty. The caller
    /// holds the chunk's write lock.
    pub fn write_back(&self, number: u64, chunk: &mut Chunk) -> Result<()> {
        if chunk.is_dirty() {
            self.file.write_chunk(number, chunk.encode())?;
            chunk.mark_clean();
            tracing::debug!(chunk = number, "Wrote back chunk");
        }
        Ok(())
    }

    /// Writes every dirty chunk and syncs the file.
    pub fn flush(&self) -> Result<()> {
        let handles: Vec<Arc<ChunkHandle>> = {
            let index = self.index.lock()?;
            index
                .resident
                .iter()
                .map(|(_, h)| h.clone())
                .chain(index.evicting.values().cloned())
                .collect()
        };
        for handle in &handles {
            self.write_back(handle.number, &mut *handle.write()?)?;
        }
        self.file.sync()?;

        let mut index = self.index.lock()?;
        index
            .evicting
            .retain(|_, h| !handles.iter().any(|flushed| Arc::ptr_eq(h, flushed)));
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let index = self.index.lock()?;
        let (hits, misses) = index.resident.stats();
        Ok(CacheStats {
            resident: index.resident.len() + index.evicting.len(),
            hits,
            misses,
        })
    }
}
