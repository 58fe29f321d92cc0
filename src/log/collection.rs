use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::file::ChunkFile;
use super::manager::{ChunkManager, CollectionStats};
use super::meta::CollectionMeta;
use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::DocId;

pub const META_FILE: &str = "meta";
pub const CHUNKS_FILE: &str = "chunks";

/// One collection directory: its meta header, its chunk file and the id
/// counter.
pub struct LogCollection {
    name: String,
    dir: PathBuf,
    manager: ChunkManager,
    next_id: AtomicU64,
    dropped: AtomicBool,
}

impl LogCollection {
    pub fn create(dir: PathBuf, name: &str, config: &LogConfig) -> Result<Self> {
        fs::create_dir(&dir)?;
        CollectionMeta::new(config.chunk_size).write_to(&dir.join(META_FILE))?;
        let file = ChunkFile::open(dir.join(CHUNKS_FILE), config.chunk_size)?;
        let manager = ChunkManager::open(file, config.chunk_size, config.cache_size)?;
        Ok(Self {
            name: name.to_string(),
            dir,
            manager,
            next_id: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn open(dir: PathBuf, name: &str, config: &LogConfig) -> Result<Self> {
        let meta = CollectionMeta::read_from(&dir.join(META_FILE))?;
        if meta.chunk_size != config.chunk_size as u64 {
            return Err(Error::InvalidArgument(format!(
                "collection {} was created with chunk_size {}, not {}",
                name, meta.chunk_size, config.chunk_size
            )));
        }
        let file = ChunkFile::open(dir.join(CHUNKS_FILE), config.chunk_size)?;
        let manager = ChunkManager::open(file, config.chunk_size, config.cache_size)?;

        // The meta header lags behind stores made since the last flush.
        let next_id = match manager.max_id()? {
            Some(max) => meta.next_id.max(max + 1),
            None => meta.next_id,
        };
        let stats = manager.stats()?;
        tracing::info!(
            collection = %name,
            chunks = stats.chunks,
            documents = stats.live_documents,
            next_id,
            "Recovered collection"
        );
        Ok(Self {
            name: name.to_string(),
            dir,
            manager,
            next_id: AtomicU64::new(next_id),
            dropped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manager(&self) -> &ChunkManager {
        &self.manager
    }

    /// Reserves `count` consecutive ids and returns the first.
    pub fn allocate(&self, count: usize) -> DocId {
        self.next_id.fetch_add(count as u64, Ordering::SeqCst)
    }

    pub fn last_id(&self) -> DocId {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Stops all further writes to the directory.
    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }

    pub fn flush(&self) -> Result<()> {
        if self.dropped.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.manager.flush()?;
        let mut meta = CollectionMeta::new(self.manager.chunk_size());
        meta.next_id = self.last_id();
        meta.write_to(&self.dir.join(META_FILE))
    }

    pub fn stats(&self) -> Result<CollectionStats> {
        self.manager.stats()
    }
}

impl Drop for LogCollection {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(collection = %self.name, error = %e, "Failed to flush collection");
        }
    }
}
