//! Log-structured document backend.
//!
//! ```text
//! <path>/
//!   LOCK                 exclusive advisory lock while open
//!   <collection>/meta    magic, version, chunk_size, next_id, crc
//!   <collection>/chunks  chunk n at offset n * chunk_size
//! ```
//!
//! Each collection appends documents into fixed-size chunks (see
//! [`chunk`]) placed by a [`manager::ChunkManager`] and kept decoded in a
//! bounded [`cache::ChunkCache`]. Chunks are never compacted: space given
//! up by relocation or erasure stays stranded.

pub mod cache;
pub mod chunk;
pub mod collection;
pub mod file;
pub mod manager;
pub mod meta;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use self::chunk::Chunk;
use self::collection::{LogCollection, META_FILE};
pub use self::manager::CollectionStats;
use crate::config::LogConfig;
use crate::docs::{validate_collection_name, DocFetchFn, DocumentStore};
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::store::check_batch;
use crate::DocId;

const LOCK_FILE: &str = "LOCK";

pub struct LogStore {
    config: LogConfig,
    collections: RwLock<HashMap<String, Arc<LogCollection>>>,
    // Declared last so the lock outlives the final flush of every collection.
    _lock: Option<FileLock>,
}

impl LogStore {
    pub fn open(config: LogConfig) -> Result<Self> {
        config.validate()?;
        let path = config.path.clone();
        if !path.exists() {
            if !config.create_if_missing {
                return Err(Error::NotFound);
            }
            fs::create_dir_all(&path)?;
        } else if config.error_if_exists && Self::holds_collections(&path)? {
            return Err(Error::AlreadyExists(format!("{}", path.display())));
        }

        let lock = if config.use_lock {
            Some(FileLock::lock(path.join(LOCK_FILE))?)
        } else {
            None
        };

        let mut collections = HashMap::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let dir = entry.path();
            if !dir.join(META_FILE).is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(path = %dir.display(), "Skipping collection with a non UTF-8 name");
                continue;
            };
            let collection = LogCollection::open(dir, &name, &config)?;
            collections.insert(name, Arc::new(collection));
        }

        tracing::info!(
            path = %path.display(),
            collections = collections.len(),
            chunk_size = config.chunk_size,
            cache_size = config.cache_size,
            "Opened log store"
        );
        Ok(Self {
            config,
            collections: RwLock::new(collections),
            _lock: lock,
        })
    }

    fn holds_collections(path: &Path) -> Result<bool> {
        for entry in fs::read_dir(path)? {
            if entry?.path().join(META_FILE).is_file() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn collection(&self, name: &str) -> Result<Arc<LogCollection>> {
        validate_collection_name(name)?;
        self.collections
            .read()?
            .get(name)
            .cloned()
            .ok_or(Error::NotFound)
    }

    /// Rejects the whole batch if any document cannot fit an empty chunk.
    fn check_documents(&self, documents: &[&[u8]]) -> Result<()> {
        let max = Chunk::max_document(self.config.chunk_size);
        match documents.iter().position(|doc| doc.len() > max) {
            Some(i) => Err(Error::InvalidArgument(format!(
                "document {} of {} bytes exceeds the {} byte limit for chunk_size {}",
                i,
                documents[i].len(),
                max,
                self.config.chunk_size
            ))),
            None => Ok(()),
        }
    }

    /// Writes back every dirty chunk and collection header, then syncs.
    pub fn flush(&self) -> Result<()> {
        let collections: Vec<_> = self.collections.read()?.values().cloned().collect();
        for collection in collections {
            collection.flush()?;
        }
        Ok(())
    }

    pub fn stats(&self, collection: &str) -> Result<CollectionStats> {
        self.collection(collection)?.stats()
    }

    /// Closes the store and deletes its directory.
    pub fn destroy(self) -> Result<()> {
        let path = self.config.path.clone();
        for collection in self.collections.read()?.values() {
            collection.mark_dropped();
        }
        drop(self);
        fs::remove_dir_all(&path)?;
        tracing::info!(path = %path.display(), "Destroyed log store");
        Ok(())
    }
}

impl DocumentStore for LogStore {
    fn name(&self) -> &'static str {
        "log"
    }

    fn collection_create(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        if collection == LOCK_FILE {
            return Err(Error::InvalidArgument(format!(
                "collection name {} is reserved by the log backend",
                collection
            )));
        }
        let mut collections = self.collections.write()?;
        if collections.contains_key(collection) {
            return Err(Error::AlreadyExists(format!("collection {}", collection)));
        }
        let dir = self.config.path.join(collection);
        let created = LogCollection::create(dir, collection, &self.config)?;
        collections.insert(collection.to_string(), Arc::new(created));
        tracing::info!(collection = %collection, "Created collection");
        Ok(())
    }

    fn collection_drop(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        let dropped = self
            .collections
            .write()?
            .remove(collection)
            .ok_or(Error::NotFound)?;
        dropped.mark_dropped();
        fs::remove_dir_all(dropped.dir())?;
        tracing::info!(
            collection = %collection,
            documents = dropped.manager().len()?,
            "Dropped collection"
        );
        Ok(())
    }

    fn collection_exists(&self, collection: &str) -> Result<bool> {
        validate_collection_name(collection)?;
        Ok(self.collections.read()?.contains_key(collection))
    }

    fn collection_size(&self, collection: &str) -> Result<u64> {
        self.collection(collection)?.manager().len()
    }

    fn collection_last_id(&self, collection: &str) -> Result<DocId> {
        Ok(self.collection(collection)?.last_id())
    }

    fn store_multi(&self, collection: &str, documents: &[&[u8]], ids: &mut [DocId]) -> Result<()> {
        check_batch(documents.len(), ids.len(), "ids")?;
        let collection = self.collection(collection)?;
        self.check_documents(documents)?;

        let first = collection.allocate(documents.len());
        for (i, (doc, id)) in documents.iter().zip(ids.iter_mut()).enumerate() {
            *id = first + i as DocId;
            collection.manager().place(*id, doc)?;
        }
        Ok(())
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
        let collection = self.collection(collection)?;
        self.check_documents(documents)?;

        for ((id, doc), updated) in ids.iter().zip(documents).zip(updated.iter_mut()) {
            *updated = collection.manager().update(*id, doc)?;
        }
        Ok(())
    }

    fn fetch_multi(&self, collection: &str, ids: &[DocId], f: &mut DocFetchFn<'_>) -> Result<()> {
        let collection = self.collection(collection)?;
        for (i, &id) in ids.iter().enumerate() {
            collection.manager().read(id, |doc| f(i, id, doc))?;
        }
        Ok(())
    }

    fn erase_multi(&self, collection: &str, ids: &[DocId]) -> Result<()> {
        let collection = self.collection(collection)?;
        for &id in ids {
            collection.manager().erase(id)?;
        }
        Ok(())
    }

    fn list(
        &self,
        collection: &str,
        from_id: DocId,
        inclusive: bool,
        max: usize,
    ) -> Result<Vec<(DocId, Vec<u8>)>> {
        let collection = self.collection(collection)?;
        let manager = collection.manager();

        let mut page = Vec::new();
        let (mut from, mut inclusive) = (from_id, inclusive);
        // Documents erased between listing ids and reading them are skipped.
        while page.len() < max {
            let ids = manager.ids_from(from, inclusive, max - page.len())?;
            let Some(&last) = ids.last() else {
                break;
            };
            for id in ids {
                manager.read(id, |doc| {
                    if let Some(doc) = doc {
                        page.push((id, doc.to_vec()));
                    }
                    Ok(())
                })?;
            }
            (from, inclusive) = (last, false);
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docs::tests::exercise_collection;
    use crate::docs::{DocIterOptions, DocumentStoreExt};
    use crate::encoding::{ItemSize, PackedBuf};
    use crate::tmpfs::TempDir;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn config(dir: &TempDir) -> LogConfig {
        LogConfig::new(dir.path().join("store"))
            .chunk_size(1024)
            .cache_size(4)
    }

    fn random_docs(count: usize, seed: u64) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let len = rng.random_range(16..=128);
                (0..len).map(|_| rng.random()).collect()
            })
            .collect()
    }

    #[test]
    fn test_conformance() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir))?;
        exercise_collection(&store)
    }

    #[test]
    fn test_roundtrip_across_chunks() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir))?;
        store.collection_create("docs")?;

        let docs = random_docs(4096, 7);
        let packed: PackedBuf = docs.iter().collect();
        let mut ids = vec![0; docs.len()];
        store.store_packed("docs", &packed.as_packed(), &mut ids)?;
        assert_eq!(ids, (0..4096).collect::<Vec<DocId>>());

        let stats = store.stats("docs")?;
        assert!(stats.chunks > 100, "only {} chunks", stats.chunks);
        assert!(stats.cached <= 4);

        for (id, doc) in ids.iter().zip(&docs) {
            assert_eq!(&store.load("docs", *id)?, doc);
        }
        Ok(())
    }

    #[test]
    fn test_update_preserves_id() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir))?;
        store.collection_create("docs")?;
        let docs = random_docs(64, 11);
        for doc in &docs {
            store.store("docs", doc)?;
        }

        store.update("docs", 10, b"smaller")?;
        assert_eq!(store.load("docs", 10)?, b"smaller");
        let larger = vec![0xab; 600];
        store.update("docs", 11, &larger)?;
        assert_eq!(store.load("docs", 11)?, larger);
        assert_eq!(store.length("docs", 11)?, 600);

        assert!(store.stats("docs")?.stranded_bytes >= docs[11].len() as u64);
        for id in (0..64).filter(|id| *id != 10 && *id != 11) {
            assert_eq!(store.load("docs", id)?, docs[id as usize]);
        }

        // Oversized documents fail the batch before anything is written.
        let huge = vec![0u8; 1024];
        let mut updated = [false; 2];
        let result = store.update_multi("docs", &[0, 1], &[&b"fits"[..], &huge[..]], &mut updated);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert_eq!(store.load("docs", 0)?, docs[0]);
        assert!(matches!(
            store.store("docs", &huge),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(store.collection_last_id("docs")?, 64);
        Ok(())
    }

    #[test]
    fn test_erase_keeps_others() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir))?;
        store.collection_create("docs")?;
        let docs = random_docs(200, 3);
        let slices: Vec<&[u8]> = docs.iter().map(Vec::as_slice).collect();
        let mut ids = vec![0; docs.len()];
        store.store_multi("docs", &slices, &mut ids)?;

        store.erase("docs", 77)?;
        assert!(matches!(store.load("docs", 77), Err(Error::NotFound)));
        assert!(!store.exists("docs", 77)?);
        for id in (0..200).filter(|id| *id != 77) {
            assert_eq!(store.load("docs", id)?, docs[id as usize]);
        }
        assert_eq!(store.collection_size("docs")?, 199);
        Ok(())
    }

    #[test]
    fn test_shuffled_batches_agree() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir))?;
        store.collection_create("docs")?;
        let docs = random_docs(300, 5);
        for doc in &docs {
            store.store("docs", doc)?;
        }
        let erased: Vec<DocId> = (0..300).step_by(4).collect();
        store.erase_multi("docs", &erased)?;

        let mut rng = StdRng::seed_from_u64(99);
        let mut query: Vec<DocId> = (0..350).collect();
        for _ in 0..4 {
            query.shuffle(&mut rng);
            let mut sizes = vec![ItemSize::NotFound; query.len()];
            store.length_multi("docs", &query, &mut sizes)?;
            for (id, size) in query.iter().zip(&sizes) {
                let expected = match *id {
                    id if id < 300 && id % 4 != 0 => ItemSize::Size(docs[id as usize].len()),
                    _ => ItemSize::NotFound,
                };
                assert_eq!(*size, expected, "id {}", id);
            }
        }
        Ok(())
    }

    #[test]
    fn test_concurrent_stores() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir).cache_size(3))?;
        store.collection_create("docs")?;

        const THREADS: usize = 8;
        const PER_THREAD: usize = 160;
        let content = |t: usize, i: usize| format!("thread {} document {} {}", t, i, "x".repeat(i % 40));

        let stored: Vec<Vec<(DocId, String)>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let store = &store;
                    s.spawn(move || -> Result<Vec<(DocId, String)>> {
                        (0..PER_THREAD)
                            .map(|i| -> Result<(DocId, String)> {
                                let doc = content(t, i);
                                // Mix in updates so relocation races with placement.
                                let id = store.store("docs", doc.as_bytes())?;
                                if i % 10 == 0 {
                                    let grown = format!("{} grown {}", doc, "y".repeat(60));
                                    store.update("docs", id, grown.as_bytes())?;
                                    return Ok((id, grown));
                                }
                                Ok((id, doc))
                            })
                            .collect()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| Err(Error::MutexPoisoned)))
                .collect::<Result<_>>()
        })?;

        let mut seen = std::collections::HashSet::new();
        for (id, doc) in stored.iter().flatten() {
            assert!(seen.insert(*id), "id {} handed out twice", id);
            assert_eq!(store.load("docs", *id)?, doc.as_bytes());
        }
        assert_eq!(seen.len(), THREADS * PER_THREAD);
        assert_eq!(store.collection_size("docs")?, (THREADS * PER_THREAD) as u64);
        Ok(())
    }

    #[test]
    fn test_cache_size_does_not_change_results() -> Result<()> {
        let docs = random_docs(1500, 21);
        let mut rng = StdRng::seed_from_u64(8);
        let mut reads: Vec<DocId> = (0..1500).collect();
        reads.shuffle(&mut rng);

        let mut results = Vec::new();
        for cache_size in [1, 512] {
            let dir = TempDir::new()?;
            let store = LogStore::open(config(&dir).cache_size(cache_size))?;
            store.collection_create("docs")?;
            for doc in &docs {
                store.store("docs", doc)?;
            }
            for id in (0..1500).step_by(7) {
                store.update("docs", id, &docs[(id as usize + 1) % 1500])?;
            }
            store.erase_multi("docs", &(0..1500).step_by(11).collect::<Vec<_>>())?;

            let loaded: Vec<Option<Vec<u8>>> = reads
                .iter()
                .map(|id| match store.load("docs", *id) {
                    Ok(doc) => Ok(Some(doc)),
                    Err(Error::NotFound) => Ok(None),
                    Err(e) => Err(e),
                })
                .collect::<Result<_>>()?;
            if cache_size == 1 {
                assert!(store.stats("docs")?.cache_misses > 1000);
            }
            results.push(loaded);
        }
        assert_eq!(results[0], results[1]);
        Ok(())
    }

    #[test]
    fn test_reopen_persists() -> Result<()> {
        let dir = TempDir::new()?;
        let docs = random_docs(500, 13);
        {
            let store = LogStore::open(config(&dir))?;
            store.collection_create("docs")?;
            store.collection_create("empty")?;
            for doc in &docs {
                store.store("docs", doc)?;
            }
            store.update("docs", 3, &[3u8; 300])?;
            store.erase("docs", 4)?;
        }

        let store = LogStore::open(config(&dir))?;
        assert!(store.collection_exists("empty")?);
        assert_eq!(store.collection_size("docs")?, 499);
        assert_eq!(store.collection_last_id("docs")?, 500);
        assert_eq!(store.load("docs", 3)?, vec![3u8; 300]);
        assert!(matches!(store.load("docs", 4), Err(Error::NotFound)));
        for id in 5..500 {
            assert_eq!(store.load("docs", id)?, docs[id as usize]);
        }
        assert_eq!(store.store("docs", b"next")?, 500);

        let listed: Vec<DocId> = store
            .iter("docs", DocIterOptions::new().from_id(498, true).batch_size(2))
            .map(|r| r.map(|(id, _)| id))
            .collect::<Result<_>>()?;
        assert_eq!(listed, vec![498, 499, 500]);
        Ok(())
    }

    #[test]
    fn test_open_flags() -> Result<()> {
        let dir = TempDir::new()?;
        let missing = config(&dir).create_if_missing(false);
        assert!(matches!(LogStore::open(missing), Err(Error::NotFound)));

        {
            let store = LogStore::open(config(&dir))?;
            store.collection_create("docs")?;
            // A second open of a locked directory fails.
            assert!(LogStore::open(config(&dir)).is_err());
        }
        assert!(matches!(
            LogStore::open(config(&dir).error_if_exists(true)),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            LogStore::open(config(&dir).chunk_size(2048)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            LogStore::open(config(&dir).cache_size(0)),
            Err(Error::InvalidArgument(_))
        ));
        LogStore::open(config(&dir))?.destroy()?;
        assert!(!dir.path().join("store").exists());
        Ok(())
    }

    #[test]
    fn test_drop_collection_removes_directory() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir))?;
        store.collection_create("docs")?;
        store.store("docs", b"doomed")?;
        store.collection_drop("docs")?;
        assert!(!dir.path().join("store").join("docs").exists());
        store.flush()?;
        assert!(!dir.path().join("store").join("docs").exists());

        store.collection_create("docs")?;
        assert_eq!(store.store("docs", b"again")?, 0);
        assert!(matches!(
            store.collection_create("bad/name"),
            Err(Error::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_lock_file_name_is_reserved() -> Result<()> {
        let dir = TempDir::new()?;
        let store = LogStore::open(config(&dir))?;
        assert!(matches!(
            store.collection_create("LOCK"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!store.collection_exists("LOCK")?);
        assert!(dir.path().join("store").join("LOCK").is_file());
        Ok(())
    }
}
