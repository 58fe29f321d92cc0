use crate::config::BackendConfig;
use crate::docs::{ArrayStore, DocumentStore, KvDocumentStore};
use crate::error::{Error, Result};
use crate::log::LogStore;
use crate::store::{KeyValueStore, MapStore, SetStore, UnorderedMapStore, UnorderedSetStore};

/// A store opened from a [`BackendConfig`]. Callers reach it through the
/// key-value or the document interface, whichever the backend provides.
pub enum Database {
    Map(KvDocumentStore<MapStore>),
    UnorderedMap(KvDocumentStore<UnorderedMapStore>),
    Set(SetStore),
    UnorderedSet(UnorderedSetStore),
    Array(ArrayStore),
    Log(LogStore),
}

impl Database {
    pub fn open(config: BackendConfig) -> Result<Self> {
        let db = match config {
            BackendConfig::Map => Self::Map(KvDocumentStore::new(MapStore::new())),
            BackendConfig::UnorderedMap => {
                Self::UnorderedMap(KvDocumentStore::new(UnorderedMapStore::new()))
            }
            BackendConfig::Set => Self::Set(SetStore::new()),
            BackendConfig::UnorderedSet => Self::UnorderedSet(UnorderedSetStore::new()),
            BackendConfig::Array => Self::Array(ArrayStore::new()),
            BackendConfig::Log(log) => Self::Log(LogStore::open(log)?),
        };
        tracing::info!(backend = db.name(), "Opened database");
        Ok(db)
    }

    /// Opens from a tagged JSON configuration such as `{"type": "map"}`.
    pub fn open_json(json: &str) -> Result<Self> {
        Self::open(BackendConfig::from_json(json)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Map(db) => db.name(),
            Self::UnorderedMap(db) => db.name(),
            Self::Set(db) => db.name(),
            Self::UnorderedSet(db) => db.name(),
            Self::Array(db) => db.name(),
            Self::Log(db) => db.name(),
        }
    }

    pub fn key_values(&self) -> Result<&dyn KeyValueStore> {
        match self {
            Self::Map(db) => Ok(db.key_values()),
            Self::UnorderedMap(db) => Ok(db.key_values()),
            Self::Set(db) => Ok(db),
            Self::UnorderedSet(db) => Ok(db),
            Self::Array(_) | Self::Log(_) => Err(Error::Unsupported(format!(
                "the {} backend only stores documents",
                self.name()
            ))),
        }
    }

    pub fn documents(&self) -> Result<&dyn DocumentStore> {
        match self {
            Self::Map(db) => Ok(db),
            Self::UnorderedMap(db) => Ok(db),
            Self::Set(_) | Self::UnorderedSet(_) => Err(Error::Unsupported(format!(
                "the {} backend has no values to hold documents",
                self.name()
            ))),
            Self::Array(db) => Ok(db),
            Self::Log(db) => Ok(db),
        }
    }

    /// Persists buffered writes. In-memory backends have nothing to do.
    pub fn flush(&self) -> Result<()> {
        match self {
            Self::Log(db) => db.flush(),
            _ => Ok(()),
        }
    }

    /// Closes the database and deletes whatever it persisted.
    pub fn destroy(self) -> Result<()> {
        match self {
            Self::Log(db) => db.destroy(),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::docs::{DocIterOptions, DocumentStoreExt};
    use crate::mode::Mode;
    use crate::store::{IterOptions, KeyValueStoreExt};
    use crate::tmpfs::TempDir;

    #[test]
    fn test_open_every_backend() -> Result<()> {
        for (json, name) in [
            (r#"{"type":"map"}"#, "map"),
            (r#"{"type":"unordered_map"}"#, "unordered_map"),
            (r#"{"type":"set"}"#, "set"),
            (r#"{"type":"unordered_set"}"#, "unordered_set"),
        ] {
            let db = Database::open_json(json)?;
            assert_eq!(db.name(), name);
            let kv = db.key_values()?;
            kv.put(b"matt", b"")?;
            assert!(kv.exists(b"matt")?);
            assert_eq!(kv.count()?, 1);
            db.flush()?;
            db.destroy()?;
        }
        Ok(())
    }

    #[test]
    fn test_capabilities() -> Result<()> {
        let dir = TempDir::new()?;
        let log = Database::open(BackendConfig::Log(
            LogConfig::new(dir.path().join("db")).chunk_size(4096),
        ))?;
        assert_eq!(log.name(), "log");
        assert!(matches!(log.key_values(), Err(Error::Unsupported(_))));
        let docs = log.documents()?;
        docs.collection_create("c")?;
        assert_eq!(docs.store("c", b"doc")?, 0);
        log.flush()?;
        log.destroy()?;
        assert!(!dir.path().join("db").exists());

        let set = Database::open(BackendConfig::Set)?;
        assert!(matches!(set.documents(), Err(Error::Unsupported(_))));
        let set = Database::open(BackendConfig::UnorderedSet)?;
        assert!(matches!(set.documents(), Err(Error::Unsupported(_))));

        let array = Database::open_json(r#"{"type":"array"}"#)?;
        assert_eq!(array.name(), "array");
        assert!(matches!(array.key_values(), Err(Error::Unsupported(_))));
        crate::docs::tests::exercise_collection(array.documents()?)
    }

    #[test]
    fn test_iterate_through_trait_objects() -> Result<()> {
        let dir = TempDir::new()?;
        for config in [
            BackendConfig::Map,
            BackendConfig::UnorderedMap,
            BackendConfig::Array,
            BackendConfig::Log(LogConfig::new(dir.path().join("db")).chunk_size(4096)),
        ] {
            let db = Database::open(config)?;
            let docs = db.documents()?;
            docs.collection_create("c")?;
            for doc in ["a", "bb", "ccc", "dddd"] {
                docs.store("c", doc.as_bytes())?;
            }
            docs.erase("c", 1)?;
            let listed: Vec<(u64, Vec<u8>)> = docs
                .iter("c", DocIterOptions::new().batch_size(2))
                .collect::<Result<_>>()?;
            assert_eq!(
                listed,
                vec![(0, b"a".to_vec()), (2, b"ccc".to_vec()), (3, b"dddd".to_vec())],
                "{}",
                db.name()
            );
            db.destroy()?;
        }

        let db = Database::open(BackendConfig::Map)?;
        let kv = db.key_values()?;
        for key in ["b", "a", "c"] {
            kv.put(key.as_bytes(), b"v")?;
        }
        let keys: Vec<Vec<u8>> = kv
            .iter(IterOptions::new().batch_size(1))
            .map(|pair| pair.map(|(k, _)| k))
            .collect::<Result<_>>()?;
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_documents_share_key_space() -> Result<()> {
        let db = Database::open(BackendConfig::Map)?;
        db.documents()?.collection_create("c")?;
        db.documents()?.store("c", b"doc")?;
        // The collection record and the document are both plain keys.
        let keys = db.key_values()?.list_keys(Mode::DEFAULT, b"", b"c", 10)?;
        assert_eq!(keys.len(), 2);
        Ok(())
    }
}
