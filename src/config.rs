use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::log::chunk::{CHUNK_HEADER_SIZE, INDEX_ENTRY_SIZE};

/// Backend selection, as a tagged JSON object such as
/// `{"type": "log", "path": "/var/lib/ember", "chunk_size": 65536}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Map,
    UnorderedMap,
    Set,
    UnorderedSet,
    Array,
    Log(LogConfig),
}

impl BackendConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Configuration for the log-structured document backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Directory holding the collections
    pub path: PathBuf,

    /// Bytes per chunk, fixed once a collection exists (default: 1MB)
    pub chunk_size: usize,

    /// Chunks kept decoded in memory per collection (default: 32)
    pub cache_size: usize,

    /// Create `path` when it does not exist (default: true)
    pub create_if_missing: bool,

    /// Refuse to open a `path` that already holds collections (default: false)
    pub error_if_exists: bool,

    /// Hold an exclusive lock file while open (default: true)
    pub use_lock: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./emberkv"),
            chunk_size: 1024 * 1024, // 1MB
            cache_size: 32,
            create_if_missing: true,
            error_if_exists: false,
            use_lock: true,
        }
    }
}

impl LogConfig {
    /// Create a new config with the given directory
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the chunk size in bytes
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the number of cached chunks
    pub fn cache_size(mut self, chunks: usize) -> Self {
        self.cache_size = chunks;
        self
    }

    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    pub fn error_if_exists(mut self, enabled: bool) -> Self {
        self.error_if_exists = enabled;
        self
    }

    pub fn use_lock(mut self, enabled: bool) -> Self {
        self.use_lock = enabled;
        self
    }

    /// Smallest chunk able to hold a one-byte document.
    pub fn min_chunk_size() -> usize {
        CHUNK_HEADER_SIZE + INDEX_ENTRY_SIZE + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < Self::min_chunk_size() {
            return Err(Error::InvalidArgument(format!(
                "chunk_size {} is below the minimum of {}",
                self.chunk_size,
                Self::min_chunk_size()
            )));
        }
        if self.chunk_size > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "chunk_size {} exceeds {}",
                self.chunk_size,
                u32::MAX
            )));
        }
        if self.cache_size == 0 {
            return Err(Error::InvalidArgument("cache_size must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.path, PathBuf::from("./emberkv"));
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.cache_size, 32);
        assert!(config.create_if_missing);
        assert!(!config.error_if_exists);
        assert!(config.use_lock);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = LogConfig::new("/tmp/test")
            .chunk_size(4096)
            .cache_size(1)
            .create_if_missing(false)
            .error_if_exists(true)
            .use_lock(false);

        assert_eq!(config.path, PathBuf::from("/tmp/test"));
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.cache_size, 1);
        assert!(!config.create_if_missing);
        assert!(config.error_if_exists);
        assert!(!config.use_lock);
    }

    #[test]
    fn test_validate_rejects_degenerate_sizes() {
        let tiny = LogConfig::new("/tmp/x").chunk_size(LogConfig::min_chunk_size() - 1);
        assert!(matches!(tiny.validate(), Err(Error::InvalidArgument(_))));

        let no_cache = LogConfig::new("/tmp/x").cache_size(0);
        assert!(matches!(no_cache.validate(), Err(Error::InvalidArgument(_))));

        let smallest = LogConfig::new("/tmp/x").chunk_size(LogConfig::min_chunk_size());
        assert!(smallest.validate().is_ok());
    }

    #[test]
    fn test_tagged_json() -> Result<()> {
        assert_eq!(BackendConfig::from_json(r#"{"type":"map"}"#)?, BackendConfig::Map);
        assert_eq!(
            BackendConfig::from_json(r#"{"type":"unordered_map"}"#)?,
            BackendConfig::UnorderedMap
        );
        assert_eq!(
            BackendConfig::from_json(r#"{"type":"unordered_set"}"#)?,
            BackendConfig::UnorderedSet
        );
        assert_eq!(BackendConfig::from_json(r#"{"type":"array"}"#)?, BackendConfig::Array);

        let config = BackendConfig::from_json(
            r#"{"type":"log","path":"/data/ember","chunk_size":65536}"#,
        )?;
        let BackendConfig::Log(log) = &config else {
            panic!("expected a log config, got {:?}", config);
        };
        assert_eq!(log.path, PathBuf::from("/data/ember"));
        assert_eq!(log.chunk_size, 65536);
        assert_eq!(log.cache_size, 32);
        assert_eq!(BackendConfig::from_json(&config.to_json()?)?, config);
        Ok(())
    }

    #[test]
    fn test_bad_json_is_invalid_argument() {
        for json in [
            r#"{"type":"rocksdb"}"#,
            r#"{"type":"log","chunk_sise":1}"#,
            "not json",
        ] {
            assert!(
                matches!(BackendConfig::from_json(json), Err(Error::InvalidArgument(_))),
                "{}",
                json
            );
        }
    }
}
