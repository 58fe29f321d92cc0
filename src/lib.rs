pub mod cache;
pub mod config;
pub mod database;
pub mod docs;
pub mod encoding;
pub mod error;
pub mod flock;
pub mod hasher;
pub mod log;
pub mod mode;
pub mod store;

#[cfg(test)]
mod tmpfs;

/// Identifier of a document within its collection.
pub type DocId = u64;

pub use config::{BackendConfig, LogConfig};
pub use database::Database;
pub use docs::{DocumentStore, DocumentStoreExt};
pub use encoding::{ItemSize, Packed, PackedBuf};
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use log::LogStore;
pub use mode::Mode;
pub use store::{KeyValueStore, KeyValueStoreExt};
