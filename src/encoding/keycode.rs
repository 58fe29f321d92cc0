//! Keys for documents stored over a key-value backend.
//!
//! A document lives at `collection ‖ 0x00 ‖ id` with the id in big-endian,
//! so that byte order of the keys matches numeric order of the ids within a
//! collection, and collection metadata lives at the bare collection name.
//! Collection names never contain `0x00`, which keeps the namespaces of two
//! collections disjoint even when one name prefixes the other.

use super::format::Raw;
use super::Key;
use crate::error::{Error, Result};
use crate::DocId;

const SEPARATOR: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocKey<'a> {
    pub collection: &'a str,
    pub id: DocId,
}

impl<'a> DocKey<'a> {
    pub fn new(collection: &'a str, id: DocId) -> Self {
        Self { collection, id }
    }

    /// The key prefix shared by every document of `collection`.
    pub fn prefix(collection: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(collection.len() + 1);
        prefix.extend_from_slice(collection.as_bytes());
        prefix.push(SEPARATOR);
        prefix
    }
}

impl<'de> Key<'de> for DocKey<'de> {
    fn encode(&self) -> Vec<u8> {
        let mut key = Self::prefix(self.collection);
        key.extend_from_slice(&self.id.to_be_bytes());
        key
    }

    fn decode(bytes: &'de [u8]) -> Result<Self> {
        if bytes.len() < 9 {
            return Err(Error::Corruption(format!(
                "document key of {} bytes is too short",
                bytes.len()
            )));
        }
        let (head, id) = bytes.split_at(bytes.len() - 8);
        let Some((&SEPARATOR, name)) = head.split_last() else {
            return Err(Error::Corruption(format!(
                "document key {} lacks separator",
                Raw::truncated(bytes, 64)
            )));
        };
        let collection = std::str::from_utf8(name)
            .map_err(|_| Error::Corruption("collection name is not UTF-8".into()))?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(id);
        Ok(Self {
            collection,
            id: u64::from_be_bytes(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_key_layout() -> Result<()> {
        let key = DocKey::new("matt", 258).encode();
        assert_eq!(key, b"matt\x00\x00\x00\x00\x00\x00\x00\x01\x02");
        assert_eq!(DocKey::decode(&key)?, DocKey::new("matt", 258));
        assert!(key.starts_with(&DocKey::prefix("matt")));
        Ok(())
    }

    #[test]
    fn test_doc_keys_sort_by_id() {
        let ids = [0u64, 1, 255, 256, 65_536, u64::MAX - 1];
        let keys: Vec<Vec<u8>> = ids.iter().map(|&id| DocKey::new("c", id).encode()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_prefixed_collections_are_disjoint() {
        // "ab" documents must not fall under the "a" prefix.
        let key = DocKey::new("ab", 1).encode();
        assert!(!key.starts_with(&DocKey::prefix("a")));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(DocKey::decode(b"short").is_err());
        assert!(DocKey::decode(b"matt\x01\x00\x00\x00\x00\x00\x00\x00\x01").is_err());
    }
}
