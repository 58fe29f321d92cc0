use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::error::{Error, Result};
use crate::hasher::Hasher;
use crate::DocId;

pub const META_SIZE: usize = 64;
const MAGIC: &[u8; 8] = b"EMBERLOG";
const VERSION: u32 = 1;

/// Per-collection header persisted in `<collection>/meta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMeta {
    pub magic: [u8; 8],
    pub version: u32,
    pub chunk_size: u64,
    pub next_id: DocId,
}

impl CollectionMeta {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION,
            chunk_size: chunk_size as u64,
            next_id: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC {
            return Err(Error::Corruption("Invalid collection magic number".to_string()));
        }
        if self.version != VERSION {
            return Err(Error::Corruption(format!(
                "Unsupported collection version: {}",
                self.version
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; META_SIZE] {
        let mut buf = [0u8; META_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        BigEndian::write_u32(&mut buf[8..12], self.version);
        BigEndian::write_u64(&mut buf[12..20], self.chunk_size);
        BigEndian::write_u64(&mut buf[20..28], self.next_id);
        let crc = Hasher::of(&buf[..28]);
        BigEndian::write_u32(&mut buf[28..32], crc);
        buf
    }

    pub fn decode(buf: &[u8; META_SIZE]) -> Result<Self> {
        let mut cursor = Cursor::new(&buf[..]);

        let mut magic = [0u8; 8];
        cursor
            .read_exact(&mut magic)
            .map_err(|e| Error::Decode("collection magic", e))?;
        let version = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("collection version", e))?;
        let chunk_size = cursor
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("chunk size", e))?;
        let next_id = cursor
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("next document id", e))?;
        let crc = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("collection checksum", e))?;

        let meta = Self {
            magic,
            version,
            chunk_size,
            next_id,
        };
        meta.validate()?;
        if Hasher::of(&buf[..28]) != crc {
            return Err(Error::Corruption("collection meta checksum mismatch".into()));
        }
        Ok(meta)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let mut buf = [0u8; META_SIZE];
        File::open(path)?
            .read_exact(&mut buf)
            .map_err(|e| Error::Decode("collection meta", e))?;
        Self::decode(&buf)
    }

    /// Replaces the file through a temporary sibling, so a crash leaves
    /// either the old or the new header.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;

    #[test]
    fn test_meta_roundtrip() -> Result<()> {
        let mut meta = CollectionMeta::new(4096);
        meta.next_id = 42;
        let decoded = CollectionMeta::decode(&meta.encode())?;
        assert_eq!(decoded, meta);
        assert_eq!(decoded.chunk_size, 4096);

        let image = meta.encode();
        assert_eq!(&image[0..8], b"EMBERLOG");
        assert_eq!(BigEndian::read_u64(&image[20..28]), 42);
        assert!(image[32..].iter().all(|b| *b == 0));
        Ok(())
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = [0u8; META_SIZE];
        buf[0..8].copy_from_slice(b"INVALID!");

        let result = CollectionMeta::decode(&buf);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut meta = CollectionMeta::new(4096);
        meta.version = 999;
        let encoded = meta.encode();

        let result = CollectionMeta::decode(&encoded);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut encoded = CollectionMeta::new(4096).encode();
        encoded[20] ^= 1;
        assert!(matches!(
            CollectionMeta::decode(&encoded),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("meta");
        let mut meta = CollectionMeta::new(512);
        meta.write_to(&path)?;
        meta.next_id = 7;
        meta.write_to(&path)?;
        assert_eq!(CollectionMeta::read_from(&path)?, meta);
        assert!(!path.with_extension("tmp").exists());
        Ok(())
    }
}
