use std::fmt;

use crc::{Crc, Digest, CRC_32_ISCSI};

static CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Incremental CRC-32C over persisted headers and chunk images.
pub struct Hasher {
    digest: Digest<'static, u32>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self {
            digest: CASTAGNOLI.digest(),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn checksum(self) -> u32 {
        self.digest.finalize()
    }

    /// One-shot checksum of a single slice.
    pub fn of(data: &[u8]) -> u32 {
        CASTAGNOLI.checksum(data)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
