use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The file holding every chunk of one collection, chunk `n` at byte
/// offset `n * chunk_size`. Reads and writes are positional, so different
/// chunks are accessed in parallel without sharing a file cursor.
pub struct ChunkFile {
    file: File,
    path: PathBuf,
    chunk_size: usize,
}

impl ChunkFile {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            chunk_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of chunk slots the file spans, counting a partial last one.
    pub fn chunk_count(&self) -> Result<u64> {
        let len = self.file.metadata()?.len();
        Ok(len.div_ceil(self.chunk_size as u64))
    }

    /// Reads chunk `n`. Bytes beyond the end of the file read as zeros.
    pub fn read_chunk(&self, n: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0; self.chunk_size];
        let offset = n * self.chunk_size as u64;
        let len = self.file.metadata()?.len();
        if offset < len {
            let available = ((len - offset) as usize).min(self.chunk_size);
            read_exact_at(&self.file, &mut buf[..available], offset)?;
        }
        Ok(buf)
    }

    pub fn write_chunk(&self, n: u64, image: &[u8]) -> Result<()> {
        debug_assert_eq!(image.len(), self.chunk_size);
        write_all_at(&self.file, image, n * self.chunk_size as u64)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => return Err(io::ErrorKind::WriteZero.into()),
            n => {
                buf = &buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}
