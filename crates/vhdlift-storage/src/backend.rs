use std::fs::File;
use std::path::Path;

use crate::{DiskError, Result};

/// Positioned-read access to the raw bytes of an image file.
///
/// `read_at` takes `&self` so a single handle can serve many concurrent
/// range reads; upload workers all read through one shared backend.
pub trait ImageBackend: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from `offset`. Reads that extend past the end of the
    /// backing bytes fail with [`DiskError::OutOfBounds`].
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

fn checked_end(offset: u64, len: usize, capacity: u64) -> Result<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(DiskError::OffsetOverflow)?;
    if end > capacity {
        return Err(DiskError::OutOfBounds {
            offset,
            len,
            capacity,
        });
    }
    Ok(())
}

/// Read-only file backend using positioned reads (no shared cursor).
#[derive(Debug)]
pub struct FileBackend {
    file: File,
    len: u64,
}

impl FileBackend {
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ImageBackend for FileBackend {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_end(offset, buf.len(), self.len)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(buf, offset)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            let mut pos = offset;
            let mut filled = 0usize;
            while filled < buf.len() {
                let n = self.file.seek_read(&mut buf[filled..], pos)?;
                if n == 0 {
                    return Err(DiskError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "short positioned read",
                    )));
                }
                filled += n;
                pos += n as u64;
            }
        }

        Ok(())
    }
}

/// In-memory backend for tests and fixtures.
#[derive(Debug)]
pub struct MemBackend {
    bytes: Vec<u8>,
}

impl MemBackend {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl ImageBackend for MemBackend {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        checked_end(offset, buf.len(), self.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}
