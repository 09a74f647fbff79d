#![forbid(unsafe_code)]
//! Positioned I/O under a [`FilePartition`](crate::primitives::buffer::FilePartition).
//!
//! Partitions only ever touch whole pages at computed offsets, so the
//! backend interface has no cursor: every call names its offset.

use std::fs::{File, OpenOptions};
use std::path::Path;

use parking_lot::RwLock;
use tracing::trace;

use crate::types::{Result, TristoreError};

/// Offset-addressed storage backing one partition.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from `off`; reading past the end is an error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, extending the backend if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Makes completed writes durable.
    fn sync(&self) -> Result<()>;
    /// Length in bytes.
    fn len(&self) -> Result<u64>;
    /// Whether the backend holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Shrinks or zero-extends to `len` bytes.
    fn set_len(&self, len: u64) -> Result<()>;
}

/// [`FileIo`] over a regular file.
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    /// Opens `path` read-write, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }
}

#[cfg(unix)]
impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(dst, off).map_err(|err| {
            trace!(off, len = dst.len(), error = %err, "io.read_at.failed");
            TristoreError::from(err)
        })
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        Ok(self.file.write_all_at(src, off)?)
    }

    fn sync(&self) -> Result<()> {
        trace!("io.sync");
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }
}

#[cfg(windows)]
impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        use std::os::windows::fs::FileExt;
        while !dst.is_empty() {
            match self.file.seek_read(dst, off)? {
                0 => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
                n => {
                    dst = &mut dst[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        use std::os::windows::fs::FileExt;
        while !src.is_empty() {
            match self.file.seek_write(src, off)? {
                0 => return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into()),
                n => {
                    src = &src[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }
}

/// Volatile [`FileIo`] for scratch databases and tests.
#[derive(Default)]
pub struct MemIo {
    bytes: RwLock<Vec<u8>>,
}

impl MemIo {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileIo for MemIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.read();
        let start = usize::try_from(off).map_err(|_| TristoreError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(dst.len())
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))?;
        dst.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.write();
        let start = usize::try_from(off).map_err(|_| TristoreError::Invalid("offset overflow"))?;
        let end = start + src.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        let len = usize::try_from(len).map_err(|_| TristoreError::Invalid("length overflow"))?;
        self.bytes.write().resize(len, 0);
        Ok(())
    }
}
