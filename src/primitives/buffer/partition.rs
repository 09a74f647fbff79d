#![forbid(unsafe_code)]

use std::{path::Path, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PageId, PartitionId, Result, TristoreError};

/// A growable array of fixed-size pages backing buffer frames.
pub trait Partition: Send + Sync {
    /// Identifier used as part of the buffer directory key.
    fn id(&self) -> PartitionId;
    /// Page size in bytes.
    fn page_size(&self) -> usize;
    /// Reads one page into `dst`.
    fn read_page(&self, page: PageId, dst: &mut [u8]) -> Result<()>;
    /// Writes one page from `src`.
    fn write_page(&self, page: PageId, src: &[u8]) -> Result<()>;
    /// Appends `pages` zeroed pages and returns the first new page number.
    fn grow(&self, pages: u64) -> Result<PageId>;
    /// Number of pages currently allocated.
    fn size(&self) -> u64;
    /// Makes written pages durable.
    fn flush(&self) -> Result<()>;
}

/// [`Partition`] stored in a single file.
pub struct FilePartition {
    id: PartitionId,
    io: Arc<dyn FileIo>,
    page_size: usize,
    pages: Mutex<u64>,
}

impl FilePartition {
    /// Opens or creates the partition file at `path`.
    pub fn open(path: impl AsRef<Path>, id: PartitionId, page_size: usize) -> Result<Self> {
        let io = StdFileIo::open(path)?;
        Self::with_io(Arc::new(io), id, page_size)
    }

    /// Builds a partition over an arbitrary [`FileIo`].
    pub fn with_io(io: Arc<dyn FileIo>, id: PartitionId, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(TristoreError::Invalid("page size must be positive"));
        }
        let len = io.len()?;
        if len % page_size as u64 != 0 {
            return Err(TristoreError::Corruption(
                "partition length is not a multiple of the page size",
            ));
        }
        Ok(Self {
            id,
            io,
            page_size,
            pages: Mutex::new(len / page_size as u64),
        })
    }

    fn offset(&self, page: PageId) -> Result<u64> {
        if page.0 >= *self.pages.lock() {
            return Err(TristoreError::InvalidOwned(format!(
                "page {} beyond partition {} end",
                page, self.id
            )));
        }
        Ok(page.0 * self.page_size as u64)
    }
}

impl Partition for FilePartition {
    fn id(&self) -> PartitionId {
        self.id
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page: PageId, dst: &mut [u8]) -> Result<()> {
        if dst.len() != self.page_size {
            return Err(TristoreError::Invalid("page buffer size mismatch"));
        }
        let off = self.offset(page)?;
        self.io.read_at(off, dst)
    }

    fn write_page(&self, page: PageId, src: &[u8]) -> Result<()> {
        if src.len() != self.page_size {
            return Err(TristoreError::Invalid("page buffer size mismatch"));
        }
        let off = self.offset(page)?;
        self.io.write_at(off, src)
    }

    fn grow(&self, pages: u64) -> Result<PageId> {
        let mut count = self.pages.lock();
        let first = *count;
        let new_count = first
            .checked_add(pages)
            .ok_or(TristoreError::Invalid("partition size overflow"))?;
        self.io.set_len(new_count * self.page_size as u64)?;
        *count = new_count;
        debug!(partition = self.id.0, first, pages, "partition.grow");
        Ok(PageId(first))
    }

    fn size(&self) -> u64 {
        *self.pages.lock()
    }

    fn flush(&self) -> Result<()> {
        self.io.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::MemIo;
    use tempfile::tempdir;

    #[test]
    fn grow_then_roundtrip() {
        let dir = tempdir().unwrap();
        let part = FilePartition::open(dir.path().join("p.db"), PartitionId(1), 128).unwrap();
        assert_eq!(part.size(), 0);
        assert_eq!(part.grow(3).unwrap(), PageId(0));
        assert_eq!(part.grow(1).unwrap(), PageId(3));
        let page = vec![9u8; 128];
        part.write_page(PageId(2), &page).unwrap();
        let mut back = vec![0u8; 128];
        part.read_page(PageId(2), &mut back).unwrap();
        assert_eq!(back, page);
        assert!(part.read_page(PageId(4), &mut back).is_err());
    }

    #[test]
    fn reopen_keeps_page_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.db");
        {
            let part = FilePartition::open(&path, PartitionId(0), 64).unwrap();
            part.grow(5).unwrap();
            part.flush().unwrap();
        }
        let part = FilePartition::open(&path, PartitionId(0), 64).unwrap();
        assert_eq!(part.size(), 5);
    }

    #[test]
    fn ragged_backend_is_corrupt() {
        let io = Arc::new(MemIo::new());
        io.set_len(100).unwrap();
        assert!(matches!(
            FilePartition::with_io(io, PartitionId(0), 64),
            Err(TristoreError::Corruption(_))
        ));
        assert!(FilePartition::with_io(Arc::new(MemIo::new()), PartitionId(0), 0).is_err());
    }
}
