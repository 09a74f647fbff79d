#![forbid(unsafe_code)]
//! Latch-based page cache with a background flusher.
//!
//! Frames are looked up in a directory guarded by one short-held mutex;
//! page contents are protected by per-frame reader/writer latches. Callers
//! receive [`PageReadGuard`] or [`PageWriteGuard`] values that release the
//! latch (and possibly the frame) on drop. Dirty frames are written back by
//! a dedicated thread once more than `dirt_limit` of them accumulate, and
//! new frames are refused admission while the directory is at its hard limit.

mod frame;
mod manager;
mod partition;

use serde::{Deserialize, Serialize};

pub use frame::FrameState;
pub use manager::{BufferManager, PageReadGuard, PageWriteGuard};
pub use partition::{FilePartition, Partition};

use crate::types::{page::DEFAULT_PAGE_SIZE, Lsn, Result};

/// Write-ahead log hooks consulted by the flusher.
pub trait LogManager: Send + Sync {
    /// Makes every log record up to `lsn` durable.
    fn force(&self, lsn: Lsn) -> Result<()>;
    /// Starts a checkpoint after partitions were synced.
    fn checkpoint(&self) -> Result<()>;
}

/// Sizing and flushing knobs for [`BufferManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferOptions {
    /// Target number of cached frames.
    pub buffer_size: usize,
    /// Maximum frames written per flusher pass.
    pub flush_batch: usize,
    /// Pages flushed between checkpoints.
    pub checkpoint_interval: usize,
    /// Whether the flusher asks the log manager for checkpoints.
    pub enable_checkpoints: bool,
    /// Page size used for frames.
    pub page_size: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            flush_batch: 1024,
            checkpoint_interval: 1024,
            enable_checkpoints: false,
            page_size: DEFAULT_PAGE_SIZE as usize,
        }
    }
}

impl BufferOptions {
    /// Dirty frame count that wakes the flusher.
    pub fn dirt_limit(&self) -> usize {
        3 * self.buffer_size / 4
    }

    /// Directory size at which new frames wait for the flusher.
    pub fn hard_limit(&self) -> usize {
        self.buffer_size + self.dirt_limit()
    }
}

/// Counters describing buffer manager activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Frames currently in the directory.
    pub directory: usize,
    /// Largest directory size observed.
    pub peak_directory: usize,
    /// Frames currently marked dirty.
    pub dirty: usize,
    /// Times a caller waited for the flusher before admitting a frame.
    pub backpressure_waits: u64,
    /// Pages written back.
    pub flushed_pages: u64,
    /// Checkpoints requested from the log manager.
    pub checkpoints: u64,
}
