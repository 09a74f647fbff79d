use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use super::partition::Partition;
use crate::types::{Lsn, PageId, PartitionId};

/// Directory key of a cached page.
pub(crate) type FrameKey = (PartitionId, PageId);

pub(crate) type SharedLatch = ArcRwLockReadGuard<RawRwLock, Box<[u8]>>;
pub(crate) type ExclusiveLatch = ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>;

/// Lifecycle of a cached page.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameState {
    /// No valid content; always latched exclusively while in this state.
    Empty,
    /// Loaded from disk, unmodified.
    Read,
    /// Writable but identical to the on-disk image.
    Write,
    /// Modified and waiting for the flusher.
    WriteDirty,
}

pub(crate) struct FrameMeta {
    pub state: FrameState,
    pub lsn: Lsn,
    pub key: Option<FrameKey>,
    pub partition: Option<Arc<dyn Partition>>,
}

/// One cached page. The `RwLock` around the bytes is the page latch.
pub(crate) struct Frame {
    pub latch: Arc<RwLock<Box<[u8]>>>,
    pub meta: Mutex<FrameMeta>,
    /// Threads blocked on the latch; a frame with pending intentions is never reclaimed.
    pub intention: AtomicU32,
}

impl Frame {
    pub fn new(page_size: usize) -> Self {
        Self {
            latch: Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice())),
            meta: Mutex::new(FrameMeta {
                state: FrameState::Empty,
                lsn: Lsn(0),
                key: None,
                partition: None,
            }),
            intention: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> FrameState {
        self.meta.lock().state
    }

    pub fn set_state(&self, state: FrameState) {
        self.meta.lock().state = state;
    }

    pub fn assign(&self, partition: Arc<dyn Partition>, page: PageId) {
        let mut meta = self.meta.lock();
        meta.key = Some((partition.id(), page));
        meta.partition = Some(partition);
        meta.state = FrameState::Empty;
        meta.lsn = Lsn(0);
        self.intention.store(0, Ordering::Release);
    }

    pub fn reset(&self) {
        let mut meta = self.meta.lock();
        meta.key = None;
        meta.partition = None;
        meta.state = FrameState::Empty;
        meta.lsn = Lsn(0);
    }

    pub fn pending_intentions(&self) -> u32 {
        self.intention.load(Ordering::Acquire)
    }

    pub fn add_intention(&self) {
        self.intention.fetch_add(1, Ordering::AcqRel);
    }

    pub fn drop_intention(&self) {
        self.intention.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Either side of a page latch.
pub(crate) enum Latch {
    Shared(SharedLatch),
    Exclusive(ExclusiveLatch),
}
