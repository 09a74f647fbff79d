use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use super::frame::{ExclusiveLatch, Frame, FrameKey, FrameState, Latch, SharedLatch};
use super::partition::Partition;
use super::{BufferOptions, BufferStats, LogManager};
use crate::types::{Lsn, PageId, Result, TristoreError};

const FLUSHER_IDLE: Duration = Duration::from_millis(100);
const FLUSHER_BLOCKED_BACKOFF: Duration = Duration::from_millis(1);
const ADMISSION_WAIT: Duration = Duration::from_millis(10);
const MAX_ADMISSION_WAITS: u32 = 500;

struct Directory {
    frames: FxHashMap<FrameKey, Arc<Frame>>,
    released: Vec<Arc<Frame>>,
    dirt: usize,
    flush_requested: bool,
    shutdown: bool,
    crashed: bool,
    pages_since_checkpoint: usize,
    stats: BufferStats,
}

struct Shared {
    options: BufferOptions,
    dirt_limit: usize,
    hard_limit: usize,
    directory: Mutex<Directory>,
    flusher_wakeup: Condvar,
    flusher_done: Condvar,
    log: Option<Arc<dyn LogManager>>,
}

#[derive(Default)]
struct FlushPass {
    flushed: usize,
    blocked: bool,
    partitions: Vec<Arc<dyn Partition>>,
}

/// Page cache shared by every segment of a database.
pub struct BufferManager {
    shared: Arc<Shared>,
    flusher: Option<JoinHandle<()>>,
}

/// Shared latch on a cached page.
pub struct PageReadGuard {
    latch: SharedLatch,
    release: Unfix,
}

/// Exclusive latch on a cached page.
pub struct PageWriteGuard {
    latch: ExclusiveLatch,
    release: Unfix,
}

/// Releases the frame after the latch field of a guard was dropped.
struct Unfix {
    shared: Arc<Shared>,
    frame: Arc<Frame>,
    key: FrameKey,
}

impl Drop for Unfix {
    fn drop(&mut self) {
        self.shared.unfix(&self.frame, self.key);
    }
}

/// Result of a directory lookup.
enum Lookup {
    Cached(Arc<Frame>),
    /// Newly assigned frame in state `Empty`, already latched.
    Assigned(Arc<Frame>, ExclusiveLatch),
}

impl BufferManager {
    /// Creates a manager and starts its flusher thread.
    pub fn new(options: BufferOptions, log: Option<Arc<dyn LogManager>>) -> Result<Self> {
        if options.buffer_size == 0 {
            return Err(TristoreError::Invalid("buffer size must be positive"));
        }
        if options.flush_batch == 0 {
            return Err(TristoreError::Invalid("flush batch must be positive"));
        }
        let shared = Arc::new(Shared {
            dirt_limit: options.dirt_limit(),
            hard_limit: options.hard_limit(),
            options,
            directory: Mutex::new(Directory {
                frames: FxHashMap::default(),
                released: Vec::new(),
                dirt: 0,
                flush_requested: false,
                shutdown: false,
                crashed: false,
                pages_since_checkpoint: 0,
                stats: BufferStats::default(),
            }),
            flusher_wakeup: Condvar::new(),
            flusher_done: Condvar::new(),
            log,
        });
        let worker = Arc::clone(&shared);
        let flusher = thread::Builder::new()
            .name("tristore-flusher".into())
            .spawn(move || worker.flusher_loop())?;
        debug!(
            buffer_size = shared.options.buffer_size,
            dirt_limit = shared.dirt_limit,
            hard_limit = shared.hard_limit,
            "buffer.start"
        );
        Ok(Self {
            shared,
            flusher: Some(flusher),
        })
    }

    /// Options the manager was created with.
    pub fn options(&self) -> &BufferOptions {
        &self.shared.options
    }

    /// Latches a page for reading, loading it from the partition when needed.
    pub fn read_page_shared(
        &self,
        partition: &Arc<dyn Partition>,
        page: PageId,
    ) -> Result<PageReadGuard> {
        let (frame, latch) = self.shared.find_shared(partition, page);
        let release = self.release(frame, partition, page);
        let latch = match latch {
            Latch::Shared(latch) => latch,
            Latch::Exclusive(mut latch) => {
                if release.frame.state() == FrameState::Empty {
                    partition.read_page(page, &mut latch[..])?;
                    release.frame.set_state(FrameState::Read);
                }
                ArcRwLockWriteGuard::downgrade(latch)
            }
        };
        Ok(PageReadGuard { latch, release })
    }

    /// Latches a page exclusively, loading it from the partition when needed.
    pub fn read_page_exclusive(
        &self,
        partition: &Arc<dyn Partition>,
        page: PageId,
    ) -> Result<PageWriteGuard> {
        let (frame, mut latch) = self.shared.find_exclusive(partition, page);
        let release = self.release(frame, partition, page);
        if release.frame.state() == FrameState::Empty {
            partition.read_page(page, &mut latch[..])?;
            release.frame.set_state(FrameState::Read);
        }
        Ok(PageWriteGuard { latch, release })
    }

    /// Latches a page exclusively for rewriting without reading it first.
    ///
    /// A page that was not cached starts zero-filled.
    pub fn build_page(&self, partition: &Arc<dyn Partition>, page: PageId) -> Result<PageWriteGuard> {
        let (frame, mut latch) = self.shared.find_exclusive(partition, page);
        let release = self.release(frame, partition, page);
        let mut meta = release.frame.meta.lock();
        match meta.state {
            FrameState::Empty => {
                latch.fill(0);
                meta.state = FrameState::Write;
            }
            FrameState::Read => meta.state = FrameState::Write,
            FrameState::Write | FrameState::WriteDirty => {}
        }
        drop(meta);
        Ok(PageWriteGuard { latch, release })
    }

    /// Writes every dirty page that is not currently latched and syncs the partitions.
    pub fn flush_all(&self) -> Result<()> {
        let mut touched: Vec<Arc<dyn Partition>> = Vec::new();
        let mut dir = self.shared.directory.lock();
        while dir.dirt > 0 {
            let pass = self.shared.do_flush(&mut dir)?;
            merge_partitions(&mut touched, pass.partitions);
            if pass.flushed == 0 {
                debug!(remaining = dir.dirt, "buffer.flush_all.blocked");
                break;
            }
        }
        drop(dir);
        for partition in &touched {
            partition.flush()?;
        }
        Ok(())
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> BufferStats {
        let dir = self.shared.directory.lock();
        BufferStats {
            directory: dir.frames.len(),
            dirty: dir.dirt,
            ..dir.stats
        }
    }

    /// Drops the manager without writing dirty pages back.
    pub fn crash(self) {
        self.shared.directory.lock().crashed = true;
        drop(self);
    }

    fn release(&self, frame: Arc<Frame>, partition: &Arc<dyn Partition>, page: PageId) -> Unfix {
        Unfix {
            shared: Arc::clone(&self.shared),
            frame,
            key: (partition.id(), page),
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        self.shared.directory.lock().shutdown = true;
        self.shared.flusher_wakeup.notify_all();
        if let Some(handle) = self.flusher.take() {
            if handle.join().is_err() {
                warn!("buffer.flusher.panicked");
            }
        }
        let mut dir = self.shared.directory.lock();
        if dir.crashed {
            debug!(frames = dir.frames.len(), dirty = dir.dirt, "buffer.crash");
        } else {
            while dir.dirt > 0 {
                match self.shared.do_flush(&mut dir) {
                    Ok(pass) if pass.flushed > 0 => {}
                    Ok(_) => {
                        warn!(remaining = dir.dirt, "buffer.shutdown.dirty_pages_latched");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "buffer.shutdown.flush_failed");
                        break;
                    }
                }
            }
            let in_use = dir.frames.len();
            if in_use > 0 {
                warn!(frames = in_use, "buffer.shutdown.frames_in_use");
            }
            debug_assert_eq!(in_use, 0, "all frames must be released at shutdown");
        }
        dir.frames.clear();
        dir.released.clear();
    }
}

impl Shared {
    /// Latches the frame for `(partition, page)` exclusively, assigning one when missing.
    fn find_exclusive(&self, partition: &Arc<dyn Partition>, page: PageId) -> (Arc<Frame>, ExclusiveLatch) {
        let mut dir = self.directory.lock();
        match self.lookup(&mut dir, partition, page) {
            Lookup::Assigned(frame, latch) => (frame, latch),
            Lookup::Cached(frame) => {
                let latch = Self::latch_exclusive(&mut dir, &frame);
                (frame, latch)
            }
        }
    }

    /// Latches the frame for `(partition, page)` for reading.
    ///
    /// Empty frames are always returned with an exclusive latch so the caller can load them.
    fn find_shared(&self, partition: &Arc<dyn Partition>, page: PageId) -> (Arc<Frame>, Latch) {
        let mut dir = self.directory.lock();
        loop {
            let frame = match self.lookup(&mut dir, partition, page) {
                Lookup::Assigned(frame, latch) => return (frame, Latch::Exclusive(latch)),
                Lookup::Cached(frame) => frame,
            };
            if frame.state() == FrameState::Empty {
                let latch = Self::latch_exclusive(&mut dir, &frame);
                return (frame, Latch::Exclusive(latch));
            }
            let latch = match frame.latch.try_read_arc() {
                Some(latch) => latch,
                None => {
                    frame.add_intention();
                    let latch = MutexGuard::unlocked(&mut dir, || frame.latch.read_arc());
                    frame.drop_intention();
                    latch
                }
            };
            if frame.state() == FrameState::Empty {
                // A failed load left the frame empty; retry on the exclusive side.
                drop(latch);
                continue;
            }
            return (frame, Latch::Shared(latch));
        }
    }

    fn latch_exclusive(dir: &mut MutexGuard<'_, Directory>, frame: &Arc<Frame>) -> ExclusiveLatch {
        match frame.latch.try_write_arc() {
            Some(latch) => latch,
            None => {
                frame.add_intention();
                let latch = MutexGuard::unlocked(dir, || frame.latch.write_arc());
                frame.drop_intention();
                latch
            }
        }
    }

    /// Returns the cached frame for `(partition, page)` or assigns a fresh one,
    /// waiting for the flusher while the directory is at its hard limit.
    fn lookup(
        &self,
        dir: &mut MutexGuard<'_, Directory>,
        partition: &Arc<dyn Partition>,
        page: PageId,
    ) -> Lookup {
        let key = (partition.id(), page);
        let mut admission_waits = 0u32;
        loop {
            if let Some(frame) = dir.frames.get(&key) {
                return Lookup::Cached(Arc::clone(frame));
            }
            if dir.frames.len() >= self.hard_limit
                && dir.dirt > 0
                && admission_waits < MAX_ADMISSION_WAITS
            {
                admission_waits += 1;
                dir.stats.backpressure_waits += 1;
                dir.flush_requested = true;
                self.flusher_wakeup.notify_one();
                self.flusher_done.wait_for(dir, ADMISSION_WAIT);
                continue;
            }
            if admission_waits == MAX_ADMISSION_WAITS {
                warn!(
                    directory = dir.frames.len(),
                    dirty = dir.dirt,
                    "buffer.admission.gave_up"
                );
            }

            let frame = match dir.released.pop() {
                Some(frame) => frame,
                None => Arc::new(Frame::new(partition.page_size())),
            };
            frame.assign(Arc::clone(partition), page);
            let mut latch = frame.latch.write_arc();
            if latch.len() != partition.page_size() {
                *latch = vec![0u8; partition.page_size()].into_boxed_slice();
            }
            dir.frames.insert(key, Arc::clone(&frame));
            let size = dir.frames.len();
            if size > dir.stats.peak_directory {
                dir.stats.peak_directory = size;
            }
            return Lookup::Assigned(frame, latch);
        }
    }

    fn mark_dirty(&self, frame: &Frame) {
        if frame.state() == FrameState::WriteDirty {
            return;
        }
        let mut dir = self.directory.lock();
        let mut meta = frame.meta.lock();
        if meta.state != FrameState::WriteDirty {
            meta.state = FrameState::WriteDirty;
            dir.dirt += 1;
            if dir.dirt > self.dirt_limit {
                self.flusher_wakeup.notify_one();
            }
        }
    }

    /// Called after a guard dropped its latch.
    fn unfix(&self, frame: &Arc<Frame>, key: FrameKey) {
        if frame.state() == FrameState::WriteDirty {
            return;
        }
        let mut dir = self.directory.lock();
        Self::release_if_unused(&mut dir, frame, key);
    }

    /// Returns a frame nobody latches to the released list.
    ///
    /// Only a frame still cached under `key` is reclaimed: a frame that another
    /// unfix already released, or that was reassigned since, is left alone.
    fn release_if_unused(dir: &mut Directory, frame: &Arc<Frame>, key: FrameKey) {
        let Some(latch) = frame.latch.try_write_arc() else {
            return;
        };
        let mut meta = frame.meta.lock();
        if meta.key != Some(key) {
            return;
        }
        match meta.state {
            FrameState::Read | FrameState::Write => meta.state = FrameState::Empty,
            FrameState::Empty | FrameState::WriteDirty => {}
        }
        if meta.state == FrameState::Empty && frame.pending_intentions() == 0 {
            dir.frames.remove(&key);
            drop(meta);
            frame.reset();
            drop(latch);
            dir.released.push(Arc::clone(frame));
        }
    }

    /// Writes one batch of dirty frames. Called with the directory locked.
    fn do_flush(&self, dir: &mut MutexGuard<'_, Directory>) -> Result<FlushPass> {
        let mut pass = FlushPass::default();
        if dir.crashed {
            dir.dirt = 0;
            return Ok(pass);
        }
        let collect = self.options.flush_batch.min((self.dirt_limit / 2).max(1));
        let mut batch: Vec<(Arc<Frame>, SharedLatch, Arc<dyn Partition>, PageId)> = Vec::new();
        let mut force = Lsn(0);
        let mut remaining = 0usize;
        for frame in dir.frames.values() {
            let meta = frame.meta.lock();
            if meta.state != FrameState::WriteDirty {
                continue;
            }
            let (Some(partition), Some((_, page))) = (meta.partition.clone(), meta.key) else {
                continue;
            };
            if batch.len() >= collect {
                remaining += 1;
                continue;
            }
            match frame.latch.try_read_arc() {
                Some(latch) => {
                    force = force.max(meta.lsn);
                    batch.push((Arc::clone(frame), latch, partition, page));
                }
                None => {
                    pass.blocked = true;
                    remaining += 1;
                }
            }
        }
        dir.dirt = remaining;
        if batch.is_empty() {
            return Ok(pass);
        }
        batch.sort_by_key(|(_, _, partition, page)| (partition.id(), *page));

        let written = MutexGuard::unlocked(dir, || -> Result<()> {
            if let Some(log) = &self.log {
                log.force(force)?;
            }
            for (_, latch, partition, page) in &batch {
                partition.write_page(*page, &latch[..])?;
            }
            Ok(())
        });
        if let Err(err) = written {
            dir.dirt += batch.len();
            return Err(err);
        }

        pass.flushed = batch.len();
        for (frame, latch, partition, page) in batch {
            frame.set_state(FrameState::Write);
            drop(latch);
            Self::release_if_unused(dir, &frame, (partition.id(), page));
            merge_partitions(&mut pass.partitions, vec![partition]);
        }
        dir.stats.flushed_pages += pass.flushed as u64;

        if let (Some(log), true) = (&self.log, self.options.enable_checkpoints) {
            dir.pages_since_checkpoint += pass.flushed;
            if dir.pages_since_checkpoint > self.options.checkpoint_interval {
                let partitions = &pass.partitions;
                MutexGuard::unlocked(dir, || -> Result<()> {
                    for partition in partitions {
                        partition.flush()?;
                    }
                    log.checkpoint()
                })?;
                dir.pages_since_checkpoint = 0;
                dir.stats.checkpoints += 1;
                debug!(checkpoints = dir.stats.checkpoints, "buffer.checkpoint");
            }
        }
        debug!(
            pages = pass.flushed,
            remaining = dir.dirt,
            lsn = force.0,
            "buffer.flusher.batch"
        );
        Ok(pass)
    }

    fn flusher_loop(self: Arc<Self>) {
        let mut dir = self.directory.lock();
        loop {
            if dir.shutdown {
                break;
            }
            if dir.dirt > self.dirt_limit || dir.flush_requested {
                dir.flush_requested = false;
                let progressed = match self.do_flush(&mut dir) {
                    Ok(pass) => pass.flushed > 0,
                    Err(err) => {
                        warn!(error = %err, "buffer.flusher.failed");
                        false
                    }
                };
                self.flusher_done.notify_all();
                if !progressed {
                    self.flusher_wakeup
                        .wait_for(&mut dir, FLUSHER_BLOCKED_BACKOFF);
                }
                continue;
            }
            self.flusher_wakeup.wait_for(&mut dir, FLUSHER_IDLE);
        }
        self.flusher_done.notify_all();
        debug!("buffer.flusher.exit");
    }
}

fn merge_partitions(into: &mut Vec<Arc<dyn Partition>>, from: Vec<Arc<dyn Partition>>) {
    for partition in from {
        if !into.iter().any(|p| p.id() == partition.id()) {
            into.push(partition);
        }
    }
}

impl PageReadGuard {
    /// Page number of the latched page.
    pub fn page_id(&self) -> PageId {
        self.release.key.1
    }

    /// Page bytes.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }
}

impl Deref for PageReadGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

impl PageWriteGuard {
    /// Page number of the latched page.
    pub fn page_id(&self) -> PageId {
        self.release.key.1
    }

    /// Page bytes.
    pub fn data(&self) -> &[u8] {
        &self.latch[..]
    }

    /// Marks the page dirty and returns its writable bytes.
    pub fn update(&mut self) -> &mut [u8] {
        self.release.shared.mark_dirty(&self.release.frame);
        &mut self.latch[..]
    }

    /// Current state of the frame.
    pub fn state(&self) -> FrameState {
        self.release.frame.state()
    }

    /// LSN recorded for the page.
    pub fn lsn(&self) -> Lsn {
        self.release.frame.meta.lock().lsn
    }

    /// Records the LSN of the last change; the flusher forces the log up to it.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        let mut meta = self.release.frame.meta.lock();
        meta.lsn = meta.lsn.max(lsn);
    }

    /// Marks the page dirty and releases it without logging.
    pub fn unfix_without_recovery(self) {
        self.release.shared.mark_dirty(&self.release.frame);
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::buffer::FilePartition;
    use crate::types::PartitionId;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::tempdir;

    fn partition(dir: &tempfile::TempDir, pages: u64) -> Arc<dyn Partition> {
        let part = FilePartition::open(dir.path().join("buf.db"), PartitionId(0), 256).unwrap();
        part.grow(pages).unwrap();
        Arc::new(part)
    }

    fn options(buffer_size: usize) -> BufferOptions {
        BufferOptions {
            buffer_size,
            page_size: 256,
            ..BufferOptions::default()
        }
    }

    #[test]
    fn build_flush_and_read_back() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 4);
        let manager = BufferManager::new(options(8), None).unwrap();
        {
            let mut page = manager.build_page(&part, PageId(2)).unwrap();
            assert!(page.data().iter().all(|&b| b == 0));
            page.update()[..4].copy_from_slice(b"tri3");
            assert_eq!(page.state(), FrameState::WriteDirty);
        }
        assert_eq!(manager.stats().dirty, 1);
        manager.flush_all().unwrap();
        let stats = manager.stats();
        assert_eq!(stats.dirty, 0);
        assert_eq!(stats.directory, 0);
        assert_eq!(stats.flushed_pages, 1);

        let mut raw = vec![0u8; 256];
        part.read_page(PageId(2), &mut raw).unwrap();
        assert_eq!(&raw[..4], b"tri3");
        let page = manager.read_page_shared(&part, PageId(2)).unwrap();
        assert_eq!(&page[..4], b"tri3");
    }

    #[test]
    fn clean_frames_are_released_on_unfix() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 2);
        let manager = BufferManager::new(options(8), None).unwrap();
        {
            let a = manager.read_page_shared(&part, PageId(0)).unwrap();
            let b = manager.read_page_shared(&part, PageId(0)).unwrap();
            assert_eq!(a.page_id(), b.page_id());
            assert_eq!(manager.stats().directory, 1);
        }
        assert_eq!(manager.stats().directory, 0);
        {
            let page = manager.read_page_exclusive(&part, PageId(1)).unwrap();
            assert_eq!(page.state(), FrameState::Read);
        }
        assert_eq!(manager.stats().directory, 0);
    }

    #[test]
    fn dirty_page_stays_cached_until_flushed() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 1);
        let manager = BufferManager::new(options(64), None).unwrap();
        let mut page = manager.read_page_exclusive(&part, PageId(0)).unwrap();
        page.set_lsn(Lsn(7));
        page.update()[10] = 1;
        page.unfix_without_recovery();
        assert_eq!(manager.stats().directory, 1);
        let page = manager.read_page_shared(&part, PageId(0)).unwrap();
        assert_eq!(page[10], 1);
    }

    #[test]
    fn crash_discards_dirty_pages() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 1);
        let manager = BufferManager::new(options(64), None).unwrap();
        {
            let mut page = manager.build_page(&part, PageId(0)).unwrap();
            page.update()[100] = 42;
        }
        manager.crash();
        let mut raw = vec![0u8; 256];
        part.read_page(PageId(0), &mut raw).unwrap();
        assert_eq!(raw[100], 0);
    }

    #[test]
    fn reading_missing_page_fails_and_releases_frame() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 1);
        let manager = BufferManager::new(options(8), None).unwrap();
        assert!(manager.read_page_shared(&part, PageId(5)).is_err());
        assert_eq!(manager.stats().directory, 0);
    }

    fn released_frames_are_distinct(manager: &BufferManager) -> usize {
        let dir = manager.shared.directory.lock();
        for (i, frame) in dir.released.iter().enumerate() {
            assert!(
                !dir.released[i + 1..].iter().any(|other| Arc::ptr_eq(frame, other)),
                "frame listed twice in the released list"
            );
        }
        dir.released.len()
    }

    #[test]
    fn second_unfix_of_a_released_frame_is_ignored() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 2);
        let manager = BufferManager::new(options(8), None).unwrap();
        let guard = manager.read_page_shared(&part, PageId(0)).unwrap();
        let frame = Arc::clone(&guard.release.frame);
        drop(guard);
        assert_eq!(released_frames_are_distinct(&manager), 1);

        manager.shared.unfix(&frame, (part.id(), PageId(0)));
        assert_eq!(released_frames_are_distinct(&manager), 1);

        let a = manager.read_page_shared(&part, PageId(0)).unwrap();
        let b = manager.read_page_shared(&part, PageId(1)).unwrap();
        assert!(!Arc::ptr_eq(&a.release.frame, &b.release.frame));
        manager.shared.unfix(&frame, (part.id(), PageId(1)));
        assert_eq!(manager.stats().directory, 2);
    }

    #[test]
    fn concurrent_shared_readers_release_each_frame_once() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 3);
        let manager = BufferManager::new(options(4), None).unwrap();
        for page in 0..3u64 {
            let mut guard = manager.build_page(&part, PageId(page)).unwrap();
            guard.update().fill(page as u8 + 1);
        }
        manager.flush_all().unwrap();

        thread::scope(|scope| {
            for t in 0..4u64 {
                let manager = &manager;
                let part = &part;
                scope.spawn(move || {
                    for i in 0..200u64 {
                        let page = (t + i) % 3;
                        let guard = manager.read_page_shared(part, PageId(page)).unwrap();
                        assert!(guard.iter().all(|&b| b == page as u8 + 1), "page {page}");
                    }
                });
            }
        });
        assert_eq!(manager.stats().directory, 0);
        released_frames_are_distinct(&manager);
    }

    struct CountingLog {
        forced: AtomicU64,
        checkpoints: AtomicU64,
    }

    impl LogManager for CountingLog {
        fn force(&self, lsn: Lsn) -> Result<()> {
            self.forced.fetch_max(lsn.0, Ordering::SeqCst);
            Ok(())
        }

        fn checkpoint(&self) -> Result<()> {
            self.checkpoints.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn flusher_forces_log_and_checkpoints() {
        let dir = tempdir().unwrap();
        let part = partition(&dir, 64);
        let log = Arc::new(CountingLog {
            forced: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),
        });
        let opts = BufferOptions {
            enable_checkpoints: true,
            checkpoint_interval: 4,
            ..options(16)
        };
        let manager = BufferManager::new(opts, Some(log.clone() as Arc<dyn LogManager>)).unwrap();
        for page in 0..32u64 {
            let mut guard = manager.build_page(&part, PageId(page)).unwrap();
            guard.set_lsn(Lsn(page + 1));
            guard.update()[0] = page as u8;
        }
        manager.flush_all().unwrap();
        assert_eq!(log.forced.load(Ordering::SeqCst), 32);
        assert!(log.checkpoints.load(Ordering::SeqCst) >= 1);
        assert!(manager.stats().checkpoints >= 1);
    }
}
