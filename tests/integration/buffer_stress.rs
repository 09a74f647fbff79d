#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;
use tristore::primitives::buffer::{BufferManager, BufferOptions, FilePartition, Partition};
use tristore::types::{PageId, PartitionId, Result};

const PAGE_SIZE: usize = 256;
const PAGES: u64 = 96;
const THREADS: u64 = 4;
const WRITES_PER_THREAD: usize = 400;
const SEED: u64 = 0xb0ff_e2;

fn setup(dir: &tempfile::TempDir, buffer_size: usize) -> Result<(Arc<dyn Partition>, BufferManager)> {
    let partition = FilePartition::open(dir.path().join("stress.db"), PartitionId(0), PAGE_SIZE)?;
    partition.grow(PAGES)?;
    let manager = BufferManager::new(
        BufferOptions {
            buffer_size,
            flush_batch: 8,
            page_size: PAGE_SIZE,
            ..BufferOptions::default()
        },
        None,
    )?;
    Ok((Arc::new(partition), manager))
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[test]
fn concurrent_writers_with_small_buffer_persist_every_page() -> Result<()> {
    let dir = tempdir()?;
    let (partition, manager) = setup(&dir, 16)?;

    let expected: Vec<Vec<(u64, u64)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let partition = &partition;
                let manager = &manager;
                scope.spawn(move || -> Result<Vec<(u64, u64)>> {
                    let mut rng = ChaCha8Rng::seed_from_u64(SEED + t);
                    let owned: Vec<u64> = (0..PAGES).filter(|p| p % THREADS == t).collect();
                    let mut last = vec![0u64; owned.len()];
                    for _ in 0..WRITES_PER_THREAD {
                        let slot = rng.gen_range(0..owned.len());
                        let value = rng.gen::<u64>() | 1;
                        let mut page = manager.read_page_exclusive(partition, PageId(owned[slot]))?;
                        page.update()[8..16].copy_from_slice(&value.to_le_bytes());
                        last[slot] = value;
                    }
                    Ok(owned.into_iter().zip(last).collect())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("writer thread panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    manager.flush_all()?;
    let stats = manager.stats();
    let touched = expected.iter().flatten().filter(|(_, value)| *value != 0).count() as u64;
    assert_eq!(stats.dirty, 0);
    assert_eq!(stats.directory, 0);
    assert!(stats.peak_directory > 0);
    assert!(stats.peak_directory <= manager.options().hard_limit(), "{stats:?}");
    assert!(stats.flushed_pages >= touched, "{stats:?}");
    drop(manager);

    let mut raw = vec![0u8; PAGE_SIZE];
    for (page, value) in expected.into_iter().flatten() {
        partition.read_page(PageId(page), &mut raw)?;
        assert_eq!(read_u64(&raw, 8), value, "page {page}");
    }
    Ok(())
}

#[test]
fn exclusive_latches_serialize_increments() -> Result<()> {
    let dir = tempdir()?;
    let (partition, manager) = setup(&dir, 8)?;
    const INCREMENTS: u64 = 250;

    thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::new();
        for _ in 0..THREADS {
            handles.push(scope.spawn(|| -> Result<()> {
                for _ in 0..INCREMENTS {
                    let mut page = manager.read_page_exclusive(&partition, PageId(3))?;
                    let next = read_u64(page.data(), 0) + 1;
                    page.update()[..8].copy_from_slice(&next.to_le_bytes());
                }
                Ok(())
            }));
        }
        for _ in 0..THREADS {
            handles.push(scope.spawn(|| -> Result<()> {
                for _ in 0..INCREMENTS {
                    let page = manager.read_page_shared(&partition, PageId(3))?;
                    assert!(read_u64(&page, 0) <= THREADS * INCREMENTS);
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("latch thread panicked")?;
        }
        Ok(())
    })?;

    let page = manager.read_page_shared(&partition, PageId(3))?;
    assert_eq!(read_u64(&page, 0), THREADS * INCREMENTS);
    drop(page);
    manager.flush_all()?;
    let mut raw = vec![0u8; PAGE_SIZE];
    partition.read_page(PageId(3), &mut raw)?;
    assert_eq!(read_u64(&raw, 0), THREADS * INCREMENTS);
    Ok(())
}

/// Stamps a page image with its page number and version, then filler bytes.
fn rewrite(bytes: &mut [u8], page: u64, version: u64) {
    bytes[..8].copy_from_slice(&page.to_le_bytes());
    bytes[8..16].copy_from_slice(&version.to_le_bytes());
    bytes[16..].fill(version as u8);
}

/// Returns the version stored in `bytes`, checking the page is well formed.
fn checked_version(bytes: &[u8], page: u64) -> u64 {
    let version = read_u64(bytes, 8);
    if version == 0 {
        assert!(bytes.iter().all(|&b| b == 0), "unwritten page {page} has content");
    } else {
        assert_eq!(read_u64(bytes, 0), page, "page {page} holds another page's image");
        assert!(bytes[16..].iter().all(|&b| b == version as u8), "torn page {page}");
    }
    version
}

#[test]
fn readers_see_committed_versions_while_builders_evict() -> Result<()> {
    const BUFFER: usize = 8;
    const HOT_PAGES: u64 = 40;
    const WRITERS: u64 = 2;
    const BUILDS: usize = 300;
    const READERS: u64 = 4;
    const READS: usize = 600;

    let dir = tempdir()?;
    let (partition, manager) = setup(&dir, BUFFER)?;
    // `started` is bumped before a builder writes a version, `committed` after its latch is gone.
    let started: Vec<AtomicU64> = (0..HOT_PAGES).map(|_| AtomicU64::new(0)).collect();
    let committed: Vec<AtomicU64> = (0..HOT_PAGES).map(|_| AtomicU64::new(0)).collect();

    thread::scope(|scope| -> Result<()> {
        let mut handles = Vec::new();
        for t in 0..WRITERS {
            let (partition, manager) = (&partition, &manager);
            let (started, committed) = (&started, &committed);
            handles.push(scope.spawn(move || -> Result<()> {
                let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ (t + 1));
                let owned: Vec<u64> = (0..HOT_PAGES).filter(|p| p % WRITERS == t).collect();
                for _ in 0..BUILDS {
                    let page = owned[rng.gen_range(0..owned.len())];
                    let version = started[page as usize].load(Ordering::SeqCst) + 1;
                    started[page as usize].store(version, Ordering::SeqCst);
                    let mut guard = manager.build_page(partition, PageId(page))?;
                    rewrite(guard.update(), page, version);
                    drop(guard);
                    committed[page as usize].store(version, Ordering::SeqCst);
                }
                Ok(())
            }));
        }
        for t in 0..READERS {
            let (partition, manager) = (&partition, &manager);
            let (started, committed) = (&started, &committed);
            handles.push(scope.spawn(move || -> Result<()> {
                let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ (0x100 + t));
                for _ in 0..READS {
                    let page = rng.gen_range(0..HOT_PAGES);
                    let floor = committed[page as usize].load(Ordering::SeqCst);
                    let guard = manager.read_page_shared(partition, PageId(page))?;
                    let version = checked_version(&guard, page);
                    drop(guard);
                    let ceiling = started[page as usize].load(Ordering::SeqCst);
                    assert!(
                        (floor..=ceiling).contains(&version),
                        "page {page}: read {version}, committed {floor}, started {ceiling}"
                    );
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().expect("buffer thread panicked")?;
        }
        Ok(())
    })?;

    manager.flush_all()?;
    let stats = manager.stats();
    assert_eq!(stats.dirty, 0);
    assert_eq!(stats.directory, 0);
    assert!(stats.peak_directory <= manager.options().hard_limit(), "{stats:?}");
    drop(manager);

    let mut raw = vec![0u8; PAGE_SIZE];
    for page in 0..HOT_PAGES {
        partition.read_page(PageId(page), &mut raw)?;
        let version = checked_version(&raw, page);
        assert_eq!(version, committed[page as usize].load(Ordering::SeqCst), "page {page}");
    }
    Ok(())
}

#[test]
fn shared_readers_on_a_hot_set_keep_page_contents() -> Result<()> {
    const HOT_PAGES: u64 = 8;
    const READERS: u64 = 8;
    const READS: usize = 500;

    let dir = tempdir()?;
    let (partition, manager) = setup(&dir, 2)?;
    for page in 0..HOT_PAGES {
        let mut guard = manager.build_page(&partition, PageId(page))?;
        guard.update().fill(page as u8 + 1);
    }
    manager.flush_all()?;

    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..READERS)
            .map(|t| {
                let (partition, manager) = (&partition, &manager);
                scope.spawn(move || -> Result<()> {
                    let mut rng = ChaCha8Rng::seed_from_u64(SEED ^ (0x200 + t));
                    let mut held = Vec::new();
                    for _ in 0..READS {
                        let page = rng.gen_range(0..HOT_PAGES);
                        let guard = manager.read_page_shared(partition, PageId(page))?;
                        assert!(guard.iter().all(|&b| b == page as u8 + 1), "page {page}");
                        held.push(guard);
                        if held.len() > 1 || rng.gen_bool(0.5) {
                            held.clear();
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("reader thread panicked")?;
        }
        Ok(())
    })?;

    assert_eq!(manager.stats().directory, 0);
    Ok(())
}
