#![forbid(unsafe_code)]
//! Bulk-loaded, read-only B-tree over buffer-managed pages.
//!
//! Leaves hold a codec-specific payload and are chained left to right;
//! inner nodes store `(max key, child)` pairs. Keys are 12-byte big-endian
//! tuples so byte order equals numeric order of `(v1, v2, v3)`.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use crate::primitives::buffer::{BufferManager, Partition};
use crate::primitives::bytes::ord;
use crate::types::page::{self, PageHeader, PageKind, PAGE_HDR_LEN};
use crate::types::{PageId, Result, TristoreError};

/// Fixed-width search key.
pub type Key = [u8; 12];

const NO_PAGE: u64 = u64::MAX;
const LEAF_NEXT: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
const LEAF_LEN: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 12;
/// Offset of the leaf payload.
pub const LEAF_PAYLOAD: usize = PAGE_HDR_LEN + 12;
const INNER_COUNT: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 4;
const INNER_ENTRIES: usize = PAGE_HDR_LEN + 8;
const INNER_ENTRY_LEN: usize = 20;

/// Builds a key from up to three components.
pub fn key(v1: u32, v2: u32, v3: u32) -> Key {
    ord::key3(v1, v2, v3)
}

/// Encoding of one segment's leaf entries.
pub trait LeafCodec {
    /// Decoded entry.
    type Entry: Clone;

    /// Search key of an entry.
    fn key(entry: &Self::Entry) -> Key;

    /// Packs a prefix of `entries` into at most `capacity` bytes and
    /// returns how many entries were consumed.
    fn pack(entries: &[Self::Entry], capacity: usize) -> Result<(usize, Vec<u8>)>;

    /// Decodes a leaf payload.
    fn unpack(payload: &[u8]) -> Result<Vec<Self::Entry>>;
}

/// Placement of a freshly built tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TreeInfo {
    /// Root page.
    pub root: PageId,
    /// Leftmost leaf.
    pub first_leaf: PageId,
    /// Leaf pages.
    pub leaves: u64,
    /// Leaf and inner pages.
    pub pages: u64,
}

/// Bulk loads `entries`, which must be sorted by [`LeafCodec::key`].
pub fn bulk_load<C: LeafCodec>(
    buffer: &BufferManager,
    partition: &Arc<dyn Partition>,
    entries: &[C::Entry],
) -> Result<TreeInfo> {
    let page_size = partition.page_size();
    let capacity = page_size
        .checked_sub(LEAF_PAYLOAD)
        .ok_or(TristoreError::Invalid("page size too small for a leaf"))?;

    let mut leaves: Vec<(Key, Vec<u8>)> = Vec::new();
    let mut rest = entries;
    while !rest.is_empty() {
        let (consumed, payload) = C::pack(rest, capacity)?;
        if consumed == 0 || payload.len() > capacity {
            return Err(TristoreError::Invalid("leaf entry does not fit into a page"));
        }
        leaves.push((C::key(&rest[consumed - 1]), payload));
        rest = &rest[consumed..];
    }
    if leaves.is_empty() {
        leaves.push(([0xFF; 12], Vec::new()));
    }

    let count = leaves.len() as u64;
    let first = partition.grow(count)?;
    let mut level: Vec<(Key, PageId)> = Vec::with_capacity(leaves.len());
    for (index, (max, payload)) in leaves.iter().enumerate() {
        let page = PageId(first.0 + index as u64);
        let next = if index + 1 < leaves.len() {
            page.0 + 1
        } else {
            NO_PAGE
        };
        write_node(buffer, partition, page, PageKind::BTreeLeaf, |buf| {
            buf[LEAF_NEXT].copy_from_slice(&next.to_be_bytes());
            buf[LEAF_LEN].copy_from_slice(&(payload.len() as u32).to_be_bytes());
            buf[LEAF_PAYLOAD..LEAF_PAYLOAD + payload.len()].copy_from_slice(payload);
        })?;
        level.push((*max, page));
    }

    let fanout = (page_size - INNER_ENTRIES) / INNER_ENTRY_LEN;
    if fanout < 2 {
        return Err(TristoreError::Invalid("page size too small for inner nodes"));
    }
    let mut pages = count;
    while level.len() > 1 {
        let nodes = level.len().div_ceil(fanout);
        let start = partition.grow(nodes as u64)?;
        let mut parent = Vec::with_capacity(nodes);
        for (index, children) in level.chunks(fanout).enumerate() {
            let page = PageId(start.0 + index as u64);
            write_node(buffer, partition, page, PageKind::BTreeInner, |buf| {
                buf[INNER_COUNT].copy_from_slice(&(children.len() as u32).to_be_bytes());
                for (slot, (max, child)) in children.iter().enumerate() {
                    let at = INNER_ENTRIES + slot * INNER_ENTRY_LEN;
                    buf[at..at + 12].copy_from_slice(max);
                    buf[at + 12..at + 20].copy_from_slice(&child.0.to_be_bytes());
                }
            })?;
            let max = children.last().map(|(max, _)| *max).unwrap_or([0xFF; 12]);
            parent.push((max, page));
        }
        pages += nodes as u64;
        level = parent;
    }

    let info = TreeInfo {
        root: level[0].1,
        first_leaf: first,
        leaves: count,
        pages,
    };
    debug!(
        root = info.root.0,
        leaves = info.leaves,
        pages = info.pages,
        "btree.bulk_load"
    );
    Ok(info)
}

fn write_node(
    buffer: &BufferManager,
    partition: &Arc<dyn Partition>,
    page: PageId,
    kind: PageKind,
    body: impl FnOnce(&mut [u8]),
) -> Result<()> {
    let mut guard = buffer.build_page(partition, page)?;
    let buf = guard.update();
    buf.fill(0);
    PageHeader::new(page, kind, buf.len() as u32)?.encode(buf)?;
    body(buf);
    page::seal(buf, page)
}

/// A decoded leaf page.
#[derive(Debug)]
pub struct Leaf {
    /// Codec payload.
    pub payload: Vec<u8>,
    /// Right sibling.
    pub next: Option<PageId>,
}

/// Read handle on a bulk-loaded tree.
#[derive(Clone)]
pub struct Tree {
    buffer: Arc<BufferManager>,
    partition: Arc<dyn Partition>,
    root: PageId,
}

impl Tree {
    /// Opens the tree rooted at `root`.
    pub fn open(buffer: Arc<BufferManager>, partition: Arc<dyn Partition>, root: PageId) -> Self {
        Self {
            buffer,
            partition,
            root,
        }
    }

    /// Root page.
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Finds the leaf that would contain `key`, or `None` when `key` is
    /// larger than every stored key.
    pub fn find_leaf(&self, key: &Key) -> Result<Option<PageId>> {
        let mut page = self.root;
        loop {
            let guard = self.buffer.read_page_shared(&self.partition, page)?;
            let header = page::verify(&guard, page)?;
            match header.kind {
                PageKind::BTreeLeaf => return Ok(Some(page)),
                PageKind::BTreeInner => {
                    let count = read_u32(&guard, INNER_COUNT)? as usize;
                    let entry_max = |slot: usize| {
                        let at = INNER_ENTRIES + slot * INNER_ENTRY_LEN;
                        &guard[at..at + 12]
                    };
                    if INNER_ENTRIES + count * INNER_ENTRY_LEN > guard.len() {
                        return Err(TristoreError::Corruption("inner node entry count"));
                    }
                    let (mut lo, mut hi) = (0usize, count);
                    while lo < hi {
                        let mid = (lo + hi) / 2;
                        if entry_max(mid) < &key[..] {
                            lo = mid + 1;
                        } else {
                            hi = mid;
                        }
                    }
                    if lo == count {
                        return Ok(None);
                    }
                    let at = INNER_ENTRIES + lo * INNER_ENTRY_LEN + 12;
                    page = PageId(read_u64(&guard, at..at + 8)?);
                }
                _ => return Err(TristoreError::Corruption("unexpected page kind in tree")),
            }
        }
    }

    /// Reads one leaf page.
    pub fn read_leaf(&self, page: PageId) -> Result<Leaf> {
        let guard = self.buffer.read_page_shared(&self.partition, page)?;
        let header = page::verify(&guard, page)?;
        if header.kind != PageKind::BTreeLeaf {
            return Err(TristoreError::Corruption("expected a leaf page"));
        }
        let next = read_u64(&guard, LEAF_NEXT)?;
        let len = read_u32(&guard, LEAF_LEN)? as usize;
        let payload = guard
            .get(LEAF_PAYLOAD..LEAF_PAYLOAD + len)
            .ok_or(TristoreError::Corruption("leaf payload length"))?
            .to_vec();
        Ok(Leaf {
            payload,
            next: (next != NO_PAGE).then_some(PageId(next)),
        })
    }

    /// Scans every entry from the leftmost leaf.
    pub fn scan<C: LeafCodec>(&self) -> Result<Scan<C>> {
        self.scan_from::<C>(&[0; 12])
    }

    /// Scans entries with key `>= from`.
    pub fn scan_from<C: LeafCodec>(&self, from: &Key) -> Result<Scan<C>> {
        let Some(page) = self.find_leaf(from)? else {
            return Ok(Scan::empty(self.clone()));
        };
        let leaf = self.read_leaf(page)?;
        let entries: Vec<C::Entry> = C::unpack(&leaf.payload)?
            .into_iter()
            .skip_while(|entry| C::key(entry) < *from)
            .collect();
        Ok(Scan {
            tree: self.clone(),
            entries: entries.into_iter(),
            next: leaf.next,
        })
    }
}

fn read_u32(buf: &[u8], range: Range<usize>) -> Result<u32> {
    buf.get(range)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or(TristoreError::Corruption("page field truncated"))
}

fn read_u64(buf: &[u8], range: Range<usize>) -> Result<u64> {
    buf.get(range)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or(TristoreError::Corruption("page field truncated"))
}

/// Forward iterator over the entries of a tree.
pub struct Scan<C: LeafCodec> {
    tree: Tree,
    entries: std::vec::IntoIter<C::Entry>,
    next: Option<PageId>,
}

impl<C: LeafCodec> Scan<C> {
    fn empty(tree: Tree) -> Self {
        Self {
            tree,
            entries: Vec::new().into_iter(),
            next: None,
        }
    }
}

impl<C: LeafCodec> Iterator for Scan<C> {
    type Item = Result<C::Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entries.next() {
                return Some(Ok(entry));
            }
            let page = self.next.take()?;
            let leaf = match self.tree.read_leaf(page) {
                Ok(leaf) => leaf,
                Err(err) => return Some(Err(err)),
            };
            match C::unpack(&leaf.payload) {
                Ok(entries) => self.entries = entries.into_iter(),
                Err(err) => return Some(Err(err)),
            }
            self.next = leaf.next;
        }
    }
}
