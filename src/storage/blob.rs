#![forbid(unsafe_code)]
//! Byte strings spread over a chain of pages.

use std::ops::Range;
use std::sync::Arc;

use crate::primitives::buffer::{BufferManager, Partition};
use crate::types::page::{self, PageHeader, PageKind, PAGE_HDR_LEN};
use crate::types::{PageId, Result, TristoreError};

const NO_PAGE: u64 = u64::MAX;
const NEXT: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
const LEN: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 12;
const DATA: usize = PAGE_HDR_LEN + 12;

/// Writes `bytes` as a page chain. When `first` is given the chain starts
/// there (the page must already exist); other pages are appended.
pub fn write_chain(
    buffer: &BufferManager,
    partition: &Arc<dyn Partition>,
    first: Option<PageId>,
    kind: PageKind,
    bytes: &[u8],
) -> Result<(PageId, u64)> {
    let chunk = partition
        .page_size()
        .checked_sub(DATA)
        .filter(|chunk| *chunk > 0)
        .ok_or(TristoreError::Invalid("page size too small for blobs"))?;
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[][..]]
    } else {
        bytes.chunks(chunk).collect()
    };
    let mut pages = Vec::with_capacity(chunks.len());
    if let Some(first) = first {
        pages.push(first);
    }
    let missing = (chunks.len() - pages.len()) as u64;
    if missing > 0 {
        let start = partition.grow(missing)?;
        pages.extend((0..missing).map(|i| PageId(start.0 + i)));
    }
    for (index, data) in chunks.iter().enumerate() {
        let page = pages[index];
        let next = pages.get(index + 1).map_or(NO_PAGE, |p| p.0);
        let mut guard = buffer.build_page(partition, page)?;
        let buf = guard.update();
        buf.fill(0);
        PageHeader::new(page, kind, buf.len() as u32)?.encode(buf)?;
        buf[NEXT].copy_from_slice(&next.to_be_bytes());
        buf[LEN].copy_from_slice(&(data.len() as u32).to_be_bytes());
        buf[DATA..DATA + data.len()].copy_from_slice(data);
        page::seal(buf, page)?;
    }
    Ok((pages[0], pages.len() as u64))
}

/// Reads a chain written by [`write_chain`].
pub fn read_chain(
    buffer: &BufferManager,
    partition: &Arc<dyn Partition>,
    first: PageId,
    kind: PageKind,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut current = Some(first);
    let mut hops = 0u64;
    while let Some(page) = current {
        hops += 1;
        if hops > partition.size() {
            return Err(TristoreError::Corruption("blob chain loops"));
        }
        let guard = buffer.read_page_shared(partition, page)?;
        let header = page::verify(&guard, page)?;
        if header.kind != kind {
            return Err(TristoreError::Corruption("unexpected blob page kind"));
        }
        let next = u64::from_be_bytes(
            guard[NEXT]
                .try_into()
                .map_err(|_| TristoreError::Corruption("blob next pointer"))?,
        );
        let len = u32::from_be_bytes(
            guard[LEN]
                .try_into()
                .map_err(|_| TristoreError::Corruption("blob length"))?,
        ) as usize;
        let data = guard
            .get(DATA..DATA + len)
            .ok_or(TristoreError::Corruption("blob length"))?;
        out.extend_from_slice(data);
        current = (next != NO_PAGE).then_some(PageId(next));
    }
    Ok(out)
}
