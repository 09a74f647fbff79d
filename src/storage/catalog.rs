#![forbid(unsafe_code)]
//! Segment directory stored from page 0 of a database partition.

use std::sync::Arc;

use crate::primitives::buffer::{BufferManager, Partition};
use crate::primitives::bytes::{buf::Cursor, var};
use crate::storage::blob;
use crate::types::page::PageKind;
use crate::types::{PageId, Result, TristoreError};

/// Page holding the start of the catalog.
pub const CATALOG_PAGE: PageId = PageId(0);
const CATALOG_VERSION: u64 = 1;

/// Segment families recorded in the catalog.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentKind {
    /// Raw triples.
    Facts = 1,
    /// `(v1, v2, count)` tables.
    Aggregated = 2,
    /// `(v1, count)` tables.
    FullyAggregated = 3,
    /// One tree of the exact statistics.
    ExactStatistics = 4,
    /// Predicate set blob.
    PredicateSets = 5,
}

impl TryFrom<u64> for SegmentKind {
    type Error = TristoreError;

    fn try_from(value: u64) -> Result<Self> {
        Ok(match value {
            1 => SegmentKind::Facts,
            2 => SegmentKind::Aggregated,
            3 => SegmentKind::FullyAggregated,
            4 => SegmentKind::ExactStatistics,
            5 => SegmentKind::PredicateSets,
            _ => return Err(TristoreError::Corruption("unknown segment kind")),
        })
    }
}

/// Placement and statistics of one segment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SegmentInfo {
    /// Segment family.
    pub kind: SegmentKind,
    /// Data order or tree index within the family.
    pub slot: u8,
    /// Root (or first) page.
    pub root: PageId,
    /// Pages used.
    pub pages: u64,
    /// Family-specific counters.
    pub values: Vec<u64>,
}

/// Directory of all segments of a database.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Catalog {
    /// Distinct triples loaded.
    pub triples: u64,
    /// Registered segments.
    pub segments: Vec<SegmentInfo>,
}

impl Catalog {
    /// Looks up a segment by family and slot.
    pub fn find(&self, kind: SegmentKind, slot: u8) -> Result<&SegmentInfo> {
        self.segments
            .iter()
            .find(|s| s.kind == kind && s.slot == slot)
            .ok_or(TristoreError::NotFound)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        var::encode_u64(CATALOG_VERSION, &mut out);
        var::encode_u64(self.triples, &mut out);
        var::encode_u64(self.segments.len() as u64, &mut out);
        for segment in &self.segments {
            var::encode_u64(segment.kind as u64, &mut out);
            var::encode_u64(u64::from(segment.slot), &mut out);
            var::encode_u64(segment.root.0, &mut out);
            var::encode_u64(segment.pages, &mut out);
            var::encode_u64(segment.values.len() as u64, &mut out);
            for value in &segment.values {
                var::encode_u64(*value, &mut out);
            }
        }
        out
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(raw);
        if cur.varint()? != CATALOG_VERSION {
            return Err(TristoreError::Corruption("unsupported catalog version"));
        }
        let triples = cur.varint()?;
        let count = cur.varint()?;
        let mut segments = Vec::new();
        for _ in 0..count {
            let kind = SegmentKind::try_from(cur.varint()?)?;
            let slot = u8::try_from(cur.varint()?)
                .map_err(|_| TristoreError::Corruption("catalog slot out of range"))?;
            let root = PageId(cur.varint()?);
            let pages = cur.varint()?;
            let len = cur.varint()?;
            if len > cur.remaining() as u64 {
                return Err(TristoreError::Corruption("catalog value count"));
            }
            let values = (0..len).map(|_| cur.varint()).collect::<Result<Vec<_>>>()?;
            segments.push(SegmentInfo {
                kind,
                slot,
                root,
                pages,
                values,
            });
        }
        Ok(Self { triples, segments })
    }

    /// Writes the catalog starting at [`CATALOG_PAGE`], which must exist.
    pub fn write(&self, buffer: &BufferManager, partition: &Arc<dyn Partition>) -> Result<()> {
        blob::write_chain(
            buffer,
            partition,
            Some(CATALOG_PAGE),
            PageKind::Meta,
            &self.encode(),
        )?;
        Ok(())
    }

    /// Reads the catalog of an existing partition.
    pub fn read(buffer: &BufferManager, partition: &Arc<dyn Partition>) -> Result<Self> {
        let raw = blob::read_chain(buffer, partition, CATALOG_PAGE, PageKind::Meta)?;
        Self::decode(&raw)
    }
}
