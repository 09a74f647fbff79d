#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::primitives::buffer::{BufferManager, Partition};
use crate::primitives::bytes::{buf::Cursor, pack};
use crate::storage::btree::{self, Key, LeafCodec, Scan, Tree, TreeInfo};
use crate::storage::facts::Triple;
use crate::storage::SegmentStats;
use crate::types::{Result, TristoreError};

/// Number of triples sharing the leading component `v1`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FullyAggregatedEntry {
    /// Leading component.
    pub v1: u32,
    /// Triples with this leading value.
    pub count: u32,
}

/// Leaf format of [`FullyAggregatedFactsSegment`]: first entry raw, then
/// `(count - 1) << 4 | gap` for gaps below 16 with counts up to 8, or
/// `0x80 | b1 * 5 + b2` followed by `gap - 1` and `count - 1` packed.
pub struct FullyAggregatedCodec;

impl LeafCodec for FullyAggregatedCodec {
    type Entry = FullyAggregatedEntry;

    fn key(entry: &FullyAggregatedEntry) -> Key {
        btree::key(entry.v1, 0, 0)
    }

    fn pack(entries: &[FullyAggregatedEntry], capacity: usize) -> Result<(usize, Vec<u8>)> {
        let mut out = Vec::new();
        let Some(first) = entries.first() else {
            return Ok((0, out));
        };
        if capacity < 8 {
            return Ok((0, out));
        }
        out.extend_from_slice(&first.v1.to_be_bytes());
        out.extend_from_slice(&first.count.to_be_bytes());
        let mut last = first.v1;
        for (index, entry) in entries.iter().enumerate().skip(1) {
            if entry.v1 == last {
                continue;
            }
            if entry.v1 < last || entry.count == 0 {
                return Err(TristoreError::Invalid(
                    "fully aggregated entries must be sorted with positive counts",
                ));
            }
            let gap = entry.v1 - last;
            if gap < 16 && entry.count <= 8 {
                if out.len() + 1 > capacity {
                    return Ok((index, out));
                }
                out.push((((entry.count - 1) << 4) | gap) as u8);
            } else {
                let (b1, b2) = (pack::bytes0(gap - 1), pack::bytes0(entry.count - 1));
                if out.len() + 1 + b1 + b2 > capacity {
                    return Ok((index, out));
                }
                out.push(0x80 | (b1 * 5 + b2) as u8);
                pack::write_delta0(&mut out, gap - 1);
                pack::write_delta0(&mut out, entry.count - 1);
            }
            last = entry.v1;
        }
        Ok((entries.len(), out))
    }

    fn unpack(payload: &[u8]) -> Result<Vec<FullyAggregatedEntry>> {
        let mut entries = Vec::new();
        if payload.is_empty() {
            return Ok(entries);
        }
        let mut cur = Cursor::new(payload);
        let mut entry = FullyAggregatedEntry {
            v1: cur.u32_be()?,
            count: cur.u32_be()?,
        };
        entries.push(entry);
        let body = &payload[8..];
        let mut off = 0;
        while off < body.len() {
            let info = body[off];
            off += 1;
            let (gap, count) = if info < 0x80 {
                if info == 0 {
                    break;
                }
                (u32::from(info & 15), u32::from(info >> 4) + 1)
            } else {
                let code = usize::from(info & 0x7F);
                if code >= 25 {
                    return Err(TristoreError::Corruption(
                        "fully aggregated opcode out of range",
                    ));
                }
                let gap = pack::read_delta(body, &mut off, code / 5)?;
                let count = pack::read_delta(body, &mut off, code % 5)?;
                (
                    gap.checked_add(1)
                        .ok_or(TristoreError::Corruption("fully aggregated gap overflows"))?,
                    count
                        .checked_add(1)
                        .ok_or(TristoreError::Corruption("fully aggregated count overflows"))?,
                )
            };
            entry.v1 = entry
                .v1
                .checked_add(gap)
                .ok_or(TristoreError::Corruption("fully aggregated delta overflows"))?;
            entry.count = count;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Groups sorted triples by their leading component.
pub fn aggregate_fully(triples: &[Triple]) -> Vec<FullyAggregatedEntry> {
    let mut out: Vec<FullyAggregatedEntry> = Vec::new();
    for &(v1, _, _) in triples {
        match out.last_mut() {
            Some(last) if last.v1 == v1 => last.count += 1,
            _ => out.push(FullyAggregatedEntry { v1, count: 1 }),
        }
    }
    out
}

/// `(v1, count)` table keyed by the leading component of an order.
pub struct FullyAggregatedFactsSegment {
    tree: Tree,
    stats: SegmentStats,
}

impl FullyAggregatedFactsSegment {
    /// Writes the full aggregation of `triples` as a new tree.
    pub fn build(
        buffer: &BufferManager,
        partition: &Arc<dyn Partition>,
        triples: &[Triple],
    ) -> Result<(TreeInfo, SegmentStats)> {
        let entries = aggregate_fully(triples);
        let info = btree::bulk_load::<FullyAggregatedCodec>(buffer, partition, &entries)?;
        let stats = SegmentStats {
            pages: info.pages,
            level1_groups: entries.len() as u64,
            level2_groups: 0,
            cardinality: triples.len() as u64,
        };
        Ok((info, stats))
    }

    /// Opens a segment built earlier.
    pub fn open(tree: Tree, stats: SegmentStats) -> Self {
        Self { tree, stats }
    }

    /// Iterates over every entry.
    pub fn scan(&self) -> Result<Scan<FullyAggregatedCodec>> {
        self.tree.scan::<FullyAggregatedCodec>()
    }

    /// Iterates from the first entry `>= v1`.
    pub fn scan_from(&self, v1: u32) -> Result<Scan<FullyAggregatedCodec>> {
        self.tree
            .scan_from::<FullyAggregatedCodec>(&btree::key(v1, 0, 0))
    }

    /// Count of triples whose leading component is `v1`.
    pub fn lookup(&self, v1: u32) -> Result<Option<u32>> {
        match self.scan_from(v1)?.next().transpose()? {
            Some(entry) if entry.v1 == v1 => Ok(Some(entry.count)),
            _ => Ok(None),
        }
    }

    /// Pages used by the tree.
    pub fn pages(&self) -> u64 {
        self.stats.pages
    }

    /// Number of entries.
    pub fn level1_groups(&self) -> u64 {
        self.stats.level1_groups
    }

    /// All statistics at once.
    pub fn stats(&self) -> SegmentStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::btree_map;
    use proptest::prelude::*;

    fn e(v1: u32, count: u32) -> FullyAggregatedEntry {
        FullyAggregatedEntry { v1, count }
    }

    #[test]
    fn opcodes_match_gap_and_count() {
        let entries = [e(10, 3), e(12, 8), e(40, 1), e(41, 1000)];
        let (consumed, payload) = FullyAggregatedCodec::pack(&entries, 64).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(payload[8], (7 << 4) | 2);
        // gap 28 -> stored as 27 in one byte, count 1 -> nothing
        assert_eq!(&payload[9..11], &[0x80 | 5, 27]);
        // gap 1 -> nothing, count 999 -> two bytes
        assert_eq!(&payload[11..14], &[0x80 | 2, 0x03, 0xE7]);
        assert_eq!(FullyAggregatedCodec::unpack(&payload).unwrap(), entries);
    }

    proptest! {
        #[test]
        fn arbitrary_sorted_entries_roundtrip(map in btree_map(any::<u32>(), 1u32..u32::MAX, 1..300)) {
            let entries: Vec<_> = map.into_iter().map(|(v1, count)| e(v1, count)).collect();
            let mut rest = &entries[..];
            let mut decoded = Vec::new();
            while !rest.is_empty() {
                let (consumed, payload) = FullyAggregatedCodec::pack(rest, 40).unwrap();
                prop_assert!(consumed > 0);
                decoded.extend(FullyAggregatedCodec::unpack(&payload).unwrap());
                rest = &rest[consumed..];
            }
            prop_assert_eq!(decoded, entries);
        }
    }
}
