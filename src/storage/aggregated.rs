#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::primitives::buffer::{BufferManager, Partition};
use crate::primitives::bytes::{buf::Cursor, pack};
use crate::storage::btree::{self, Key, LeafCodec, Scan, Tree, TreeInfo};
use crate::storage::facts::Triple;
use crate::storage::SegmentStats;
use crate::types::{Result, TristoreError};

/// Number of triples sharing the prefix `(v1, v2)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AggregatedEntry {
    /// Leading component.
    pub v1: u32,
    /// Second component.
    pub v2: u32,
    /// Triples with this prefix.
    pub count: u32,
}

/// Leaf format of [`AggregatedFactsSegment`].
///
/// The first entry is stored raw (12 bytes). Each following entry starts
/// with an opcode byte: below `0x80` it is `(count - 1) << 5 | gap` for an
/// entry with the same `v1`, a `v2` gap below 32 and a count below 5.
/// Otherwise the low seven bits are `b1 * 25 + b2 * 5 + b3`, the byte widths
/// of the `v1` delta, the absolute `v2` and `count - 1`, which follow
/// big-endian with zero suppression. A zero opcode ends the leaf.
pub struct AggregatedCodec;

fn small_form(last: &AggregatedEntry, entry: &AggregatedEntry) -> bool {
    entry.v1 == last.v1 && entry.count < 5 && entry.v2 - last.v2 < 32
}

impl LeafCodec for AggregatedCodec {
    type Entry = AggregatedEntry;

    fn key(entry: &AggregatedEntry) -> Key {
        btree::key(entry.v1, entry.v2, 0)
    }

    fn pack(entries: &[AggregatedEntry], capacity: usize) -> Result<(usize, Vec<u8>)> {
        let mut out = Vec::new();
        let Some(first) = entries.first() else {
            return Ok((0, out));
        };
        if capacity < 12 {
            return Ok((0, out));
        }
        out.extend_from_slice(&first.v1.to_be_bytes());
        out.extend_from_slice(&first.v2.to_be_bytes());
        out.extend_from_slice(&first.count.to_be_bytes());
        let mut last = *first;
        for (index, entry) in entries.iter().enumerate().skip(1) {
            if (entry.v1, entry.v2) == (last.v1, last.v2) {
                continue;
            }
            if (entry.v1, entry.v2) < (last.v1, last.v2) || entry.count == 0 {
                return Err(TristoreError::Invalid(
                    "aggregated entries must be sorted with positive counts",
                ));
            }
            if small_form(&last, entry) {
                if out.len() + 1 > capacity {
                    return Ok((index, out));
                }
                out.push((((entry.count - 1) << 5) | (entry.v2 - last.v2)) as u8);
            } else {
                let delta = entry.v1 - last.v1;
                let (b1, b2, b3) = (
                    pack::bytes0(delta),
                    pack::bytes0(entry.v2),
                    pack::bytes0(entry.count - 1),
                );
                if out.len() + 1 + b1 + b2 + b3 > capacity {
                    return Ok((index, out));
                }
                out.push(0x80 | (b1 * 25 + b2 * 5 + b3) as u8);
                pack::write_delta0(&mut out, delta);
                pack::write_delta0(&mut out, entry.v2);
                pack::write_delta0(&mut out, entry.count - 1);
            }
            last = *entry;
        }
        Ok((entries.len(), out))
    }

    fn unpack(payload: &[u8]) -> Result<Vec<AggregatedEntry>> {
        let mut entries = Vec::new();
        if payload.is_empty() {
            return Ok(entries);
        }
        let mut cur = Cursor::new(payload);
        let mut entry = AggregatedEntry {
            v1: cur.u32_be()?,
            v2: cur.u32_be()?,
            count: cur.u32_be()?,
        };
        entries.push(entry);
        let body = &payload[12..];
        let mut off = 0;
        while off < body.len() {
            let info = body[off];
            off += 1;
            if info < 0x80 {
                if info == 0 {
                    break;
                }
                entry.count = u32::from(info >> 5) + 1;
                entry.v2 = entry
                    .v2
                    .checked_add(u32::from(info & 31))
                    .ok_or(TristoreError::Corruption("aggregated gap overflows"))?;
            } else {
                let code = usize::from(info & 0x7F);
                if code >= 125 {
                    return Err(TristoreError::Corruption("aggregated opcode out of range"));
                }
                let delta = pack::read_delta(body, &mut off, code / 25)?;
                entry.v1 = entry
                    .v1
                    .checked_add(delta)
                    .ok_or(TristoreError::Corruption("aggregated delta overflows"))?;
                entry.v2 = pack::read_delta(body, &mut off, (code / 5) % 5)?;
                entry.count = pack::read_delta(body, &mut off, code % 5)?
                    .checked_add(1)
                    .ok_or(TristoreError::Corruption("aggregated count overflows"))?;
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Groups sorted triples by their first two components.
pub fn aggregate(triples: &[Triple]) -> Vec<AggregatedEntry> {
    let mut out: Vec<AggregatedEntry> = Vec::new();
    for &(v1, v2, _) in triples {
        match out.last_mut() {
            Some(last) if last.v1 == v1 && last.v2 == v2 => last.count += 1,
            _ => out.push(AggregatedEntry { v1, v2, count: 1 }),
        }
    }
    out
}

/// `(v1, v2, count)` table of one [`DataOrder`](crate::storage::DataOrder).
pub struct AggregatedFactsSegment {
    tree: Tree,
    stats: SegmentStats,
}

impl AggregatedFactsSegment {
    /// Writes the aggregation of `triples` as a new tree.
    pub fn build(
        buffer: &BufferManager,
        partition: &Arc<dyn Partition>,
        triples: &[Triple],
    ) -> Result<(TreeInfo, SegmentStats)> {
        let entries = aggregate(triples);
        let info = btree::bulk_load::<AggregatedCodec>(buffer, partition, &entries)?;
        let mut level1_groups = 0;
        let mut previous = None;
        for entry in &entries {
            if previous != Some(entry.v1) {
                level1_groups += 1;
                previous = Some(entry.v1);
            }
        }
        let stats = SegmentStats {
            pages: info.pages,
            level1_groups,
            level2_groups: entries.len() as u64,
            cardinality: triples.len() as u64,
        };
        Ok((info, stats))
    }

    /// Opens a segment built earlier.
    pub fn open(tree: Tree, stats: SegmentStats) -> Self {
        Self { tree, stats }
    }

    /// Iterates over every entry.
    pub fn scan(&self) -> Result<Scan<AggregatedCodec>> {
        self.tree.scan::<AggregatedCodec>()
    }

    /// Iterates from the first entry `>= (v1, v2)`.
    pub fn scan_from(&self, v1: u32, v2: u32) -> Result<Scan<AggregatedCodec>> {
        self.tree.scan_from::<AggregatedCodec>(&btree::key(v1, v2, 0))
    }

    /// Count of triples with prefix `(v1, v2)`.
    pub fn lookup(&self, v1: u32, v2: u32) -> Result<Option<u32>> {
        match self.scan_from(v1, v2)?.next().transpose()? {
            Some(entry) if entry.v1 == v1 && entry.v2 == v2 => Ok(Some(entry.count)),
            _ => Ok(None),
        }
    }

    /// Pages used by the tree.
    pub fn pages(&self) -> u64 {
        self.stats.pages
    }

    /// Distinct leading values.
    pub fn level1_groups(&self) -> u64 {
        self.stats.level1_groups
    }

    /// Number of entries.
    pub fn level2_groups(&self) -> u64 {
        self.stats.level2_groups
    }

    /// All statistics at once.
    pub fn stats(&self) -> SegmentStats {
        self.stats
    }
}
