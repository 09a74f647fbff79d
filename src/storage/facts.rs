#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::primitives::buffer::{BufferManager, Partition};
use crate::primitives::bytes::{buf::Cursor, var};
use crate::storage::btree::{self, Key, LeafCodec, Scan, Tree, TreeInfo};
use crate::storage::SegmentStats;
use crate::types::{Result, TristoreError};

/// A triple in the component order of its segment.
pub type Triple = (u32, u32, u32);

const SAME_V1_V2: u8 = 1;
const SAME_V1: u8 = 2;
const NEW_V1: u8 = 3;

/// Leaf format of [`FactsSegment`]: the first triple raw, then one tag byte
/// per triple followed by LEB128 deltas against its predecessor.
pub struct FactsCodec;

fn encode_delta(last: Triple, next: Triple, out: &mut Vec<u8>) {
    if next.0 == last.0 {
        if next.1 == last.1 {
            out.push(SAME_V1_V2);
            var::encode_u64(u64::from(next.2 - last.2 - 1), out);
        } else {
            out.push(SAME_V1);
            var::encode_u64(u64::from(next.1 - last.1 - 1), out);
            var::encode_u64(u64::from(next.2), out);
        }
    } else {
        out.push(NEW_V1);
        var::encode_u64(u64::from(next.0 - last.0 - 1), out);
        var::encode_u64(u64::from(next.1), out);
        var::encode_u64(u64::from(next.2), out);
    }
}

fn add(base: u32, delta: u32) -> Result<u32> {
    base.checked_add(delta)
        .and_then(|v| v.checked_add(1))
        .ok_or(TristoreError::Corruption("facts delta overflows"))
}

impl LeafCodec for FactsCodec {
    type Entry = Triple;

    fn key(entry: &Triple) -> Key {
        btree::key(entry.0, entry.1, entry.2)
    }

    fn pack(entries: &[Triple], capacity: usize) -> Result<(usize, Vec<u8>)> {
        let mut out = Vec::new();
        let Some(&first) = entries.first() else {
            return Ok((0, out));
        };
        if capacity < 12 {
            return Ok((0, out));
        }
        out.extend_from_slice(&btree::key(first.0, first.1, first.2));
        let mut last = first;
        let mut scratch = Vec::with_capacity(16);
        for (index, &entry) in entries.iter().enumerate().skip(1) {
            if entry == last {
                continue;
            }
            if entry < last {
                return Err(TristoreError::Invalid("facts must be sorted"));
            }
            scratch.clear();
            encode_delta(last, entry, &mut scratch);
            if out.len() + scratch.len() > capacity {
                return Ok((index, out));
            }
            out.extend_from_slice(&scratch);
            last = entry;
        }
        Ok((entries.len(), out))
    }

    fn unpack(payload: &[u8]) -> Result<Vec<Triple>> {
        let mut entries = Vec::new();
        if payload.is_empty() {
            return Ok(entries);
        }
        let mut cur = Cursor::new(payload);
        let mut last = (cur.u32_be()?, cur.u32_be()?, cur.u32_be()?);
        entries.push(last);
        while cur.remaining() > 0 {
            last = match cur.u8()? {
                SAME_V1_V2 => (last.0, last.1, add(last.2, cur.varint_u32()?)?),
                SAME_V1 => (last.0, add(last.1, cur.varint_u32()?)?, cur.varint_u32()?),
                NEW_V1 => (
                    add(last.0, cur.varint_u32()?)?,
                    cur.varint_u32()?,
                    cur.varint_u32()?,
                ),
                _ => return Err(TristoreError::Corruption("unknown facts leaf tag")),
            };
            entries.push(last);
        }
        Ok(entries)
    }
}

/// Sorted distinct triples of one [`DataOrder`](crate::storage::DataOrder).
pub struct FactsSegment {
    tree: Tree,
    stats: SegmentStats,
}

impl FactsSegment {
    /// Writes `triples` (sorted, in segment component order) as a new tree.
    pub fn build(
        buffer: &BufferManager,
        partition: &Arc<dyn Partition>,
        triples: &[Triple],
    ) -> Result<(TreeInfo, SegmentStats)> {
        let info = btree::bulk_load::<FactsCodec>(buffer, partition, triples)?;
        let mut stats = SegmentStats {
            pages: info.pages,
            cardinality: triples.len() as u64,
            ..SegmentStats::default()
        };
        let mut previous: Option<Triple> = None;
        for &triple in triples {
            match previous {
                Some(p) if p.0 == triple.0 && p.1 == triple.1 => {}
                Some(p) if p.0 == triple.0 => stats.level2_groups += 1,
                _ => {
                    stats.level1_groups += 1;
                    stats.level2_groups += 1;
                }
            }
            previous = Some(triple);
        }
        Ok((info, stats))
    }

    /// Opens a segment built earlier.
    pub fn open(tree: Tree, stats: SegmentStats) -> Self {
        Self { tree, stats }
    }

    /// Iterates over every triple.
    pub fn scan(&self) -> Result<Scan<FactsCodec>> {
        self.tree.scan::<FactsCodec>()
    }

    /// Iterates from the first triple `>= (v1, v2, v3)`.
    pub fn scan_from(&self, v1: u32, v2: u32, v3: u32) -> Result<Scan<FactsCodec>> {
        self.tree.scan_from::<FactsCodec>(&btree::key(v1, v2, v3))
    }

    /// Pages used by the tree.
    pub fn pages(&self) -> u64 {
        self.stats.pages
    }

    /// Distinct leading values.
    pub fn level1_groups(&self) -> u64 {
        self.stats.level1_groups
    }

    /// Distinct `(v1, v2)` prefixes.
    pub fn level2_groups(&self) -> u64 {
        self.stats.level2_groups
    }

    /// Number of triples.
    pub fn cardinality(&self) -> u64 {
        self.stats.cardinality
    }

    /// All statistics at once.
    pub fn stats(&self) -> SegmentStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::btree_set;
    use proptest::prelude::*;

    fn pack_all(entries: &[Triple], capacity: usize) -> Vec<Vec<u8>> {
        let mut leaves = Vec::new();
        let mut rest = entries;
        while !rest.is_empty() {
            let (consumed, payload) = FactsCodec::pack(rest, capacity).unwrap();
            assert!(consumed > 0);
            assert!(payload.len() <= capacity);
            leaves.push(payload);
            rest = &rest[consumed..];
        }
        leaves
    }

    #[test]
    fn deltas_pick_the_shortest_tag() {
        let entries = [(1, 1, 1), (1, 1, 2), (1, 3, 0), (9, 0, 0)];
        let (consumed, payload) = FactsCodec::pack(&entries, 1024).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(
            &payload[12..],
            &[SAME_V1_V2, 0, SAME_V1, 1, 0, NEW_V1, 7, 0, 0]
        );
        assert_eq!(FactsCodec::unpack(&payload).unwrap(), entries);
    }

    #[test]
    fn duplicates_are_dropped() {
        let (consumed, payload) = FactsCodec::pack(&[(1, 2, 3), (1, 2, 3)], 64).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(FactsCodec::unpack(&payload).unwrap(), vec![(1, 2, 3)]);
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let mut payload = btree::key(1, 1, 1).to_vec();
        payload.push(0);
        assert!(FactsCodec::unpack(&payload).is_err());
    }

    proptest! {
        #[test]
        fn sorted_triples_survive_leaf_splits(set in btree_set((0u32..50, 0u32..50, any::<u32>()), 1..400)) {
            let entries: Vec<Triple> = set.into_iter().collect();
            let leaves = pack_all(&entries, 96);
            let decoded: Vec<Triple> = leaves
                .iter()
                .flat_map(|leaf| FactsCodec::unpack(leaf).unwrap())
                .collect();
            prop_assert_eq!(decoded, entries);
        }
    }
}
