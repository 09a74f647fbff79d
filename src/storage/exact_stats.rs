#![forbid(unsafe_code)]
//! Exact join statistics.
//!
//! For every constant (and every constant pair) the segment stores how many
//! join partners a triple pattern binding that constant has when one of its
//! free positions is joined with the subject, predicate or object of an
//! unconstrained pattern. Lookups yield nine counts laid out as
//! `info[3 * a + b]` where `a` is the position in the constrained pattern
//! and `b` the position in the partner pattern.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::primitives::buffer::{BufferManager, Partition};
use crate::primitives::bytes::{buf::Cursor, var};
use crate::storage::aggregated::AggregatedFactsSegment;
use crate::storage::btree::{self, Key, LeafCodec, Tree, TreeInfo};
use crate::storage::facts::Triple;
use crate::storage::fully_aggregated::FullyAggregatedFactsSegment;
use crate::types::{Result, Slot, TristoreError};

/// Marker for a join slot that cannot occur.
pub const IMPOSSIBLE: u64 = u64::MAX;

/// Nine join counts, see the module docs for the layout.
pub type JoinInfo = [u64; 9];

/// Statistics record keyed by one or two constants.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatEntry<const V: usize> {
    /// First constant.
    pub v1: u32,
    /// Second constant, zero for single-constant trees.
    pub v2: u32,
    /// Partner counts.
    pub values: [u64; V],
}

/// Leaf format: varint columns compressed with snappy. `K` is the number of
/// key components, `V` the number of counts per entry.
pub struct StatCodec<const K: usize, const V: usize>;

impl<const K: usize, const V: usize> StatCodec<K, V> {
    fn encode(entries: &[StatEntry<V>]) -> Vec<u8> {
        let mut raw = Vec::new();
        var::encode_u64(entries.len() as u64, &mut raw);
        let mut last = 0u32;
        for (index, entry) in entries.iter().enumerate() {
            let v = if index == 0 { entry.v1 } else { entry.v1 - last };
            var::encode_u64(u64::from(v), &mut raw);
            last = entry.v1;
        }
        if K == 2 {
            let mut previous: Option<&StatEntry<V>> = None;
            for entry in entries {
                let v = match previous {
                    Some(p) if p.v1 == entry.v1 => u64::from(entry.v2 - p.v2) << 1,
                    _ => (u64::from(entry.v2) << 1) | 1,
                };
                var::encode_u64(v, &mut raw);
                previous = Some(entry);
            }
        }
        for column in 0..V {
            for entry in entries {
                var::encode_u64(entry.values[column], &mut raw);
            }
        }
        raw
    }

    fn compress(entries: &[StatEntry<V>]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(&Self::encode(entries))
            .map_err(|err| TristoreError::InvalidOwned(format!("statistics compression: {err}")))
    }
}

impl<const K: usize, const V: usize> LeafCodec for StatCodec<K, V> {
    type Entry = StatEntry<V>;

    fn key(entry: &StatEntry<V>) -> Key {
        btree::key(entry.v1, entry.v2, 0)
    }

    fn pack(entries: &[StatEntry<V>], capacity: usize) -> Result<(usize, Vec<u8>)> {
        // Binary search for the longest prefix whose compressed form fits.
        let (mut lo, mut hi) = (0usize, entries.len().min(capacity.saturating_mul(4)));
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if Self::compress(&entries[..mid])?.len() <= capacity {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        if lo == 0 {
            return Ok((0, Vec::new()));
        }
        Ok((lo, Self::compress(&entries[..lo])?))
    }

    fn unpack(payload: &[u8]) -> Result<Vec<StatEntry<V>>> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        let raw = snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|_| TristoreError::Corruption("statistics leaf does not decompress"))?;
        let mut cur = Cursor::new(&raw);
        let count = usize::try_from(cur.varint()?)
            .map_err(|_| TristoreError::Corruption("statistics entry count"))?;
        if count > raw.len() {
            return Err(TristoreError::Corruption("statistics entry count"));
        }
        let mut entries = vec![
            StatEntry {
                v1: 0,
                v2: 0,
                values: [0u64; V],
            };
            count
        ];
        let mut current = 0u32;
        for (index, entry) in entries.iter_mut().enumerate() {
            let v = cur.varint_u32()?;
            current = if index == 0 {
                v
            } else {
                current
                    .checked_add(v)
                    .ok_or(TristoreError::Corruption("statistics key overflows"))?
            };
            entry.v1 = current;
        }
        if K == 2 {
            let mut current = 0u32;
            for entry in entries.iter_mut() {
                let v = cur.varint()?;
                let value = u32::try_from(v >> 1)
                    .map_err(|_| TristoreError::Corruption("statistics key overflows"))?;
                current = if v & 1 == 1 {
                    value
                } else {
                    current
                        .checked_add(value)
                        .ok_or(TristoreError::Corruption("statistics key overflows"))?
                };
                entry.v2 = current;
            }
        }
        for column in 0..V {
            for entry in entries.iter_mut() {
                entry.values[column] = cur.varint()?;
            }
        }
        Ok(entries)
    }
}

type PairCodec = StatCodec<2, 3>;
type SingleCodec = StatCodec<1, 6>;

/// Trees and global counts produced by [`ExactStatisticsSegment::build`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExactStatisticsLayout {
    /// Trees in the order `c2ps, c2po, c2so, c1s, c1p, c1o`.
    pub trees: [TreeInfo; 6],
    /// Join counts with no constant bound.
    pub c0: JoinInfo,
    /// Total number of triples.
    pub total: u64,
}

/// Segments consulted to answer single-pattern cardinalities.
#[derive(Clone)]
pub struct CardinalitySources {
    /// Aggregated SPO.
    pub subject_predicate: Arc<AggregatedFactsSegment>,
    /// Aggregated SOP.
    pub subject_object: Arc<AggregatedFactsSegment>,
    /// Aggregated POS.
    pub predicate_object: Arc<AggregatedFactsSegment>,
    /// Fully aggregated by subject.
    pub subject: Arc<FullyAggregatedFactsSegment>,
    /// Fully aggregated by predicate.
    pub predicate: Arc<FullyAggregatedFactsSegment>,
    /// Fully aggregated by object.
    pub object: Arc<FullyAggregatedFactsSegment>,
}

/// Exact cardinality and join selectivity estimates.
pub struct ExactStatisticsSegment {
    c2ps: Tree,
    c2po: Tree,
    c2so: Tree,
    c1s: Tree,
    c1p: Tree,
    c1o: Tree,
    c0: JoinInfo,
    total: u64,
    sources: CardinalitySources,
}

fn occurrences(triples: &[Triple]) -> FxHashMap<u32, [u64; 3]> {
    let mut counts: FxHashMap<u32, [u64; 3]> = FxHashMap::default();
    for &(s, p, o) in triples {
        counts.entry(s).or_default()[0] += 1;
        counts.entry(p).or_default()[1] += 1;
        counts.entry(o).or_default()[2] += 1;
    }
    counts
}

fn partners(counts: &FxHashMap<u32, [u64; 3]>, id: u32) -> [u64; 3] {
    counts.get(&id).copied().unwrap_or_default()
}

fn accumulate(into: &mut [u64], from: [u64; 3]) {
    for (slot, value) in into.iter_mut().zip(from) {
        *slot += value;
    }
}

/// Groups `rows` (sorted by key) and sums the partner counts of `first` and `second`.
fn single_entries(
    rows: &[(u32, u32, u32)],
    counts: &FxHashMap<u32, [u64; 3]>,
) -> Vec<StatEntry<6>> {
    let mut out: Vec<StatEntry<6>> = Vec::new();
    for &(key, first, second) in rows {
        if out.last().map(|e| e.v1) != Some(key) {
            out.push(StatEntry {
                v1: key,
                v2: 0,
                values: [0; 6],
            });
        }
        if let Some(entry) = out.last_mut() {
            accumulate(&mut entry.values[..3], partners(counts, first));
            accumulate(&mut entry.values[3..], partners(counts, second));
        }
    }
    out
}

fn pair_entries(rows: &[(u32, u32, u32)], counts: &FxHashMap<u32, [u64; 3]>) -> Vec<StatEntry<3>> {
    let mut out: Vec<StatEntry<3>> = Vec::new();
    for &(k1, k2, partner) in rows {
        if out.last().map(|e| (e.v1, e.v2)) != Some((k1, k2)) {
            out.push(StatEntry {
                v1: k1,
                v2: k2,
                values: [0; 3],
            });
        }
        if let Some(entry) = out.last_mut() {
            accumulate(&mut entry.values, partners(counts, partner));
        }
    }
    out
}

fn sorted_by(triples: &[Triple], f: impl Fn(&Triple) -> (u32, u32, u32)) -> Vec<(u32, u32, u32)> {
    let mut rows: Vec<_> = triples.iter().map(f).collect();
    rows.sort_unstable();
    rows
}

impl ExactStatisticsSegment {
    /// Computes and writes the statistics of `triples` (subject, predicate, object).
    pub fn build(
        buffer: &BufferManager,
        partition: &Arc<dyn Partition>,
        triples: &[Triple],
    ) -> Result<ExactStatisticsLayout> {
        let counts = occurrences(triples);

        let mut c0 = [0u64; 9];
        for &(s, p, o) in triples {
            for (row, id) in [s, p, o].into_iter().enumerate() {
                accumulate(&mut c0[row * 3..row * 3 + 3], partners(&counts, id));
            }
        }

        let c2ps = pair_entries(&sorted_by(triples, |&(s, p, o)| (p, s, o)), &counts);
        let c2po = pair_entries(&sorted_by(triples, |&(s, p, o)| (p, o, s)), &counts);
        let c2so = pair_entries(&sorted_by(triples, |&(s, p, o)| (s, o, p)), &counts);
        let c1s = single_entries(&sorted_by(triples, |&(s, p, o)| (s, p, o)), &counts);
        let c1p = single_entries(&sorted_by(triples, |&(s, p, o)| (p, s, o)), &counts);
        let c1o = single_entries(&sorted_by(triples, |&(s, p, o)| (o, s, p)), &counts);

        let trees = [
            btree::bulk_load::<PairCodec>(buffer, partition, &c2ps)?,
            btree::bulk_load::<PairCodec>(buffer, partition, &c2po)?,
            btree::bulk_load::<PairCodec>(buffer, partition, &c2so)?,
            btree::bulk_load::<SingleCodec>(buffer, partition, &c1s)?,
            btree::bulk_load::<SingleCodec>(buffer, partition, &c1p)?,
            btree::bulk_load::<SingleCodec>(buffer, partition, &c1o)?,
        ];
        debug!(
            ids = counts.len(),
            pairs = c2ps.len() + c2po.len() + c2so.len(),
            "exact_stats.build"
        );
        Ok(ExactStatisticsLayout {
            trees,
            c0,
            total: triples.len() as u64,
        })
    }

    /// Opens the segment from its layout.
    pub fn open(
        buffer: Arc<BufferManager>,
        partition: Arc<dyn Partition>,
        layout: &ExactStatisticsLayout,
        sources: CardinalitySources,
    ) -> Self {
        let tree = |index: usize| {
            Tree::open(buffer.clone(), partition.clone(), layout.trees[index].root)
        };
        Self {
            c2ps: tree(0),
            c2po: tree(1),
            c2so: tree(2),
            c1s: tree(3),
            c1p: tree(4),
            c1o: tree(5),
            c0: layout.c0,
            total: layout.total,
            sources,
        }
    }

    /// Total number of triples.
    pub fn total_cardinality(&self) -> u64 {
        self.total
    }

    /// Estimated size of the pattern `(s, p, o)` where `None` is a wildcard.
    pub fn get_cardinality(&self, s: Option<u32>, p: Option<u32>, o: Option<u32>) -> Result<u64> {
        let found = match (s, p, o) {
            (Some(_), Some(_), Some(_)) => return Ok(1),
            (Some(s), Some(p), None) => self.sources.subject_predicate.lookup(s, p)?,
            (Some(s), None, Some(o)) => self.sources.subject_object.lookup(s, o)?,
            (None, Some(p), Some(o)) => self.sources.predicate_object.lookup(p, o)?,
            (Some(s), None, None) => self.sources.subject.lookup(s)?,
            (None, Some(p), None) => self.sources.predicate.lookup(p)?,
            (None, None, Some(o)) => self.sources.object.lookup(o)?,
            (None, None, None) => return Ok(self.total),
        };
        Ok(found.map_or(1, u64::from))
    }

    fn lookup_pair(tree: &Tree, v1: u32, v2: u32) -> Result<Option<[u64; 3]>> {
        let mut scan = tree.scan_from::<PairCodec>(&btree::key(v1, v2, 0))?;
        match scan.next().transpose()? {
            Some(entry) if entry.v1 == v1 && entry.v2 == v2 => Ok(Some(entry.values)),
            _ => Ok(None),
        }
    }

    fn lookup_single(tree: &Tree, v1: u32) -> Result<Option<[u64; 6]>> {
        let mut scan = tree.scan_from::<SingleCodec>(&btree::key(v1, 0, 0))?;
        match scan.next().transpose()? {
            Some(entry) if entry.v1 == v1 => Ok(Some(entry.values)),
            _ => Ok(None),
        }
    }

    /// Join counts for the pattern `(s, p, o)`, or `None` when the pattern
    /// is fully bound or its constants are unknown.
    pub fn get_join_info(
        &self,
        s: Option<u32>,
        p: Option<u32>,
        o: Option<u32>,
    ) -> Result<Option<JoinInfo>> {
        let mut info = [IMPOSSIBLE; 9];
        let mut place = |row: usize, values: &[u64]| {
            info[row * 3..row * 3 + 3].copy_from_slice(values);
        };
        match (s, p, o) {
            (Some(_), Some(_), Some(_)) => return Ok(None),
            (Some(s), Some(p), None) => match Self::lookup_pair(&self.c2ps, p, s)? {
                Some(values) => place(2, &values),
                None => return Ok(None),
            },
            (Some(s), None, Some(o)) => match Self::lookup_pair(&self.c2so, s, o)? {
                Some(values) => place(1, &values),
                None => return Ok(None),
            },
            (None, Some(p), Some(o)) => match Self::lookup_pair(&self.c2po, p, o)? {
                Some(values) => place(0, &values),
                None => return Ok(None),
            },
            (Some(s), None, None) => match Self::lookup_single(&self.c1s, s)? {
                Some(values) => {
                    place(1, &values[..3]);
                    place(2, &values[3..]);
                }
                None => return Ok(None),
            },
            (None, Some(p), None) => match Self::lookup_single(&self.c1p, p)? {
                Some(values) => {
                    place(0, &values[..3]);
                    place(2, &values[3..]);
                }
                None => return Ok(None),
            },
            (None, None, Some(o)) => match Self::lookup_single(&self.c1o, o)? {
                Some(values) => {
                    place(0, &values[..3]);
                    place(1, &values[3..]);
                }
                None => return Ok(None),
            },
            (None, None, None) => return Ok(Some(self.c0)),
        }
        Ok(Some(info))
    }

    /// Fraction of the cross product of two patterns expected to survive
    /// their join on shared variables.
    pub fn get_join_selectivity(&self, left: [Slot; 3], right: [Slot; 3]) -> Result<f64> {
        let constants = |pattern: [Slot; 3]| {
            (
                pattern[0].constant(),
                pattern[1].constant(),
                pattern[2].constant(),
            )
        };
        let cardinality = |pattern: [Slot; 3]| {
            let (s, p, o) = constants(pattern);
            self.get_cardinality(s, p, o).map(|c| c as f64)
        };

        let (mut first, mut second) = (left, right);
        let (mut card1, mut card2) = (cardinality(left)?, cardinality(right)?);
        if card2 < card1 {
            std::mem::swap(&mut first, &mut second);
            std::mem::swap(&mut card1, &mut card2);
        }

        let (s, p, o) = constants(first);
        let info = match self.get_join_info(s, p, o)? {
            Some(info) => info,
            None => {
                let (s, p, o) = constants(second);
                match self.get_join_info(s, p, o)? {
                    Some(info) => {
                        // Index the counts from the side they describe.
                        std::mem::swap(&mut first, &mut second);
                        std::mem::swap(&mut card1, &mut card2);
                        info
                    }
                    None => return Ok(1.0),
                }
            }
        };

        let cross = card1 * self.total as f64;
        if cross <= 0.0 {
            return Ok(1.0);
        }
        let mut result = cross;
        for a in 0..3 {
            for b in 0..3 {
                let (Some(x), Some(y)) = (first[a].var(), second[b].var()) else {
                    continue;
                };
                if x != y {
                    continue;
                }
                result = result.min(info[a * 3 + b] as f64);
                let others_bound = |pattern: [Slot; 3], skip: usize| {
                    (0..3).filter(|&i| i != skip).all(|i| pattern[i].is_const())
                };
                if others_bound(first, a) {
                    result = result.min(card2);
                }
                if others_bound(second, b) {
                    result = result.min(card1);
                }
            }
        }
        Ok(result / cross)
    }
}
