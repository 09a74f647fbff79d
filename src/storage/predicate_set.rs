#![forbid(unsafe_code)]
//! Characteristic predicate sets for star-join estimates.
//!
//! Subjects are grouped by the exact set of predicates they carry. When
//! there are more distinct sets than the configured maximum, the rare ones
//! are folded into their largest retained subsets.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::primitives::buffer::{BufferManager, Partition};
use crate::primitives::bytes::{buf::Cursor, var};
use crate::storage::aggregated::AggregatedEntry;
use crate::storage::blob;
use crate::types::page::PageKind;
use crate::types::{PageId, Result, TristoreError};

const BITS_PER_MASK: u64 = 64;

/// Limits for predicate set computation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredicateSetOptions {
    /// Maximum number of retained sets.
    pub max_sets: usize,
}

impl Default for PredicateSetOptions {
    fn default() -> Self {
        Self { max_sets: 10_000 }
    }
}

/// Subjects sharing one combination of predicates.
#[derive(Clone, Debug, PartialEq)]
pub struct PredicateSet {
    /// Distinct subjects with this combination.
    pub subjects: u64,
    /// `(predicate, occurrences)` sorted by predicate.
    pub predicates: Vec<(u32, u64)>,
    mask1: u64,
    mask2: u64,
}

impl PredicateSet {
    fn subset_of(&self, other: &PredicateSet) -> bool {
        if self.predicates.len() > other.predicates.len() {
            return false;
        }
        let mut rest = &other.predicates[..];
        for (predicate, _) in &self.predicates {
            match rest.binary_search_by_key(predicate, |(p, _)| *p) {
                Ok(pos) => rest = &rest[pos + 1..],
                Err(_) => return false,
            }
        }
        true
    }

    /// Moves the occurrences of `self`'s predicates found in `source` here.
    fn absorb(&mut self, source: &mut PredicateSet) {
        self.subjects += source.subjects;
        for (predicate, count) in self.predicates.iter_mut() {
            if let Some(pos) = source.predicates.iter().position(|(p, _)| p == predicate) {
                *count += source.predicates[pos].1;
                source.predicates.remove(pos);
            }
        }
    }

    fn count_of(&self, predicate: u32) -> Option<u64> {
        self.predicates
            .binary_search_by_key(&predicate, |(p, _)| *p)
            .ok()
            .map(|pos| self.predicates[pos].1)
    }
}

fn masks(predicates: impl Iterator<Item = u32>, max_predicate: u32) -> (u64, u64) {
    let max = u64::from(max_predicate.max(1));
    predicates.fold((0u64, 0u64), |(m1, m2), p| {
        let p = u64::from(p);
        let slot = (p * BITS_PER_MASK / max).min(BITS_PER_MASK - 1);
        (m1 | 1 << (p % BITS_PER_MASK), m2 | 1 << slot)
    })
}

/// Size figures reported by [`PredicateSetSegment::get_statistics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PredicateSetStatistics {
    /// Retained sets.
    pub count: u64,
    /// Predicate entries across all sets.
    pub entries: u64,
    /// Encoded size in values.
    pub size: u64,
}

/// Retained predicate sets with their filter masks.
#[derive(Debug, Default)]
pub struct PredicateSetSegment {
    sets: Vec<PredicateSet>,
    max_predicate: u32,
}

impl PredicateSetSegment {
    /// Computes predicate sets from the subject/predicate aggregation.
    pub fn compute(
        subject_predicate: impl IntoIterator<Item = Result<AggregatedEntry>>,
        options: &PredicateSetOptions,
    ) -> Result<Self> {
        let mut grouped: FxHashMap<Vec<u32>, (u64, Vec<u64>)> = FxHashMap::default();
        let mut current: Option<u32> = None;
        let mut predicates: Vec<u32> = Vec::new();
        let mut counts: Vec<u64> = Vec::new();
        let mut flush = |predicates: &mut Vec<u32>, counts: &mut Vec<u64>| {
            if predicates.is_empty() {
                return;
            }
            let slot = grouped
                .entry(std::mem::take(predicates))
                .or_insert_with(|| (0, vec![0; counts.len()]));
            slot.0 += 1;
            for (total, count) in slot.1.iter_mut().zip(counts.drain(..)) {
                *total += count;
            }
        };
        for entry in subject_predicate {
            let entry = entry?;
            if current != Some(entry.v1) {
                flush(&mut predicates, &mut counts);
                current = Some(entry.v1);
            }
            predicates.push(entry.v2);
            counts.push(u64::from(entry.count));
        }
        flush(&mut predicates, &mut counts);

        let mut sets: Vec<PredicateSet> = grouped
            .into_iter()
            .map(|(predicates, (subjects, counts))| PredicateSet {
                subjects,
                predicates: predicates.into_iter().zip(counts).collect(),
                mask1: 0,
                mask2: 0,
            })
            .collect();
        sets.sort_by(|a, b| {
            a.predicates
                .len()
                .cmp(&b.predicates.len())
                .then_with(|| a.predicates.iter().map(|e| e.0).cmp(b.predicates.iter().map(|e| e.0)))
        });
        let found = sets.len();

        if sets.len() > options.max_sets {
            sets.sort_by(|a, b| b.subjects.cmp(&a.subjects));
            let rare = sets.split_off(options.max_sets);
            for mut remaining in rare {
                while !remaining.predicates.is_empty() {
                    let mut best: Option<usize> = None;
                    for (index, candidate) in sets.iter().enumerate() {
                        let larger = best
                            .map_or(true, |b| candidate.predicates.len() > sets[b].predicates.len());
                        if candidate.predicates.len() < remaining.predicates.len()
                            && larger
                            && candidate.subset_of(&remaining)
                        {
                            best = Some(index);
                        }
                    }
                    let Some(best) = best else {
                        break;
                    };
                    sets[best].absorb(&mut remaining);
                }
            }
        }

        let mut segment = Self {
            sets,
            max_predicate: 0,
        };
        segment.compute_masks();
        info!(found, retained = segment.sets.len(), "predicate_sets.computed");
        Ok(segment)
    }

    fn compute_masks(&mut self) {
        self.max_predicate = self
            .sets
            .iter()
            .filter_map(|set| set.predicates.last().map(|(p, _)| *p))
            .max()
            .unwrap_or(0);
        let max = self.max_predicate;
        for set in &mut self.sets {
            let (mask1, mask2) = masks(set.predicates.iter().map(|(p, _)| *p), max);
            set.mask1 = mask1;
            set.mask2 = mask2;
        }
    }

    /// Retained sets.
    pub fn sets(&self) -> &[PredicateSet] {
        &self.sets
    }

    /// Estimates a star join of `predicates` around one subject variable.
    /// Returns the number of distinct subjects and the result cardinality.
    pub fn get_star_cardinality(&self, predicates: &[u32]) -> (u64, f64) {
        let mut multiplicity: BTreeMap<u32, u32> = BTreeMap::new();
        for &p in predicates {
            *multiplicity.entry(p).or_default() += 1;
        }
        let (mask1, mask2) = masks(predicates.iter().copied(), self.max_predicate);

        let mut distinct = 0u64;
        let mut cardinality = 0f64;
        for set in &self.sets {
            if set.mask1 & mask1 != mask1 || set.mask2 & mask2 != mask2 {
                continue;
            }
            let subjects = set.subjects as f64;
            let mut triples = subjects;
            let matches = multiplicity.iter().all(|(&p, &times)| match set.count_of(p) {
                Some(count) => {
                    triples *= (count as f64 / subjects).powi(times as i32);
                    true
                }
                None => false,
            });
            if matches {
                distinct += set.subjects;
                cardinality += triples;
            }
        }

        if distinct == 0 {
            distinct = self.sets.iter().map(|s| s.subjects).min().unwrap_or(0);
            cardinality = distinct as f64;
        }
        (distinct, cardinality)
    }

    /// Number of sets, predicate entries and encoded size.
    pub fn get_statistics(&self) -> PredicateSetStatistics {
        let count = self.sets.len() as u64;
        let entries = self.sets.iter().map(|s| s.predicates.len() as u64).sum();
        PredicateSetStatistics {
            count,
            entries,
            size: 1 + count + 2 * entries,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        var::encode_u64(self.sets.len() as u64, &mut raw);
        for set in &self.sets {
            var::encode_u64(set.subjects, &mut raw);
            var::encode_u64(set.predicates.len() as u64, &mut raw);
            for (predicate, count) in &set.predicates {
                var::encode_u64(u64::from(*predicate), &mut raw);
                var::encode_u64(*count, &mut raw);
            }
        }
        raw
    }

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(raw);
        let count = cur.varint()?;
        let mut sets = Vec::new();
        for _ in 0..count {
            let subjects = cur.varint()?;
            let len = cur.varint()?;
            if len > cur.remaining() as u64 {
                return Err(TristoreError::Corruption("predicate set length"));
            }
            let mut predicates = Vec::with_capacity(len as usize);
            for _ in 0..len {
                predicates.push((cur.varint_u32()?, cur.varint()?));
            }
            sets.push(PredicateSet {
                subjects,
                predicates,
                mask1: 0,
                mask2: 0,
            });
        }
        let mut segment = Self {
            sets,
            max_predicate: 0,
        };
        segment.compute_masks();
        Ok(segment)
    }

    /// Persists the sets as a compressed blob and returns its first page.
    pub fn store(&self, buffer: &BufferManager, partition: &Arc<dyn Partition>) -> Result<(PageId, u64)> {
        let compressed = snap::raw::Encoder::new()
            .compress_vec(&self.encode())
            .map_err(|err| TristoreError::InvalidOwned(format!("predicate set compression: {err}")))?;
        let (first, pages) = blob::write_chain(buffer, partition, None, PageKind::Blob, &compressed)?;
        debug!(first = first.0, pages, "predicate_sets.store");
        Ok((first, pages))
    }

    /// Loads sets written by [`PredicateSetSegment::store`].
    pub fn load(buffer: &BufferManager, partition: &Arc<dyn Partition>, first: PageId) -> Result<Self> {
        let compressed = blob::read_chain(buffer, partition, first, PageKind::Blob)?;
        let raw = snap::raw::Decoder::new()
            .decompress_vec(&compressed)
            .map_err(|_| TristoreError::Corruption("predicate sets do not decompress"))?;
        Self::decode(&raw)
    }
}
