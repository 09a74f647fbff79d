#![forbid(unsafe_code)]
//! Relation sets used as dynamic programming keys.

use std::fmt;

/// Set of relation indices below [`BitSet::MAX_WIDTH`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitSet(u64);

impl BitSet {
    /// Number of representable relations.
    pub const MAX_WIDTH: usize = 64;

    /// Empty set.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Set holding only `index`.
    pub fn single(index: usize) -> Self {
        let mut set = Self::new();
        set.set(index);
        set
    }

    /// Adds `index`. Indices at or above [`Self::MAX_WIDTH`] are ignored.
    pub fn set(&mut self, index: usize) {
        if index < Self::MAX_WIDTH {
            self.0 |= 1 << index;
        }
    }

    /// Whether `index` is a member.
    pub fn contains(self, index: usize) -> bool {
        index < Self::MAX_WIDTH && self.0 & (1 << index) != 0
    }

    /// Whether the two sets share a member.
    pub fn overlaps_with(self, other: BitSet) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether every member of `self` is in `other`.
    pub fn subset_of(self, other: BitSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Union of both sets.
    pub fn union_with(self, other: BitSet) -> BitSet {
        BitSet(self.0 | other.0)
    }

    /// Number of members.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..Self::MAX_WIDTH).filter(move |&i| self.contains(i))
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = BitSet::new();
        for index in iter {
            set.set(index);
        }
        set
    }
}
