use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Result, TristoreError};

/// One of the six physical permutations of a triple.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataOrder {
    /// Subject, predicate, object.
    Spo = 0,
    /// Subject, object, predicate.
    Sop = 1,
    /// Object, predicate, subject.
    Ops = 2,
    /// Object, subject, predicate.
    Osp = 3,
    /// Predicate, subject, object.
    Pso = 4,
    /// Predicate, object, subject.
    Pos = 5,
}

impl DataOrder {
    /// Every order in tag sequence.
    pub const ALL: [DataOrder; 6] = [
        DataOrder::Spo,
        DataOrder::Sop,
        DataOrder::Ops,
        DataOrder::Osp,
        DataOrder::Pso,
        DataOrder::Pos,
    ];

    /// Numeric tag used in the catalog.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`DataOrder::index`].
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or(TristoreError::Corruption("unknown data order"))
    }

    /// Order whose fully aggregated segment is keyed by the same leading
    /// component. Orders sharing `index / 2` share that segment.
    pub const fn leading(self) -> DataOrder {
        match self {
            DataOrder::Spo | DataOrder::Sop => DataOrder::Spo,
            DataOrder::Ops | DataOrder::Osp => DataOrder::Ops,
            DataOrder::Pso | DataOrder::Pos => DataOrder::Pso,
        }
    }

    /// Permutes `(subject, predicate, object)` into this order.
    pub fn permute<T>(self, s: T, p: T, o: T) -> (T, T, T) {
        match self {
            DataOrder::Spo => (s, p, o),
            DataOrder::Sop => (s, o, p),
            DataOrder::Ops => (o, p, s),
            DataOrder::Osp => (o, s, p),
            DataOrder::Pso => (p, s, o),
            DataOrder::Pos => (p, o, s),
        }
    }

    /// Restores `(subject, predicate, object)` from values in this order.
    pub fn unpermute<T>(self, v1: T, v2: T, v3: T) -> (T, T, T) {
        match self {
            DataOrder::Spo => (v1, v2, v3),
            DataOrder::Sop => (v1, v3, v2),
            DataOrder::Ops => (v3, v2, v1),
            DataOrder::Osp => (v2, v3, v1),
            DataOrder::Pso => (v2, v1, v3),
            DataOrder::Pos => (v3, v1, v2),
        }
    }

    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            DataOrder::Spo => "spo",
            DataOrder::Sop => "sop",
            DataOrder::Ops => "ops",
            DataOrder::Osp => "osp",
            DataOrder::Pso => "pso",
            DataOrder::Pos => "pos",
        }
    }
}

impl fmt::Display for DataOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
