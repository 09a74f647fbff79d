#![forbid(unsafe_code)]
//! Optimistic locks over triple ranges.
//!
//! A lock covers an axis-aligned box in (subject, predicate, object) id
//! space. Acquisition never waits: a conflicting request simply fails and
//! the caller retries. Locks of a finished transaction stay visible until
//! every older transaction has finished too.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Transaction identifier; smaller ids are older.
pub type TransactionId = u32;

/// Region of the id space covered by one lock, bounds inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockBox {
    /// Lower bounds for subject, predicate and object.
    pub min: [u32; 3],
    /// Upper bounds for subject, predicate and object.
    pub max: [u32; 3],
}

impl LockBox {
    /// Box spanning the given ranges.
    pub fn new(subject: RangeInclusive<u32>, predicate: RangeInclusive<u32>, object: RangeInclusive<u32>) -> Self {
        Self {
            min: [*subject.start(), *predicate.start(), *object.start()],
            max: [*subject.end(), *predicate.end(), *object.end()],
        }
    }

    /// Box around a single triple.
    pub fn triple(subject: u32, predicate: u32, object: u32) -> Self {
        Self::new(subject..=subject, predicate..=predicate, object..=object)
    }

    /// Box covering every triple.
    pub fn everything() -> Self {
        Self::new(0..=u32::MAX, 0..=u32::MAX, 0..=u32::MAX)
    }

    /// Whether the boxes overlap on all three axes.
    pub fn intersects(&self, other: &LockBox) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.max[axis] && self.max[axis] >= other.min[axis])
    }
}

#[derive(Debug)]
struct Lock {
    region: LockBox,
    transaction: TransactionId,
    exclusive: bool,
}

#[derive(Debug, Default)]
struct LockState {
    locks: Vec<Lock>,
    committed: BTreeSet<TransactionId>,
    active: BTreeSet<TransactionId>,
}

impl LockState {
    fn conflicts(&self, transaction: TransactionId, region: &LockBox, exclusive: bool) -> bool {
        self.locks.iter().any(|held| {
            held.region.intersects(region)
                && held.transaction != transaction
                && (exclusive || held.exclusive)
                && !self.committed.contains(&held.transaction)
        })
    }
}

/// Box-based lock table shared by concurrent transactions.
#[derive(Debug, Default)]
pub struct PredicateLockManager {
    state: Mutex<LockState>,
}

impl PredicateLockManager {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to lock `region` for `transaction`. Returns false on conflict
    /// with a lock of another uncommitted transaction.
    pub fn lock(&self, transaction: TransactionId, region: LockBox, exclusive: bool) -> bool {
        self.lock_multiple(transaction, &[(region, exclusive)])
    }

    /// Locks every region or none of them.
    pub fn lock_multiple(&self, transaction: TransactionId, regions: &[(LockBox, bool)]) -> bool {
        let mut state = self.state.lock();
        if regions
            .iter()
            .any(|(region, exclusive)| state.conflicts(transaction, region, *exclusive))
        {
            debug!(transaction, regions = regions.len(), "predicate_lock.conflict");
            return false;
        }
        for &(region, exclusive) in regions {
            state.locks.push(Lock {
                region,
                transaction,
                exclusive,
            });
        }
        state.active.insert(transaction);
        true
    }

    /// Marks `transaction` as finished and drops every lock no running
    /// transaction can conflict with anymore.
    pub fn finished(&self, transaction: TransactionId) {
        let mut state = self.state.lock();
        if state.active.first() != Some(&transaction) {
            if state.active.contains(&transaction) {
                state.committed.insert(transaction);
            }
            return;
        }
        state.active.remove(&transaction);
        let mut oldest = state.active.first().copied().unwrap_or(0);
        while let Some(&first) = state.committed.first() {
            if first > oldest {
                break;
            }
            state.committed.remove(&first);
            state.active.remove(&first);
            oldest = state.active.first().copied().unwrap_or(0);
        }
        if state.active.is_empty() {
            state.locks.clear();
        } else {
            state.locks.retain(|lock| lock.transaction >= oldest);
        }
        trace!(transaction, remaining = state.locks.len(), "predicate_lock.finished");
    }

    /// Number of locks currently held.
    pub fn len(&self) -> usize {
        self.state.lock().locks.len()
    }

    /// Whether no lock is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
