//! Collaborators used while executing plans: optimistic range locking for
//! transactional callers and the asynchronous execution scheduler.

/// Optimistic box locks over the triple id space.
pub mod predicate_lock;

/// Plan execution with asynchronous execution points.
pub mod scheduler;

pub use predicate_lock::{LockBox, PredicateLockManager, TransactionId};
pub use scheduler::{AsyncPoint, Operator, Scheduler, SchedulerOptions};
