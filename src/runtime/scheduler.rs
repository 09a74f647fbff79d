#![forbid(unsafe_code)]
//! Plan execution driver.
//!
//! Operators may hand out asynchronous execution points, typically the
//! build side of a hash join, that can run ahead of the main pipeline.
//! With more than one worker thread configured those points run on a
//! scoped worker pool in dependency order before the root is drained.

use std::collections::VecDeque;
use std::thread;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{Result, TristoreError};

/// Work an operator can run ahead of the pipeline.
pub trait AsyncPoint: Send {
    /// Runs the work to completion.
    fn run(&mut self);
}

/// Minimal pull interface of a physical operator.
pub trait Operator {
    /// Produces the first tuple and returns its multiplicity, 0 when empty.
    fn first(&mut self) -> Result<u64>;
    /// Produces the next tuple, 0 at the end.
    fn next(&mut self) -> Result<u64>;
    /// Registers work below this operator that may run asynchronously.
    fn async_input_candidates(&mut self, _scheduler: &mut Scheduler) {}
}

/// Scheduler settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerOptions {
    /// Worker threads; values outside `2..=1000` run everything inline.
    pub threads: usize,
    /// Forbid operators from skipping ahead on sorted inputs.
    pub disable_skipping: bool,
}

impl SchedulerOptions {
    /// Effective worker count, 0 for single threaded execution.
    pub fn worker_threads(&self) -> usize {
        if (2..=1000).contains(&self.threads) {
            self.threads
        } else {
            0
        }
    }
}

struct RegisteredPoint {
    id: usize,
    point: Box<dyn AsyncPoint>,
    scheduling_class: u32,
    priority: f64,
    dependencies: FxHashSet<usize>,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<(usize, Box<dyn AsyncPoint>)>,
    completed: Vec<usize>,
    active: usize,
    shutdown: bool,
}

#[derive(Default)]
struct Pool {
    state: Mutex<PoolState>,
    signal: Condvar,
}

/// Marks a job done even if it panics, so the dispatcher never waits on it.
struct Finished<'p> {
    pool: &'p Pool,
    id: usize,
}

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.active -= 1;
        state.completed.push(self.id);
        self.pool.signal.notify_all();
    }
}

impl Pool {
    fn work(&self) {
        let mut state = self.state.lock();
        loop {
            let Some((id, mut point)) = state.queue.pop_front() else {
                if state.shutdown {
                    return;
                }
                self.signal.wait(&mut state);
                continue;
            };
            state.active += 1;
            self.signal.notify_all();
            drop(state);
            {
                let _done = Finished { pool: self, id };
                point.run();
            }
            state = self.state.lock();
        }
    }
}

/// Runs plans, optionally with asynchronous execution points.
pub struct Scheduler {
    options: SchedulerOptions,
    registered: Vec<RegisteredPoint>,
    next_id: usize,
}

impl Scheduler {
    /// Creates a scheduler.
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            registered: Vec::new(),
            next_id: 0,
        }
    }

    /// Active settings.
    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Whether operators may skip ahead on sorted inputs.
    pub fn skipping_enabled(&self) -> bool {
        !self.options.disable_skipping
    }

    /// Number of points registered so far; pass it as `dependencies` to
    /// make a later point wait for everything registered after this call.
    pub fn registered_points(&self) -> usize {
        self.registered.len()
    }

    /// Registers `point`. It depends on every point registered at position
    /// `dependencies` or later. Lower classes run first, higher priority
    /// first within a class.
    pub fn register_async_point(
        &mut self,
        point: Box<dyn AsyncPoint>,
        scheduling_class: u32,
        priority: f64,
        dependencies: usize,
    ) {
        let dependencies = self
            .registered
            .iter()
            .skip(dependencies)
            .map(|p| p.id)
            .collect();
        self.registered.push(RegisteredPoint {
            id: self.next_id,
            point,
            scheduling_class,
            priority,
            dependencies,
        });
        self.next_id += 1;
    }

    /// Drains `root` on the calling thread. Returns the summed multiplicity
    /// of all produced tuples.
    pub fn execute_single_threaded(&mut self, root: &mut dyn Operator) -> Result<u64> {
        let mut produced = root.first()?;
        if produced == 0 {
            return Ok(0);
        }
        loop {
            let count = root.next()?;
            if count == 0 {
                return Ok(produced);
            }
            produced += count;
        }
    }

    /// Runs the asynchronous points below `root` on worker threads, then
    /// drains `root`. Falls back to [`Self::execute_single_threaded`] when
    /// no workers are configured.
    pub fn execute(&mut self, root: &mut dyn Operator) -> Result<u64> {
        let threads = self.options.worker_threads();
        if threads == 0 {
            return self.execute_single_threaded(root);
        }
        self.registered.clear();
        root.async_input_candidates(self);
        let points = std::mem::take(&mut self.registered);
        let count = points.len();
        if !points.is_empty() {
            let pool = Pool::default();
            thread::scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(|| pool.work());
                }
                let outcome = dispatch(&pool, points, threads);
                let mut state = pool.state.lock();
                state.shutdown = true;
                pool.signal.notify_all();
                outcome
            })?;
        }
        debug!(points = count, threads, "scheduler.async_points.done");
        let produced = self.execute_single_threaded(root)?;
        info!(produced, "scheduler.execute");
        Ok(produced)
    }
}

/// Feeds ready points to the pool until all of them have run.
fn dispatch(pool: &Pool, mut pending: Vec<RegisteredPoint>, threads: usize) -> Result<()> {
    let mut state = pool.state.lock();
    while !pending.is_empty() {
        for id in state.completed.drain(..) {
            for point in &mut pending {
                point.dependencies.remove(&id);
            }
        }
        if state.queue.len() + state.active >= threads {
            pool.signal.wait(&mut state);
            continue;
        }
        let mut best: Option<usize> = None;
        for (index, point) in pending.iter().enumerate() {
            if !point.dependencies.is_empty() {
                continue;
            }
            let better = match best.map(|b| &pending[b]) {
                None => true,
                Some(current) => {
                    current.scheduling_class > point.scheduling_class
                        || (current.scheduling_class == point.scheduling_class
                            && current.priority < point.priority)
                }
            };
            if better {
                best = Some(index);
            }
        }
        match best {
            Some(index) => {
                let point = pending.swap_remove(index);
                state.queue.push_back((point.id, point.point));
                pool.signal.notify_all();
            }
            None if state.active > 0 || !state.queue.is_empty() => pool.signal.wait(&mut state),
            None => return Err(TristoreError::Invalid("cyclic async point dependencies")),
        }
    }
    while !state.queue.is_empty() || state.active > 0 {
        pool.signal.wait(&mut state);
    }
    Ok(())
}
