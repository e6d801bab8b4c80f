//! Executors and the runtime facade.
//!
//! Two flavors share one job representation:
//! - `inline` runs every job on the thread that calls `block_on`, alternating
//!   between draining one queue and blocking on one reactor.
//! - `multi` runs a fixed pool of workers, each with its own queue and its own
//!   reactor.
//!
//! Synchronous code that must block goes to the blocking pool, never to an
//! executor thread.

use crate::queue::JobQueue;
use crate::task::{Job, JoinHandle, new_task};
use std::future::Future;

// Public API
pub mod runtime;
pub use runtime::{Builder, Runtime};
pub(crate) use runtime::{RuntimeConfig, ThreadNamer};

mod spawn;
pub use spawn::{spawn, spawn_all, spawn_blocking, spawn_detach, spawn_with, wait_all};

// Exports
pub(crate) mod blocking;

pub(crate) mod inline;

pub(crate) mod multi;

mod ticker;
use ticker::{EventInterval, Ticker, TickerEvents};

/// Receives jobs whose task became ready to run.
pub(crate) trait Schedule: Send + Sync + Sized + 'static {
    /// Queues a job that was woken. The executor picks its placement.
    fn schedule(&self, job: Job<Self>);

    /// Queues a job with an explicit placement.
    fn schedule_with(&self, job: Job<Self>, opts: ExeOpt);
}

/// Where a job may run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Any worker, spread across the pool.
    #[default]
    Balance,

    /// The given worker when its queue is free, any worker otherwise.
    PreferInOne(usize),

    /// Always the given worker, for the whole life of the task.
    ForceInOne(usize),
}

/// Which end of the target queue a job goes to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Back of the queue.
    #[default]
    Low,

    /// Front of the queue.
    High,
}

/// Scheduling hint carried by a task from spawn to completion.
///
/// Inline runtimes have a single queue and only honor the priority.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExeOpt {
    pub placement: Placement,
    pub priority: Priority,
}

impl ExeOpt {
    pub const fn balance() -> Self {
        Self {
            placement: Placement::Balance,
            priority: Priority::Low,
        }
    }

    pub const fn prefer(worker: usize) -> Self {
        Self {
            placement: Placement::PreferInOne(worker),
            priority: Priority::Low,
        }
    }

    pub const fn force(worker: usize) -> Self {
        Self {
            placement: Placement::ForceInOne(worker),
            priority: Priority::Low,
        }
    }

    pub const fn high(mut self) -> Self {
        self.priority = Priority::High;
        self
    }

    pub(crate) fn push<L: crate::queue::Link>(&self, queue: &mut JobQueue<L>, job: L) {
        match self.priority {
            Priority::Low => queue.push_back(job),
            Priority::High => queue.push_front(job),
        }
    }
}

/// Scheduler half of a runtime, installed in the thread context of every
/// thread that runs its jobs.
#[derive(Debug, Clone)]
pub(crate) enum Handle {
    Inline(inline::Handle),
    Multi(multi::Handle),
}

impl Schedule for Handle {
    fn schedule(&self, job: Job<Self>) {
        match self {
            Handle::Inline(h) => h.schedule(job),
            Handle::Multi(h) => h.schedule(job),
        }
    }

    fn schedule_with(&self, job: Job<Self>, opts: ExeOpt) {
        match self {
            Handle::Inline(h) => h.execute(job, opts),
            Handle::Multi(h) => h.execute(job, opts),
        }
    }
}

impl Handle {
    pub(crate) fn spawn_with<F>(&self, future: F, opts: ExeOpt) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (job, join) = new_task(future, self.clone(), opts);
        tracing::trace!(id = %job.id(), ?opts, "spawn");

        self.schedule_with(job, opts);
        join
    }

    /// Spawns every future as one batch, split across workers.
    pub(crate) fn spawn_all<I, F>(&self, futures: I, opts: ExeOpt) -> Vec<JoinHandle<F::Output>>
    where
        I: IntoIterator<Item = F>,
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut batch = JobQueue::new();
        let joins = futures
            .into_iter()
            .map(|future| {
                let (job, join) = new_task(future, self.clone(), opts);
                batch.push_back(job);
                join
            })
            .collect::<Vec<_>>();

        let count = batch.len();
        match self {
            Handle::Inline(h) => h.execute_batch(batch, opts),
            Handle::Multi(h) => h.execute_batch(batch, count, opts),
        }
        joins
    }

    pub(crate) fn blocking(&self) -> &blocking::Spawner {
        match self {
            Handle::Inline(h) => h.blocking(),
            Handle::Multi(h) => h.blocking(),
        }
    }

    pub(crate) fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self {
            Handle::Inline(h) => h.block_on(future),
            Handle::Multi(h) => h.block_on(future),
        }
    }

    pub(crate) fn shutdown(&self) {
        match self {
            Handle::Inline(h) => h.shutdown(),
            Handle::Multi(h) => h.shutdown(),
        }
    }
}

/// Unwraps the main task's result on the thread that blocked on it.
fn resume_main<T>(result: Result<T, crate::task::JoinError>) -> T {
    match result {
        Ok(output) => output,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => panic!("main task did not complete: {e}"),
    }
}
