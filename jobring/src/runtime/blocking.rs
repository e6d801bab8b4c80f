//! Thread pool for synchronous closures that would stall an executor.
//!
//! Threads are spawned on demand up to `max_threads` and exit after sitting
//! idle for `keep_alive`. Closures run as regular tasks whose future resolves
//! on the first poll, so join handles, abort and panic capture behave as for
//! async tasks.

use crate::context;
use crate::queue::JobQueue;
use crate::runtime::{ExeOpt, Schedule, ThreadNamer};
use crate::task::{Job, JoinHandle, new_task};
use crate::utils::ScopeGuard;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

/// Queued jobs tolerated per idle thread before the pool grows.
const JOBS_PER_IDLE_THREAD: usize = 5;

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) max_threads: usize,
    pub(crate) keep_alive: Duration,
    pub(crate) thread_name: ThreadNamer,
    pub(crate) thread_stack_size: Option<usize>,
}

/// Cloneable handle to the blocking pool. Doubles as the scheduler of the
/// tasks it runs.
#[derive(Debug, Clone)]
pub(crate) struct Spawner(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    state: Mutex<PoolState>,
    condvar: Condvar,
    cfg: Config,
}

#[derive(Debug, Default)]
struct PoolState {
    queue: JobQueue<Job<Spawner>>,

    /// Threads parked on the condvar.
    idle: usize,

    /// Threads alive, idle or not.
    threads: usize,

    handles: Vec<thread::JoinHandle<()>>,
    shutdown: bool,
}

/// Runs the closure on its first poll.
struct BlockingTask<F>(Option<F>);

impl<F> Unpin for BlockingTask<F> {}

impl<F, R> Future for BlockingTask<F>
where
    F: FnOnce() -> R,
{
    type Output = R;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<R> {
        let f = self
            .0
            .take()
            .expect("blocking task polled after completion");
        Poll::Ready(f())
    }
}

impl Spawner {
    pub(crate) fn new(cfg: Config) -> Self {
        Spawner(Arc::new(Inner {
            state: Mutex::new(PoolState::default()),
            condvar: Condvar::new(),
            cfg,
        }))
    }

    pub(crate) fn spawn<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (job, join) = new_task(BlockingTask(Some(f)), self.clone(), ExeOpt::default());
        tracing::trace!(id = %job.id(), "spawn blocking");

        self.push(job);
        join
    }

    fn push(&self, job: Job<Spawner>) {
        let mut state = self.0.state.lock();

        if state.shutdown {
            drop(state);
            let _guard = context::enter_shutdown();
            job.shutdown();
            return;
        }

        state.queue.push_back(job);

        if state.idle > 0 && state.queue.len() <= state.idle * JOBS_PER_IDLE_THREAD {
            self.0.condvar.notify_one();
            return;
        }

        if state.threads >= self.0.cfg.max_threads {
            self.0.condvar.notify_one();
            return;
        }

        state.handles.retain(|handle| !handle.is_finished());

        match self.spawn_thread() {
            Ok(handle) => {
                state.threads += 1;
                state.handles.push(handle);
            }
            Err(e) if state.threads == 0 => {
                tracing::error!(error = %e, "failed to spawn blocking thread");

                // Nobody would ever run them.
                let mut orphans = std::mem::take(&mut state.queue);
                drop(state);

                let _guard = context::enter_shutdown();
                orphans.drain().for_each(Job::shutdown);
            }
            Err(e) => {
                tracing::warn!(error = %e, threads = state.threads, "failed to grow blocking pool");
            }
        }
    }

    fn spawn_thread(&self) -> std::io::Result<thread::JoinHandle<()>> {
        let mut builder = thread::Builder::new().name(self.0.cfg.thread_name.next_name());

        if let Some(stack_size) = self.0.cfg.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let inner = self.0.clone();
        builder.spawn(move || inner.run())
    }

    /// Stops the pool and joins every thread. Jobs that never started
    /// complete as cancelled.
    pub(crate) fn shutdown(&self) {
        let handles = {
            let mut state = self.0.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            std::mem::take(&mut state.handles)
        };

        self.0.condvar.notify_all();

        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("blocking thread panicked");
            }
        }

        let mut leftovers = std::mem::take(&mut self.0.state.lock().queue);
        if !leftovers.is_empty() {
            tracing::debug!(jobs = leftovers.len(), "cancelling queued blocking jobs");
        }

        let _guard = context::enter_shutdown();
        leftovers.drain().for_each(Job::shutdown);
    }

    #[cfg(test)]
    fn threads(&self) -> usize {
        self.0.state.lock().threads
    }
}

impl Inner {
    fn run(&self) {
        let _exit = ScopeGuard::new(|| self.state.lock().threads -= 1);
        let mut state = self.state.lock();

        loop {
            if let Some(job) = state.queue.pop_front() {
                drop(state);
                job.run();
                state = self.state.lock();
                continue;
            }

            if state.shutdown {
                break;
            }

            state.idle += 1;
            let timed_out = self
                .condvar
                .wait_for(&mut state, self.cfg.keep_alive)
                .timed_out();
            state.idle -= 1;

            if timed_out && state.queue.is_empty() && !state.shutdown {
                tracing::trace!("blocking thread idle, exiting");
                break;
            }
        }
    }
}

impl Schedule for Spawner {
    fn schedule(&self, job: Job<Self>) {
        self.push(job);
    }

    fn schedule_with(&self, job: Job<Self>, _opts: ExeOpt) {
        self.push(job);
    }
}
