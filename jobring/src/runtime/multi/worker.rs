use crate::queue::JobQueue;
use crate::reactor::{Reactor, ReactorHandle};
use crate::runtime::multi::scheduler::PoolJob;
use crate::runtime::{EventInterval, ExeOpt, Priority, Ticker, TickerEvents};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

const EXECUTING: u8 = 0;
const WAITING: u8 = 1;
const STOP: u8 = 2;

/// One pool worker: a run queue and the reactor its thread drives.
///
/// Aligned to a cache line so neighbouring workers' locks do not share one.
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct Worker {
    index: usize,

    queue: Mutex<JobQueue<PoolJob>>,

    /// `EXECUTING`, `WAITING` (blocked in the reactor) or `STOP`.
    state: AtomicU8,

    pub(crate) reactor: ReactorHandle,
}

impl Worker {
    pub(super) fn new(index: usize, reactor: ReactorHandle) -> Self {
        Self {
            index,
            queue: Mutex::new(JobQueue::new()),
            state: AtomicU8::new(EXECUTING),
            reactor,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Enqueues `jobs`, waiting for the queue lock.
    pub(super) fn push(&self, jobs: JobQueue<PoolJob>, opts: ExeOpt) {
        insert(&mut self.queue.lock(), jobs, opts);
        self.notify();
    }

    /// Enqueues `jobs` unless the queue lock is held, handing them back then.
    pub(super) fn try_push(
        &self,
        jobs: JobQueue<PoolJob>,
        opts: ExeOpt,
    ) -> Result<(), JobQueue<PoolJob>> {
        match self.queue.try_lock() {
            Some(mut queue) => insert(&mut queue, jobs, opts),
            None => return Err(jobs),
        }

        self.notify();
        Ok(())
    }

    /// The queue lock orders this load after the worker's switch to
    /// `WAITING`, or the worker's re-check after our push.
    fn notify(&self) {
        if self.state.load(Ordering::SeqCst) == WAITING {
            self.reactor.notify_if_foreign();
        }
    }

    /// Requests the worker to exit its loop, whatever it is doing.
    pub(super) fn stop(&self) {
        self.state.swap(STOP, Ordering::SeqCst);
        self.reactor.notify();
    }

    pub(super) fn is_stopped(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STOP
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(super) fn take_all(&self) -> JobQueue<PoolJob> {
        std::mem::take(&mut *self.queue.lock())
    }

    #[cfg(test)]
    pub(super) fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs jobs until a stop is requested. Only returns on the worker's own
    /// thread, with jobs left over still queued.
    pub(super) fn run(&self, reactor: &mut Reactor, event_interval: u32) {
        let mut ticker = Ticker::new();
        let mut interval = EventInterval::new(event_interval);

        loop {
            if self.is_stopped() {
                return;
            }

            let mut batch = self.take_all();

            if batch.is_empty() {
                if !self.transition(EXECUTING, WAITING) {
                    return;
                }

                // Producers pushing after this check see WAITING and notify.
                if self.queue.lock().is_empty() {
                    // Errors are logged by the reactor.
                    let _ = reactor.wait();
                }

                if !self.transition(WAITING, EXECUTING) {
                    return;
                }
                continue;
            }

            while let Some(job) = batch.pop_front() {
                tracing::trace!(id = %job.id(), "run");
                job.run();

                let events = ticker.tick(&mut interval);
                if events.contains(TickerEvents::POLL_REACTOR) {
                    let _ = reactor.poll();
                }

                if events.contains(TickerEvents::CHECK_STOP) && self.is_stopped() {
                    self.queue.lock().prepend(batch);
                    return;
                }
            }
        }
    }
}

fn insert(queue: &mut JobQueue<PoolJob>, jobs: JobQueue<PoolJob>, opts: ExeOpt) {
    match opts.priority {
        Priority::Low => queue.append(jobs),
        Priority::High => queue.prepend(jobs),
    }
}
