use crate::context;
use crate::queue::JobQueue;
use crate::reactor::{Reactor, ReactorHandle};
use crate::runtime::{self, ExeOpt, RuntimeConfig, blocking, resume_main};
use crate::task::Job;
use anyhow::Result;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) type InlineJob = Job<runtime::Handle>;

#[derive(Debug)]
pub(crate) struct Scheduler {
    pub(crate) cfg: RuntimeConfig,

    pub(crate) queue: Mutex<JobQueue<InlineJob>>,

    pub(crate) reactor_handle: ReactorHandle,

    /// Taken by the thread driving `block_on`.
    reactor: Mutex<Option<Reactor>>,

    blocking: blocking::Spawner,

    shutdown: AtomicBool,
}

#[derive(Debug, Clone)]
pub(crate) struct Handle(Arc<Scheduler>);

impl Handle {
    pub(crate) fn try_new(cfg: &RuntimeConfig) -> Result<Self> {
        let reactor = Reactor::build(cfg.backend, cfg.sq_ring_size)?;

        Ok(Handle(Arc::new(Scheduler {
            cfg: cfg.clone(),
            queue: Mutex::new(JobQueue::new()),
            reactor_handle: reactor.handle(),
            reactor: Mutex::new(Some(reactor)),
            blocking: blocking::Spawner::new(cfg.blocking()),
            shutdown: AtomicBool::new(false),
        })))
    }

    /// Wake path. Woken jobs go to the back of the queue whatever priority
    /// they were spawned with, so a task yielding in a loop cannot starve
    /// the others.
    pub(crate) fn schedule(&self, job: InlineJob) {
        self.execute(job, ExeOpt::balance());
    }

    pub(crate) fn execute(&self, job: InlineJob, opts: ExeOpt) {
        if self.shutdown.load(Ordering::Acquire) {
            let _guard = context::enter_shutdown();
            job.shutdown();
            return;
        }

        opts.push(&mut self.queue.lock(), job);
        self.reactor_handle.notify_if_foreign();
    }

    pub(crate) fn execute_batch(&self, mut batch: JobQueue<InlineJob>, opts: ExeOpt) {
        if self.shutdown.load(Ordering::Acquire) {
            let _guard = context::enter_shutdown();
            batch.drain().for_each(Job::shutdown);
            return;
        }

        {
            let mut queue = self.queue.lock();
            match opts.priority {
                runtime::Priority::Low => queue.append(batch),
                runtime::Priority::High => queue.prepend(batch),
            }
        }
        self.reactor_handle.notify_if_foreign();
    }

    pub(crate) fn blocking(&self) -> &blocking::Spawner {
        &self.blocking
    }

    #[track_caller]
    pub(crate) fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let Some(mut reactor) = self.reactor.lock().take() else {
            panic!("inline runtime is already driven by another block_on");
        };

        let res = {
            let handle = runtime::Handle::Inline(self.clone());
            let _enter = context::enter(handle.clone(), self.reactor_handle.clone(), None);

            let main = handle.spawn_with(future, ExeOpt::balance().high());
            self.event_loop(&mut reactor, &main).map(|_| main)
        };

        *self.reactor.lock() = Some(reactor);

        match res {
            Ok(main) => resume_main(main.get_result()),
            Err(e) => panic!("failed to drive future to completion: {e}"),
        }
    }

    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let _guard = context::enter_shutdown();
        self.drain();

        // Parked tasks hold wakers registered on the reactor.
        let reactor = self.reactor.lock().take();
        drop(reactor);
        self.drain();

        self.blocking.shutdown();
        tracing::debug!("inline executor shut down");
    }

    fn drain(&self) {
        loop {
            let mut jobs = std::mem::take(&mut *self.queue.lock());
            if jobs.is_empty() {
                break;
            }

            tracing::debug!(jobs = jobs.len(), "cancelling queued jobs");
            jobs.drain().for_each(Job::shutdown);
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Deref for Handle {
    type Target = Arc<Scheduler>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
