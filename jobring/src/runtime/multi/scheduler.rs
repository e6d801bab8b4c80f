use crate::context;
use crate::queue::JobQueue;
use crate::reactor::Reactor;
use crate::runtime::multi::Worker;
use crate::runtime::multi::pool::ThreadPool;
use crate::runtime::{self, ExeOpt, Placement, Priority, RuntimeConfig, blocking, resume_main};
use crate::task::Job;
use anyhow::Result;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub(crate) type PoolJob = Job<runtime::Handle>;

#[derive(Debug)]
pub(crate) struct Scheduler {
    pub(crate) cfg: RuntimeConfig,

    pub(crate) workers: Box<[Worker]>,

    /// Rotating start index of the balancing scan.
    next: AtomicUsize,

    /// `None` once shut down.
    pool: Mutex<Option<ThreadPool>>,

    blocking: blocking::Spawner,

    shutdown: AtomicBool,
}

#[derive(Debug, Clone)]
pub(crate) struct Handle(Arc<Scheduler>);

impl Handle {
    fn new(cfg: &RuntimeConfig, reactors: &[Reactor]) -> Self {
        let workers = reactors
            .iter()
            .enumerate()
            .map(|(index, reactor)| Worker::new(index, reactor.handle()))
            .collect();

        Handle(Arc::new(Scheduler {
            cfg: cfg.clone(),
            workers,
            next: AtomicUsize::new(0),
            pool: Mutex::new(None),
            blocking: blocking::Spawner::new(cfg.blocking()),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Builds every reactor, then starts one thread per worker.
    pub(crate) fn try_new(cfg: &RuntimeConfig) -> Result<Self> {
        let reactors = (0..cfg.worker_threads)
            .map(|_| Reactor::build(cfg.backend, cfg.sq_ring_size))
            .collect::<Result<Vec<_>>>()?;

        let handle = Handle::new(cfg, &reactors);
        let pool = ThreadPool::spawn(&handle, reactors)?;
        *handle.pool.lock() = Some(pool);

        Ok(handle)
    }

    /// Workers without threads: jobs stay where the placement put them.
    #[cfg(test)]
    pub(crate) fn new_idle(cfg: &RuntimeConfig) -> Result<Self> {
        let reactors = (0..cfg.worker_threads)
            .map(|_| Reactor::build(crate::reactor::BackendKind::Park, cfg.sq_ring_size))
            .collect::<Result<Vec<_>>>()?;

        Ok(Handle::new(cfg, &reactors))
    }

    /// Identifies this pool in the thread context of its workers.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Wake path. Forced jobs stay put, others follow the worker that woke
    /// them, or their spawn placement when woken from outside the pool.
    pub(crate) fn schedule(&self, job: PoolJob) {
        let opts = job.opts();

        let placement = match opts.placement {
            Placement::ForceInOne(_) => opts.placement,
            _ => match context::worker_index(self.addr()) {
                Some(index) => Placement::PreferInOne(index),
                None => opts.placement,
            },
        };

        self.execute(
            job,
            ExeOpt {
                placement,
                priority: Priority::Low,
            },
        );
    }

    pub(crate) fn execute(&self, job: PoolJob, opts: ExeOpt) {
        let mut jobs = JobQueue::new();
        jobs.push_back(job);
        self.dispatch(jobs, opts);
    }

    /// Splits `batch` in chunks of `count / workers` jobs, each placed on its
    /// own. Affinity hints keep the whole batch together.
    pub(crate) fn execute_batch(&self, mut batch: JobQueue<PoolJob>, count: usize, opts: ExeOpt) {
        if !matches!(opts.placement, Placement::Balance) {
            self.dispatch(batch, opts);
            return;
        }

        let chunk = (count / self.workers.len()).max(1);
        while !batch.is_empty() {
            let jobs = batch.pop_front_n(chunk);
            self.dispatch(jobs, opts);
        }
    }

    fn dispatch(&self, jobs: JobQueue<PoolJob>, opts: ExeOpt) {
        if self.shutdown.load(Ordering::Acquire) {
            cancel(jobs);
            return;
        }

        let n = self.workers.len();

        match opts.placement {
            Placement::Balance => self.balance(jobs, opts),
            Placement::PreferInOne(index) => {
                debug_assert!(index < n, "worker index {index} out of range");
                if let Err(jobs) = self.workers[index % n].try_push(jobs, opts) {
                    self.balance(jobs, opts);
                }
            }
            Placement::ForceInOne(index) => {
                debug_assert!(index < n, "worker index {index} out of range");
                self.workers[index % n].push(jobs, opts);
            }
        }
    }

    /// Offers `jobs` to every worker from a rotating start, falling back to
    /// a blocking push on the start worker when every queue is busy.
    fn balance(&self, mut jobs: JobQueue<PoolJob>, opts: ExeOpt) {
        let n = self.workers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;

        for offset in 0..n {
            match self.workers[(start + offset) % n].try_push(jobs, opts) {
                Ok(()) => return,
                Err(rejected) => jobs = rejected,
            }
        }

        self.workers[start].push(jobs, opts);
    }

    pub(crate) fn blocking(&self) -> &blocking::Spawner {
        &self.blocking
    }

    /// Runs `future` on worker 0 and parks the calling thread until it is
    /// final. Must not be called from one of the pool's workers.
    pub(crate) fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        debug_assert!(
            context::worker_index(self.addr()).is_none(),
            "pool blocked on from its own worker"
        );

        let main =
            runtime::Handle::Multi(self.clone()).spawn_with(future, ExeOpt::force(0).high());
        resume_main(futures::executor::block_on(main))
    }

    /// Stops and joins every worker, then cancels whatever is left queued.
    /// Must not be called from one of the pool's workers.
    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        debug_assert!(
            context::worker_index(self.addr()).is_none(),
            "pool shut down from its own worker"
        );

        for worker in self.workers.iter() {
            worker.stop();
        }

        let pool = self.pool.lock().take();
        let reactors = pool.map(ThreadPool::join).unwrap_or_default();

        let _guard = context::enter_shutdown();
        self.drain();

        // Parked tasks hold wakers registered on the reactors.
        drop(reactors);
        self.drain();

        self.blocking.shutdown();
        tracing::debug!(workers = self.workers.len(), "pool shut down");
    }

    fn drain(&self) {
        loop {
            let mut drained = 0;
            for worker in self.workers.iter() {
                let jobs = worker.take_all();
                drained += jobs.len();
                cancel(jobs);
            }

            if drained == 0 {
                break;
            }
            tracing::debug!(jobs = drained, "cancelled queued jobs");
        }
    }

    #[cfg(test)]
    pub(crate) fn queue_lens(&self) -> Vec<usize> {
        self.workers.iter().map(Worker::queue_len).collect()
    }

    #[cfg(test)]
    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

fn cancel(mut jobs: JobQueue<PoolJob>) {
    let _guard = context::enter_shutdown();
    jobs.drain().for_each(Job::shutdown);
}

impl Deref for Handle {
    type Target = Arc<Scheduler>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
