use crate::reactor::BackendKind;
use crate::runtime::{ExeOpt, Handle, blocking, inline, multi};
use crate::task::JoinHandle;
use anyhow::{Result, bail, ensure};
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

const DEFAULT_SQ_RING_SIZE: u32 = 256;

/// Jobs run between two non-blocking reactor polls.
#[cfg(not(test))]
const DEFAULT_EVENT_INTERVAL: u32 = 61;
#[cfg(test)]
const DEFAULT_EVENT_INTERVAL: u32 = 8;

const DEFAULT_BLOCKING_THREADS: usize = 512;
const DEFAULT_BLOCKING_KEEP_ALIVE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Inline,
    Multi,
}

/// Produces the name of each thread the runtime spawns.
#[derive(Clone)]
pub(crate) struct ThreadNamer(Arc<dyn Fn() -> String + Send + Sync>);

impl ThreadNamer {
    /// "jobring-0", "jobring-1", ...
    fn numbered() -> ThreadNamer {
        let next = AtomicUsize::new(0);
        ThreadNamer(Arc::new(move || {
            format!("jobring-{}", next.fetch_add(1, Ordering::Relaxed))
        }))
    }

    pub(crate) fn next_name(&self) -> String {
        (self.0)()
    }
}

impl fmt::Debug for ThreadNamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ThreadNamer(..)")
    }
}

/// Settings shared by the executors, the reactors and the blocking pool.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) kind: Kind,
    /// Always 1 for the inline flavor.
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNamer,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) backend: BackendKind,
    pub(crate) sq_ring_size: u32,
    pub(crate) event_interval: u32,
    pub(crate) max_blocking_threads: usize,
    pub(crate) blocking_keep_alive: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            kind: Kind::Inline,
            worker_threads: 1,
            thread_name: ThreadNamer::numbered(),
            thread_stack_size: None,
            backend: BackendKind::default(),
            sq_ring_size: DEFAULT_SQ_RING_SIZE,
            event_interval: DEFAULT_EVENT_INTERVAL,
            max_blocking_threads: DEFAULT_BLOCKING_THREADS,
            blocking_keep_alive: DEFAULT_BLOCKING_KEEP_ALIVE,
        }
    }
}

impl RuntimeConfig {
    pub(crate) fn blocking(&self) -> blocking::Config {
        blocking::Config {
            max_threads: self.max_blocking_threads,
            keep_alive: self.blocking_keep_alive,
            thread_name: self.thread_name.clone(),
            thread_stack_size: self.thread_stack_size,
        }
    }
}

/// Configures and builds a [`Runtime`].
///
/// ```
/// use jobring::runtime::Builder;
///
/// let rt = Builder::new_multi().worker_threads(2).try_build().unwrap();
/// assert_eq!(rt.block_on(async { 233 }), 233);
/// ```
#[derive(Debug)]
pub struct Builder {
    cfg: RuntimeConfig,
    /// `None` means one worker per available core.
    worker_threads: Option<usize>,
}

impl Builder {
    /// Every job runs on the thread calling [`Runtime::block_on`].
    pub fn new_inline() -> Builder {
        Builder::with_kind(Kind::Inline)
    }

    /// Jobs run on a pool of worker threads, each with its own reactor.
    pub fn new_multi() -> Builder {
        Builder::with_kind(Kind::Multi)
    }

    fn with_kind(kind: Kind) -> Builder {
        Builder {
            cfg: RuntimeConfig {
                kind,
                ..RuntimeConfig::default()
            },
            worker_threads: None,
        }
    }

    /// Pool size. The inline flavor ignores it.
    #[track_caller]
    pub fn worker_threads(mut self, count: usize) -> Self {
        assert!(count > 0, "worker_threads must be greater than 0");
        self.worker_threads = Some(count);
        self
    }

    /// Gives every runtime thread the same name. pthread keeps the first 15
    /// bytes.
    pub fn thread_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.thread_name_fn(move || name.clone())
    }

    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.cfg.thread_name = ThreadNamer(Arc::new(f));
        self
    }

    /// Stack size in bytes of the runtime's threads.
    #[track_caller]
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        assert!(bytes.is_power_of_two(), "thread_stack_size must be a power of two");
        self.cfg.thread_stack_size = Some(bytes);
        self
    }

    /// Completion backend used by every reactor.
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.cfg.backend = kind;
        self
    }

    /// Entries of each io_uring submission ring.
    #[track_caller]
    pub fn sq_ring_size(mut self, entries: u32) -> Self {
        assert!(entries.is_power_of_two(), "sq_ring_size must be a power of two");
        self.cfg.sq_ring_size = entries;
        self
    }

    /// Jobs a worker runs between two non-blocking reactor polls.
    #[track_caller]
    pub fn event_interval(mut self, jobs: u32) -> Self {
        assert!(jobs > 0, "event_interval must be greater than 0");
        self.cfg.event_interval = jobs;
        self
    }

    #[track_caller]
    pub fn max_blocking_threads(mut self, count: usize) -> Self {
        assert!(count > 0, "max_blocking_threads must be greater than 0");
        self.cfg.max_blocking_threads = count;
        self
    }

    /// How long an idle blocking thread waits for work before exiting.
    pub fn blocking_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.cfg.blocking_keep_alive = keep_alive;
        self
    }

    /// Resolves the defaults and checks the settings.
    fn finish(self) -> Result<RuntimeConfig> {
        let mut cfg = self.cfg;

        cfg.worker_threads = match (cfg.kind, self.worker_threads) {
            (Kind::Inline, _) => 1,
            (Kind::Multi, Some(count)) => count,
            (Kind::Multi, None) => thread::available_parallelism()?.get(),
        };

        ensure!(
            cfg.worker_threads <= usize::from(u16::MAX),
            "worker_threads ({}) exceeds the supported maximum of {}",
            cfg.worker_threads,
            u16::MAX
        );
        ensure!(
            cfg.sq_ring_size.is_power_of_two(),
            "sq_ring_size must be a power of two"
        );

        Ok(cfg)
    }

    /// Starts the runtime.
    ///
    /// Fails when the settings are invalid, when this thread already owns a
    /// runtime, or when a reactor or a thread cannot be set up.
    pub fn try_build(self) -> Result<Runtime> {
        let cfg = self.finish()?;

        if OWNS_RUNTIME.replace(true) {
            bail!("cannot create a runtime: one is already active on this thread");
        }

        let started = match cfg.kind {
            Kind::Inline => inline::Handle::try_new(&cfg).map(Handle::Inline),
            Kind::Multi => multi::Handle::try_new(&cfg).map(Handle::Multi),
        };

        let handle = started.inspect_err(|_| OWNS_RUNTIME.set(false))?;
        tracing::debug!(kind = ?cfg.kind, workers = cfg.worker_threads, "runtime started");

        Ok(Runtime {
            handle,
            owner: thread::current().id(),
        })
    }
}

thread_local! {
    /// One runtime per thread: its executor context is a thread local.
    static OWNS_RUNTIME: Cell<bool> = const { Cell::new(false) };
}

/// A running executor together with its reactors and blocking pool.
///
/// Dropping it shuts everything down. Workers stop, queued jobs are cancelled
/// and the blocking pool is joined.
#[derive(Debug)]
pub struct Runtime {
    handle: Handle,
    owner: ThreadId,
}

impl Runtime {
    /// Runs `future` to completion as the main task and returns its output.
    /// A panic in the main task is resumed on the caller.
    ///
    /// # Panics
    ///
    /// When called from inside a runtime.
    #[track_caller]
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        assert!(
            crate::context::with_handle(|_| ()).is_none(),
            "cannot block_on from within a jobring runtime"
        );
        self.handle.block_on(future)
    }

    /// Spawns with [`ExeOpt::default`]. An inline runtime starts running the
    /// task on the next [`Runtime::block_on`].
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawn_with(future, ExeOpt::default())
    }

    pub fn spawn_with<F>(&self, future: F, opts: ExeOpt) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn_with(future, opts)
    }

    pub fn spawn_detach<F>(&self, future: F)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawn(future).detach();
    }

    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.blocking().spawn(f)
    }

    /// Same as dropping the runtime. Returns once every runtime thread exited.
    pub fn shutdown(self) {
        drop(self);
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.shutdown();

        if thread::current().id() == self.owner {
            // Fails only while the thread's locals are being destroyed.
            _ = OWNS_RUNTIME.try_with(|owns| owns.set(false));
        }
        tracing::debug!("runtime shut down");
    }
}
