//! Completion reactor.
//!
//! Every executor thread owns one [`Reactor`] and drives it from its loop.
//! Other threads, and tasks holding on to operations, reach it through a
//! cloneable [`ReactorHandle`]: staging operations, cancelling them, adding
//! timers, or waking the owner with [`ReactorHandle::notify`].
//!
//! Operation lifetime is tracked by the [`PendingSet`], never by the task
//! that waits on it. A completion and a cancellation racing on the same
//! [`OpToken`] resolve there, so exactly one of them resumes the owner.

pub(crate) mod backend;
pub(crate) use backend::{Backend, BackendKind, Completion, OpKind, Unpark};

mod errors;
pub use errors::IoError;

mod park;

mod pending;
pub use pending::OpToken;
pub(crate) use pending::{CancelOutcome, CompleteOutcome, PendingSet, Resolved};

mod uring;

use crate::context;
use crate::time::{TimerId, TimerManager};
use io_uring::types::Timespec;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Wakers resumed by one reactor turn without spilling to the heap.
const INLINE_WAKERS: usize = 32;

struct OpsState {
    pending: PendingSet,

    /// Registered but not yet handed to the backend.
    staged: Vec<OpToken>,

    /// user_data of submitted operations to cancel.
    cancels: Vec<u64>,
}

pub(crate) struct Shared {
    timers: TimerManager<Waker>,
    ops: Mutex<OpsState>,

    /// Gate that coalesces concurrent [`ReactorHandle::notify`] calls.
    notified: AtomicBool,

    unparker: Arc<dyn Unpark>,
    supports_io: bool,
}

/// Drives one backend. Owned by the thread that runs its executor loop.
pub(crate) struct Reactor {
    // Dropped before `shared`, the kernel must release buffers first.
    backend: Box<dyn Backend>,
    shared: Arc<Shared>,
    completions: Vec<Completion>,
}

impl Reactor {
    pub(crate) fn new(backend: Box<dyn Backend>) -> Self {
        let shared = Arc::new(Shared {
            timers: TimerManager::new(),
            ops: Mutex::new(OpsState {
                pending: PendingSet::new(),
                staged: Vec::new(),
                cancels: Vec::new(),
            }),
            notified: AtomicBool::new(false),
            unparker: backend.unparker(),
            supports_io: backend.supports_io(),
        });

        Self {
            backend,
            shared,
            completions: Vec::with_capacity(64),
        }
    }

    pub(crate) fn build(kind: BackendKind, sq_ring_size: u32) -> anyhow::Result<Self> {
        Ok(Self::new(backend::build(kind, sq_ring_size)?))
    }

    pub(crate) fn handle(&self) -> ReactorHandle {
        ReactorHandle(self.shared.clone())
    }

    /// Blocks until a completion, a due timer or a notification. Returns the
    /// number of resumed wakers.
    pub(crate) fn wait(&mut self) -> Result<usize, IoError> {
        self.turn(true)
    }

    /// Same as [`Reactor::wait`] without blocking.
    pub(crate) fn poll(&mut self) -> Result<usize, IoError> {
        self.turn(false)
    }

    fn turn(&mut self, block: bool) -> Result<usize, IoError> {
        let mut wakers: SmallVec<[Waker; INLINE_WAKERS]> = SmallVec::new();

        wakers.extend(self.shared.timers.process_timers());
        self.flush(&mut wakers);

        let notified = block && self.shared.notified.swap(false, Ordering::AcqRel);
        let timeout = if !block || notified || !wakers.is_empty() {
            Some(Duration::ZERO)
        } else {
            self.shared
                .timers
                .next_instant()
                .map(|at| at.saturating_duration_since(Instant::now()))
        };

        tracing::trace!(?timeout, due = wakers.len(), "reactor turn");
        let res = self.backend.submit_and_wait(timeout, &mut self.completions);

        if !self.completions.is_empty() {
            let mut ops = self.shared.ops.lock();
            for completion in self.completions.drain(..) {
                let token = OpToken::from_user_data(completion.user_data);
                match ops
                    .pending
                    .complete(token, completion.result, completion.is_final())
                {
                    CompleteOutcome::Resumed(Some(waker)) => wakers.push(waker),
                    CompleteOutcome::Resumed(None) | CompleteOutcome::Dropped => {}
                }
            }
        }

        wakers.extend(self.shared.timers.process_timers());

        let count = wakers.len();
        for waker in wakers {
            waker.wake();
        }

        if let Err(e) = &res {
            tracing::error!(error = %e, "reactor backend wait failed");
        }

        res.map(|_| count)
    }

    /// Hands queued cancellations and staged operations to the backend.
    fn flush(&mut self, wakers: &mut SmallVec<[Waker; INLINE_WAKERS]>) {
        let backend = &mut self.backend;
        let mut ops = self.shared.ops.lock();
        let OpsState {
            pending,
            staged,
            cancels,
        } = &mut *ops;

        for user_data in cancels.drain(..) {
            backend.cancel(user_data);
        }

        for token in staged.drain(..) {
            let failed = pending.submit_with(token, |user_data, op, link_timeout| {
                backend.prepare(user_data, op, link_timeout)
            });

            if let Some(waker) = failed {
                wakers.push(waker);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.shared.ops.lock().pending.len()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // Wakers own their tasks, and tasks own handles to this reactor.
        // Release both outside the locks to break the cycle.
        let timers = self.shared.timers.clear();
        let wakers = self.shared.ops.lock().pending.take_wakers();

        if timers > 0 || !wakers.is_empty() {
            tracing::debug!(timers, ops = wakers.len(), "reactor dropped with waiters");
        }
        drop(wakers);
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("timers", &self.timers)
            .field("notified", &self.notified.load(Ordering::Relaxed))
            .field("supports_io", &self.supports_io)
            .finish_non_exhaustive()
    }
}

/// Cloneable access to a reactor from any thread.
#[derive(Clone, Debug)]
pub(crate) struct ReactorHandle(Arc<Shared>);

impl ReactorHandle {
    pub(crate) fn ptr_eq(&self, other: &ReactorHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn supports_io(&self) -> bool {
        self.0.supports_io
    }

    /// Wakes the owning thread. Concurrent calls collapse into one signal
    /// until the owner consumes it.
    pub(crate) fn notify(&self) {
        if !self.0.notified.swap(true, Ordering::AcqRel) {
            self.0.unparker.unpark();
        }
    }

    /// The owner never blocks while running jobs, only foreign threads need
    /// to wake it.
    pub(crate) fn notify_if_foreign(&self) {
        if !context::is_current_reactor(self) {
            self.notify();
        }
    }

    /// Registers an operation. It reaches the backend on the next turn.
    pub(crate) fn stage(
        &self,
        op: OpKind,
        link_timeout: Option<Duration>,
    ) -> Result<OpToken, IoError> {
        if !self.0.supports_io {
            return Err(IoError::Unsupported);
        }

        let token = {
            let mut ops = self.0.ops.lock();
            let token = ops.pending.insert(op, link_timeout.map(Timespec::from));
            ops.staged.push(token);
            token
        };

        self.notify_if_foreign();
        Ok(token)
    }

    pub(crate) fn poll_op(&self, token: OpToken, cx: &mut Context<'_>) -> Poll<Resolved> {
        self.0.ops.lock().pending.poll(token, cx.waker())
    }

    pub(crate) fn poll_next_op(
        &self,
        token: OpToken,
        cx: &mut Context<'_>,
    ) -> Poll<(Result<i32, IoError>, bool)> {
        self.0.ops.lock().pending.poll_next(token, cx.waker())
    }

    /// Cancels an operation. Returns false when it had already completed.
    pub(crate) fn cancel_op(&self, token: OpToken) -> bool {
        let outcome = self.0.ops.lock().pending.cancel(token);

        match outcome {
            CancelOutcome::Won {
                needs_backend,
                waker,
            } => {
                if needs_backend {
                    self.0.ops.lock().cancels.push(token.user_data());
                    self.notify_if_foreign();
                }
                drop(waker);
                true
            }
            CancelOutcome::Lost => false,
        }
    }

    /// Forgets an operation its owner has observed. Idempotent.
    pub(crate) fn remove_op(&self, token: OpToken) {
        let waker = self.0.ops.lock().pending.remove(token);
        drop(waker);
    }

    pub(crate) fn add_timer(&self, at: Instant, waker: Waker) -> TimerId {
        let id = self.0.timers.add_timer(at, waker);
        self.notify_if_foreign();
        id
    }

    pub(crate) fn delete_timer(&self, id: TimerId) {
        self.0.timers.delete_timer(id);
    }
}
