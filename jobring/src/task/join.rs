use crate::context;
use crate::task::{AbortHandle, Id, JoinError, RawTask, Result};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

/// The continuation of a spawned task.
///
/// Awaiting the handle suspends the caller until the task finishes. The
/// caller is woken exactly once, after which the output is moved out of the
/// task cell. Tasks start lazily, when an executor first runs their job.
///
/// Every handle has to be consumed: awaited to completion, resolved with
/// [`get_result`], or given up with [`detach`]. Dropping one otherwise is a
/// bug in the caller. Debug builds assert on it, release builds log a warning
/// and detach the task.
///
/// A panic inside the task surfaces as a [`JoinError`]:
///
/// ```
/// use jobring::task::JoinHandle;
///
/// #[jobring::main(flavor = "inline")]
/// async fn main() {
///     let handle: JoinHandle<i32> = jobring::spawn(async {
///         panic!("boom");
///     });
///
///     let err = handle.await.unwrap_err();
///     assert!(err.is_panic());
/// }
/// ```
///
/// [`get_result`]: JoinHandle::get_result
/// [`detach`]: JoinHandle::detach
#[must_use = "a JoinHandle must be awaited or detached"]
pub struct JoinHandle<T> {
    raw: RawTask,
    consumed: bool,
    _output: PhantomData<T>,
}

unsafe impl<T: Send> Send for JoinHandle<T> {}
unsafe impl<T: Send> Sync for JoinHandle<T> {}

impl<T> Unpin for JoinHandle<T> {}
impl<T> UnwindSafe for JoinHandle<T> {}
impl<T> RefUnwindSafe for JoinHandle<T> {}

impl<T> JoinHandle<T> {
    pub(super) fn new(raw: RawTask) -> JoinHandle<T> {
        JoinHandle {
            raw,
            consumed: false,
            _output: PhantomData,
        }
    }

    /// Requests cancellation.
    ///
    /// The executor owning the task drops the future the next time it would
    /// run it. A poll already in progress is not interrupted. Unless the task
    /// managed to complete first, the handle then resolves to a
    /// [cancelled](JoinError::is_cancelled) error.
    pub fn abort(&self) {
        self.raw.remote_abort();
    }

    /// Whether the output, or the error replacing it, is ready.
    pub fn is_finished(&self) -> bool {
        self.raw.state().load().is_complete()
    }

    /// A handle that can only cancel the task.
    #[must_use = "abort handles do nothing unless `.abort` is called"]
    pub fn abort_handle(&self) -> AbortHandle {
        self.raw.ref_inc();
        AbortHandle::new(self.raw)
    }

    pub fn id(&self) -> Id {
        self.raw.header().id()
    }

    /// Gives up on the output. The task keeps running and its cell is freed
    /// when it completes.
    pub fn detach(mut self) {
        self.consumed = true;
    }

    /// Resolves the handle without waiting.
    ///
    /// Returns the output of a completed task. A task that has not completed
    /// yet keeps running detached, and a
    /// [not finished](JoinError::is_not_finished) error is returned instead.
    pub fn get_result(mut self) -> Result<T> {
        self.consumed = true;

        let noop = futures::task::noop_waker_ref();
        match Pin::new(&mut self).poll(&mut Context::from_waker(noop)) {
            Poll::Ready(res) => res,
            Poll::Pending => Err(JoinError::NotFinished(self.id())),
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut out: Poll<Result<T>> = Poll::Pending;

        // Safety: `T` is the output type of the task behind `raw`.
        unsafe {
            self.raw
                .read_output((&raw mut out).cast::<()>(), cx.waker());
        }

        self.consumed |= out.is_ready();
        out
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        let leaked = !self.consumed && !std::thread::panicking() && !context::is_shutting_down();
        if leaked {
            debug_assert!(
                false,
                "JoinHandle for task {} dropped without being joined or detached",
                self.id()
            );
            tracing::warn!(
                task.id = %self.id(),
                "JoinHandle dropped without being joined or detached, detaching"
            );
        }

        if self.raw.state().drop_join_handle_fast().is_err() {
            self.raw.release_join();
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id())
            .field("finished", &self.is_finished())
            .finish()
    }
}
