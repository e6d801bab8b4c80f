use crate::task::{Id, RawTask};
use std::fmt;
use std::panic::{RefUnwindSafe, UnwindSafe};

/// Lets its holder cancel a task without being able to join it.
///
/// Obtained from [`JoinHandle::abort_handle`]. Any number of them may exist
/// next to the join handle, and dropping one leaves the task alone.
///
/// [`JoinHandle::abort_handle`]: crate::task::JoinHandle::abort_handle
pub struct AbortHandle {
    raw: RawTask,
}

unsafe impl Send for AbortHandle {}
unsafe impl Sync for AbortHandle {}

impl UnwindSafe for AbortHandle {}
impl RefUnwindSafe for AbortHandle {}

impl AbortHandle {
    /// Takes over a ref-count the caller already added.
    pub(super) fn new(raw: RawTask) -> Self {
        AbortHandle { raw }
    }

    /// Requests cancellation, see [`JoinHandle::abort`]. Calling it on a
    /// finished or already aborted task does nothing.
    ///
    /// [`JoinHandle::abort`]: crate::task::JoinHandle::abort
    pub fn abort(&self) {
        self.raw.remote_abort();
    }

    /// Whether the task completed. Stays `false` after [`abort`] until the
    /// executor has actually dropped the future.
    ///
    /// [`abort`]: AbortHandle::abort
    pub fn is_finished(&self) -> bool {
        self.raw.state().load().is_complete()
    }

    pub fn id(&self) -> Id {
        self.raw.header().id()
    }
}

impl Clone for AbortHandle {
    fn clone(&self) -> Self {
        self.raw.ref_inc();
        AbortHandle::new(self.raw)
    }
}

impl Drop for AbortHandle {
    fn drop(&mut self) {
        self.raw.drop_reference();
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle").field("id", &self.id()).finish()
    }
}
