#![allow(unsafe_op_in_unsafe_fn)]

use crate::queue::{Link, Links};
use crate::runtime::ExeOpt;
use crate::task::{Header, Id, RawTask};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

/// Lifecycle of the task a [`Job`] points to, as seen by executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting in a queue for its next poll.
    Ready,
    /// Being polled right now.
    Executing,
    /// Abort requested, the next run drops the future.
    Cancel,
    /// Completed, the output is waiting for the join handle.
    Final,
}

/// A unit of work sitting in a run queue.
///
/// Every `Job` owns one ref-count on its task and exists only while the task's
/// `NOTIFIED` bit is held, so a task is never queued twice. Jobs chain into
/// [`JobQueue`]s through the header's intrusive link, queueing never allocates.
///
/// [`JobQueue`]: crate::queue::JobQueue
pub(crate) struct Job<S: 'static> {
    raw: RawTask,
    _p: PhantomData<S>,
}

unsafe impl<S> Send for Job<S> {}
unsafe impl<S> Sync for Job<S> {}

impl<S: 'static> Job<S> {
    pub(super) fn new(raw: RawTask) -> Job<S> {
        Job {
            raw,
            _p: PhantomData,
        }
    }

    /// # Safety
    ///
    /// `ptr` must point at a task header and carry a ref-count for the job.
    pub(crate) unsafe fn from_raw(ptr: NonNull<Header>) -> Job<S> {
        Job::new(RawTask::from_raw(ptr))
    }

    fn into_raw(self) -> RawTask {
        let me = ManuallyDrop::new(self);
        me.raw
    }

    pub(crate) fn header(&self) -> &Header {
        self.raw.header()
    }

    pub(crate) fn id(&self) -> Id {
        self.header().id()
    }

    pub(crate) fn opts(&self) -> ExeOpt {
        self.header().opts()
    }

    pub(crate) fn state(&self) -> JobState {
        let snapshot = self.raw.state().load();

        if snapshot.is_complete() {
            JobState::Final
        } else if snapshot.is_cancelled() {
            JobState::Cancel
        } else if snapshot.is_running() {
            JobState::Executing
        } else {
            JobState::Ready
        }
    }

    /// Polls the task once. The job's ref-count is consumed.
    pub(crate) fn run(self) {
        self.into_raw().poll();
    }

    /// Drops the future without polling it, completing the task with a
    /// cancelled `JoinError`. A task that is running elsewhere is left alone.
    pub(crate) fn shutdown(self) {
        self.into_raw().shutdown();
    }
}

impl<S: 'static> Drop for Job<S> {
    fn drop(&mut self) {
        self.raw.drop_reference();
    }
}

impl<S: 'static> fmt::Debug for Job<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

unsafe impl<S: 'static> Link for Job<S> {
    type Node = Header;

    fn into_node(self) -> NonNull<Header> {
        self.into_raw().header_ptr()
    }

    unsafe fn from_node(ptr: NonNull<Header>) -> Job<S> {
        Job::from_raw(ptr)
    }

    unsafe fn links(ptr: NonNull<Header>) -> NonNull<Links<Header>> {
        Header::queue_links(ptr)
    }
}
