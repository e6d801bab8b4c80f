#![allow(unsafe_op_in_unsafe_fn)]

use crate::runtime::{ExeOpt, Schedule};
use crate::task::cell::{TaskCell, Vtable};
use crate::task::state::{Snapshot, State, TransitionToNotifiedByRef, TransitionToNotifiedByVal};
use crate::task::{Header, Id};
use std::cell::UnsafeCell;
use std::future::Future;
use std::ptr::NonNull;
use std::task::Waker;

/// Untyped pointer to a task cell. Copying it does not touch the ref-count,
/// the handle types wrapping it do the counting.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawTask {
    ptr: NonNull<Header>,
}

impl RawTask {
    pub(super) fn new<T, S>(future: T, scheduler: S, id: Id, opts: ExeOpt) -> RawTask
    where
        T: Future + 'static,
        S: Schedule,
    {
        RawTask {
            ptr: TaskCell::<T, S>::allocate(future, scheduler, id, opts),
        }
    }

    pub(super) unsafe fn from_raw(ptr: NonNull<Header>) -> RawTask {
        RawTask { ptr }
    }

    pub(super) fn header_ptr(&self) -> NonNull<Header> {
        self.ptr
    }

    pub(super) fn header(&self) -> &Header {
        unsafe { self.ptr.as_ref() }
    }

    pub(super) fn state(&self) -> &State {
        &self.header().state
    }

    fn vtable(&self) -> &'static Vtable {
        self.header().vtable
    }

    fn join_waker(&self) -> &UnsafeCell<Option<Waker>> {
        unsafe { Header::join_waker(self.ptr) }
    }

    /// Consumes the ref-count of the job being run.
    pub(super) fn poll(self) {
        unsafe { (self.vtable().poll)(self.ptr) }
    }

    /// Expects a ref-count set aside for the new job.
    fn schedule(self) {
        unsafe { (self.vtable().schedule)(self.ptr) }
    }

    fn dealloc(self) {
        unsafe { (self.vtable().dealloc)(self.ptr) }
    }

    pub(super) fn shutdown(self) {
        unsafe { (self.vtable().shutdown)(self.ptr) }
    }

    /// # Safety
    ///
    /// `dst` must be a `*mut Poll<Result<T::Output>>` for the task's `T`.
    pub(super) unsafe fn read_output(self, dst: *mut (), waker: &Waker) {
        (self.vtable().read_output)(self.ptr, dst, waker);
    }

    pub(super) fn release_join(self) {
        unsafe { (self.vtable().release_join)(self.ptr) }
    }

    pub(super) fn ref_inc(self) {
        self.state().ref_inc();
    }

    pub(super) fn drop_reference(self) {
        if self.state().ref_dec() {
            self.dealloc();
        }
    }

    /// Notifies the task, consuming the caller's ref-count.
    pub(super) fn wake_by_val(&self) {
        match self.state().transition_to_notified_by_val() {
            TransitionToNotifiedByVal::Submit => {
                // The transition added a count for the job, ours is released
                // once the scheduler has it.
                self.schedule();
                self.drop_reference();
            }
            TransitionToNotifiedByVal::Dealloc => self.dealloc(),
            TransitionToNotifiedByVal::DoNothing => {}
        }
    }

    /// Notifies the task. The caller keeps its ref-count.
    pub(super) fn wake_by_ref(&self) {
        if let TransitionToNotifiedByRef::Submit = self.state().transition_to_notified_by_ref() {
            self.schedule();
        }
    }

    /// Flags the task cancelled and queues it, so the executor that owns it
    /// drops the future on its own thread.
    pub(super) fn remote_abort(&self) {
        if self.state().transition_to_notified_and_cancel() {
            self.schedule();
        }
    }

    /// Called by the join handle on every poll. Returns `true` when the output
    /// is ready to be taken. Otherwise `waker` is stored and woken once the
    /// task completes.
    pub(super) fn poll_join(&self, waker: &Waker) -> bool {
        let snapshot = self.state().load();
        debug_assert!(snapshot.is_join_interested());

        if snapshot.is_complete() {
            return true;
        }

        let stored = if !snapshot.is_join_waker_set() {
            self.store_join_waker(waker)
        } else if unsafe { &*self.join_waker().get() }
            .as_ref()
            .is_some_and(|current| current.will_wake(waker))
        {
            return false;
        } else {
            // Take the slot back before swapping the waker.
            self.state()
                .unset_waker()
                .and_then(|_| self.store_join_waker(waker))
        };

        match stored {
            Ok(_) => false,
            Err(snapshot) => {
                assert!(snapshot.is_complete(), "join waker rejected by an incomplete task");
                true
            }
        }
    }

    /// Fails, leaving the slot empty, when the task completed in between.
    fn store_join_waker(&self, waker: &Waker) -> Result<Snapshot, Snapshot> {
        let slot = self.join_waker().get();

        // `JOIN_WAKER` is unset, so the slot belongs to the join handle.
        unsafe { *slot = Some(waker.clone()) };

        self.state().set_join_waker().inspect_err(|_| unsafe {
            *slot = None;
        })
    }
}
