#![allow(unsafe_op_in_unsafe_fn)]

//! The single heap allocation behind every task, and the vtable through which
//! type-erased handles reach it.

use crate::runtime::{ExeOpt, Schedule};
use crate::task::id::TaskIdGuard;
use crate::task::state::{State, TransitionToIdle, TransitionToRunning};
use crate::task::waker::PollWaker;
use crate::task::{Header, Id, Job, JoinError, RawTask};
use crate::utils::ScopeGuard;
use std::cell::UnsafeCell;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr::NonNull;
use std::task::{Context, Poll, Waker};

/// Handles only carry a `NonNull<Header>`, so the header has to sit at offset
/// zero. Everything past it is reached through the offsets in [`Vtable`].
#[repr(C)]
pub(super) struct TaskCell<T: Future, S> {
    header: Header,
    scheduler: S,
    stage: UnsafeCell<Stage<T>>,
    /// Woken once when the task completes, see the slot rules in `task/mod.rs`.
    join_waker: UnsafeCell<Option<Waker>>,
}

enum Stage<T: Future> {
    Pending(T),
    Ready(super::Result<T::Output>),
    Taken,
}

pub(crate) struct Vtable {
    /// Runs one poll, consuming the caller's ref-count.
    pub(super) poll: unsafe fn(NonNull<Header>),
    /// Hands a new `Job` to the task's scheduler.
    pub(super) schedule: unsafe fn(NonNull<Header>),
    pub(super) dealloc: unsafe fn(NonNull<Header>),
    /// Moves the output into a `*mut Poll<Result<T::Output>>` once complete,
    /// registering the waker otherwise.
    pub(super) read_output: unsafe fn(NonNull<Header>, *mut (), &Waker),
    /// Slow path of dropping a `JoinHandle`.
    pub(super) release_join: unsafe fn(NonNull<Header>),
    /// Cancels the task on behalf of a runtime going away.
    pub(super) shutdown: unsafe fn(NonNull<Header>),

    pub(super) scheduler_offset: usize,
    pub(super) join_waker_offset: usize,
}

impl<T: Future, S: Schedule> TaskCell<T, S> {
    const SCHEDULER_OFFSET: usize = mem::offset_of!(TaskCell<T, S>, scheduler);
    const JOIN_WAKER_OFFSET: usize = mem::offset_of!(TaskCell<T, S>, join_waker);

    // Only constants and fn items appear in the literal, so the borrow is
    // promoted to `'static`.
    fn vtable() -> &'static Vtable {
        &Vtable {
            poll: poll::<T, S>,
            schedule: schedule::<S>,
            dealloc: dealloc::<T, S>,
            read_output: read_output::<T, S>,
            release_join: release_join::<T, S>,
            shutdown: shutdown::<T, S>,
            scheduler_offset: Self::SCHEDULER_OFFSET,
            join_waker_offset: Self::JOIN_WAKER_OFFSET,
        }
    }

    /// Moves `future` to the heap. The returned pointer owns the initial
    /// ref-counts set up by `State::new`.
    pub(super) fn allocate(future: T, scheduler: S, id: Id, opts: ExeOpt) -> NonNull<Header> {
        let cell = Box::new(TaskCell {
            header: Header::new(State::new(), Self::vtable(), id, opts),
            scheduler,
            stage: UnsafeCell::new(Stage::Pending(future)),
            join_waker: UnsafeCell::new(None),
        });

        NonNull::from(Box::leak(cell)).cast()
    }
}

unsafe fn poll<T: Future, S: Schedule>(ptr: NonNull<Header>) {
    CellRef::<T, S>::from_header(ptr).run();
}

unsafe fn schedule<S: Schedule>(ptr: NonNull<Header>) {
    let scheduler = Header::scheduler::<S>(ptr);
    scheduler.as_ref().schedule(Job::from_raw(ptr));
}

unsafe fn dealloc<T: Future, S: Schedule>(ptr: NonNull<Header>) {
    CellRef::<T, S>::from_header(ptr).free();
}

unsafe fn read_output<T: Future, S: Schedule>(ptr: NonNull<Header>, dst: *mut (), waker: &Waker) {
    let dst = &mut *dst.cast::<Poll<super::Result<T::Output>>>();
    CellRef::<T, S>::from_header(ptr).read_output(dst, waker);
}

unsafe fn release_join<T: Future, S: Schedule>(ptr: NonNull<Header>) {
    CellRef::<T, S>::from_header(ptr).release_join();
}

unsafe fn shutdown<T: Future, S: Schedule>(ptr: NonNull<Header>) {
    CellRef::<T, S>::from_header(ptr).shutdown();
}

/// What to do with the ref-count a poll was given once the poll is over.
enum AfterPoll {
    /// Output stored, publish completion.
    Finish,
    /// Woken while running, queue the task again.
    Requeue,
    /// Last reference gone.
    Free,
}

/// A typed view of a cell. Copies of it do not own a ref-count, each method
/// documents the count it consumes.
struct CellRef<T: Future, S> {
    cell: NonNull<TaskCell<T, S>>,
}

impl<T: Future, S: Schedule> CellRef<T, S> {
    unsafe fn from_header(ptr: NonNull<Header>) -> Self {
        CellRef { cell: ptr.cast() }
    }

    fn header_ptr(&self) -> NonNull<Header> {
        self.cell.cast()
    }

    fn cell(&self) -> &TaskCell<T, S> {
        unsafe { self.cell.as_ref() }
    }

    fn state(&self) -> &State {
        &self.cell().header.state
    }

    fn id(&self) -> Id {
        self.cell().header.id
    }

    /// Exclusive while `RUNNING` is held, or once `COMPLETE` hands the output
    /// to the join handle.
    fn stage(&self) -> *mut Stage<T> {
        self.cell().stage.get()
    }

    fn join_waker(&self) -> *mut Option<Waker> {
        self.cell().join_waker.get()
    }

    /// Replaces the stage, dropping the previous one with the task id set.
    fn set_stage(&self, stage: Stage<T>) {
        let _id = TaskIdGuard::enter(self.id());
        unsafe { *self.stage() = stage };
    }

    fn take_output(&self) -> super::Result<T::Output> {
        match mem::replace(unsafe { &mut *self.stage() }, Stage::Taken) {
            Stage::Ready(output) => output,
            _ => panic!("JoinHandle polled after completion"),
        }
    }

    /// Drops an output nobody will read. A panic inside it is logged so it
    /// does not go unnoticed.
    fn discard_output(&self) {
        if let Stage::Ready(Err(err)) = unsafe { &*self.stage() }
            && err.is_panic()
        {
            tracing::error!(
                task.id = %self.id(),
                panic = err.panic_message().unwrap_or("<non-string payload>"),
                "task panicked and its result was never inspected"
            );
        }

        self.set_stage(Stage::Taken);
    }

    /// Consumes one ref-count.
    fn release(self) {
        if self.state().ref_dec() {
            self.free();
        }
    }

    fn free(self) {
        // The count reached zero, nothing else can reach the cell.
        drop(unsafe { Box::from_raw(self.cell.as_ptr()) });
    }

    /// Runs one poll on behalf of a `Job`, consuming the job's ref-count.
    fn run(self) {
        let next = match self.state().transition_to_running() {
            TransitionToRunning::Success => match self.poll_future() {
                Poll::Ready(()) => AfterPoll::Finish,
                Poll::Pending => match self.state().transition_to_idle() {
                    TransitionToIdle::Ok => return,
                    TransitionToIdle::OkNotified => AfterPoll::Requeue,
                    TransitionToIdle::OkDealloc => AfterPoll::Free,
                    TransitionToIdle::Cancelled => {
                        // Aborted during the poll.
                        self.cancel();
                        AfterPoll::Finish
                    }
                },
            },
            TransitionToRunning::Cancelled => {
                self.cancel();
                AfterPoll::Finish
            }
            TransitionToRunning::Failed => return,
            TransitionToRunning::Dealloc => AfterPoll::Free,
        };

        match next {
            AfterPoll::Finish => self.finish(),
            AfterPoll::Free => self.free(),
            AfterPoll::Requeue => {
                // The wake added a ref-count, which the new job takes over.
                let job = unsafe { Job::from_raw(self.header_ptr()) };
                self.cell().scheduler.schedule(job);
                self.release();
            }
        }
    }

    /// Polls the future once. A panic counts as completion and becomes the
    /// task's output.
    fn poll_future(&self) -> Poll<()> {
        let header = self.header_ptr();
        let waker = PollWaker::new(&header);
        let mut cx = Context::from_waker(&waker);

        let polled = panic::catch_unwind(AssertUnwindSafe(|| {
            // A panicking future is dropped before the unwind is caught.
            let mut on_unwind = ScopeGuard::new(|| self.set_stage(Stage::Taken));
            let _id = TaskIdGuard::enter(self.id());

            let Stage::Pending(future) = (unsafe { &mut *self.stage() }) else {
                unreachable!("task {} polled without a future", self.id());
            };
            let poll = unsafe { Pin::new_unchecked(future) }.poll(&mut cx);
            on_unwind.disarm();

            if poll.is_ready() {
                self.set_stage(Stage::Taken);
            }
            poll
        }));

        let output = match polled {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(output)) => Ok(output),
            Err(payload) => Err(JoinError::panic(self.id(), payload)),
        };

        _ = panic::catch_unwind(AssertUnwindSafe(|| self.set_stage(Stage::Ready(output))));
        Poll::Ready(())
    }

    /// Drops the future and stores the cancellation as the output. Requires
    /// `RUNNING`.
    fn cancel(&self) {
        let dropped = panic::catch_unwind(AssertUnwindSafe(|| self.set_stage(Stage::Taken)));

        let err = match dropped {
            Ok(()) => JoinError::cancelled(self.id()),
            Err(payload) => JoinError::panic(self.id(), payload),
        };
        self.set_stage(Stage::Ready(Err(err)));
    }

    /// Publishes completion, wakes the join handle and gives up the ref-count
    /// that drove the task. Requires `RUNNING`.
    fn finish(self) {
        let snapshot = self.state().transition_to_complete();

        _ = panic::catch_unwind(AssertUnwindSafe(|| {
            if !snapshot.is_join_interested() {
                self.discard_output();
                return;
            }
            if !snapshot.is_join_waker_set() {
                return;
            }

            // COMPLETE together with JOIN_WAKER lets the runtime read the slot.
            if let Some(waker) = unsafe { &*self.join_waker() } {
                waker.wake_by_ref();
            }

            if !self.state().unset_waker_after_complete().is_join_interested() {
                // The handle left in the meantime, the slot is ours.
                unsafe { *self.join_waker() = None };
            }
        }));

        if self.state().transition_to_terminal(1) {
            self.free();
        }
    }

    /// Cancels the task unless it is running or complete, then consumes one
    /// ref-count. A running task sees `CANCELLED` when it goes idle.
    fn shutdown(self) {
        if self.state().transition_to_shutdown() {
            self.cancel();
            self.finish();
        } else {
            self.release();
        }
    }

    fn read_output(self, dst: &mut Poll<super::Result<T::Output>>, waker: &Waker) {
        let raw = unsafe { RawTask::from_raw(self.header_ptr()) };
        if raw.poll_join(waker) {
            *dst = Poll::Ready(self.take_output());
        }
    }

    /// Consumes the join handle's ref-count.
    fn release_join(self) {
        let dropped = self.state().transition_to_join_handle_dropped();

        if dropped.drop_output {
            // Dropped here, on the handle's thread, since the output may be `!Send`.
            _ = panic::catch_unwind(AssertUnwindSafe(|| self.discard_output()));
        }
        if dropped.drop_waker {
            unsafe { *self.join_waker() = None };
        }

        self.release();
    }
}
