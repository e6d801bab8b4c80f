#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::{Header, RawTask};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// The waker a task sees while it is being polled.
///
/// It borrows the ref-count of the job being run and is therefore never
/// dropped. Clones take a count of their own.
pub(super) struct PollWaker<'a> {
    waker: ManuallyDrop<Waker>,
    _header: PhantomData<&'a Header>,
}

impl<'a> PollWaker<'a> {
    pub(super) fn new(header: &'a NonNull<Header>) -> PollWaker<'a> {
        PollWaker {
            waker: ManuallyDrop::new(unsafe { Waker::from_raw(raw_waker(*header)) }),
            _header: PhantomData,
        }
    }
}

impl Deref for PollWaker<'_> {
    type Target = Waker;

    fn deref(&self) -> &Waker {
        &self.waker
    }
}

// One vtable for every task, `Waker::will_wake` compares it.
static TASK_WAKER: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop_waker);

fn raw_waker(header: NonNull<Header>) -> RawWaker {
    RawWaker::new(header.as_ptr().cast_const().cast(), &TASK_WAKER)
}

unsafe fn task(data: *const ()) -> RawTask {
    RawTask::from_raw(NonNull::new_unchecked(data.cast_mut().cast()))
}

unsafe fn clone(data: *const ()) -> RawWaker {
    let task = task(data);
    task.ref_inc();
    raw_waker(task.header_ptr())
}

unsafe fn wake(data: *const ()) {
    task(data).wake_by_val();
}

unsafe fn wake_by_ref(data: *const ()) {
    task(data).wake_by_ref();
}

unsafe fn drop_waker(data: *const ()) {
    task(data).drop_reference();
}
