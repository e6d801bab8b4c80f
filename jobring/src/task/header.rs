#![allow(unsafe_op_in_unsafe_fn)]

use crate::queue::Links;
use crate::runtime::ExeOpt;
use crate::task::Id;
use crate::task::cell::Vtable;
use crate::task::state::State;
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::task::Waker;

/// First field of every task cell. Jobs, wakers and handles all point here,
/// the rest of the cell is found through the vtable.
#[repr(C)]
pub(crate) struct Header {
    pub(super) state: State,

    /// Threads the task through whichever `JobQueue` holds its job.
    pub(super) queue_next: Links<Header>,

    pub(super) vtable: &'static Vtable,

    pub(super) id: Id,

    /// Placement and priority given at spawn.
    pub(super) opts: ExeOpt,
}

unsafe impl Send for Header {}
unsafe impl Sync for Header {}

impl Header {
    pub(super) fn new(state: State, vtable: &'static Vtable, id: Id, opts: ExeOpt) -> Header {
        Header {
            state,
            queue_next: Links::new(),
            vtable,
            id,
            opts,
        }
    }

    /// # Safety
    ///
    /// `S` must be the scheduler type the cell was allocated with.
    pub(super) unsafe fn scheduler<S>(me: NonNull<Header>) -> NonNull<S> {
        let at = me.as_ptr().cast::<u8>().add(me.as_ref().vtable.scheduler_offset);
        NonNull::new_unchecked(at.cast())
    }

    pub(super) unsafe fn join_waker<'a>(me: NonNull<Header>) -> &'a UnsafeCell<Option<Waker>> {
        let at = me.as_ptr().cast::<u8>().add(me.as_ref().vtable.join_waker_offset);
        &*at.cast::<UnsafeCell<Option<Waker>>>()
    }

    pub(super) unsafe fn queue_links(me: NonNull<Header>) -> NonNull<Links<Header>> {
        NonNull::new_unchecked(std::ptr::addr_of_mut!((*me.as_ptr()).queue_next))
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn opts(&self) -> ExeOpt {
        self.opts
    }
}
