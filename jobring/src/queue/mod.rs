//! Intrusive job queues.
//!
//! Both queue flavors thread their elements through a [`Links`] slot embedded
//! in the element itself, so pushing and popping never allocates. An element
//! owns exactly one slot, which is why the same element must never sit in two
//! queues at the same time.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::NonNull;

mod atomic;
pub use self::atomic::AtomicJobQueue;

mod list;
pub use self::list::{Drain, JobQueue};

/// An owned handle that can be threaded through an intrusive queue.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - `into_node` and `from_node` round-trip ownership of the same element,
///   without moving the node in memory while it is linked.
/// - `links` returns a pointer to the [`Links`] embedded in the node, valid for
///   as long as the node is alive.
/// - A node is never linked into two queues at once.
pub unsafe trait Link: Sized {
    /// The type that embeds the [`Links`].
    type Node;

    /// Releases ownership of the handle and returns a pointer to its node.
    fn into_node(self) -> NonNull<Self::Node>;

    /// Reconstructs the owned handle from a node pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must come from a previous call to `into_node` and must not have
    /// been reconstructed since.
    unsafe fn from_node(ptr: NonNull<Self::Node>) -> Self;

    /// Returns the links embedded in `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live node.
    unsafe fn links(ptr: NonNull<Self::Node>) -> NonNull<Links<Self::Node>>;
}

/// The `next` slot embedded in every queueable node.
pub struct Links<T> {
    next: UnsafeCell<Option<NonNull<T>>>,
    _unpin: PhantomPinned,
}

impl<T> Links<T> {
    pub const fn new() -> Self {
        Self {
            next: UnsafeCell::new(None),
            _unpin: PhantomPinned,
        }
    }

    /// # Safety
    ///
    /// The caller must have exclusive access to the node, usually by holding
    /// the queue that contains it.
    pub(crate) unsafe fn next(&self) -> Option<NonNull<T>> {
        unsafe { *self.next.get() }
    }

    /// # Safety
    ///
    /// Same as [`Links::next`].
    pub(crate) unsafe fn set_next(&self, next: Option<NonNull<T>>) {
        unsafe { *self.next.get() = next }
    }
}

impl<T> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: the slot is only touched by whoever owns the node through a queue.
unsafe impl<T: Send> Send for Links<T> {}
unsafe impl<T: Sync> Sync for Links<T> {}

impl<T> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links").finish_non_exhaustive()
    }
}

#[inline]
pub(crate) unsafe fn next_of<L: Link>(node: NonNull<L::Node>) -> Option<NonNull<L::Node>> {
    unsafe { L::links(node).as_ref().next() }
}

#[inline]
pub(crate) unsafe fn set_next_of<L: Link>(node: NonNull<L::Node>, next: Option<NonNull<L::Node>>) {
    unsafe { L::links(node).as_ref().set_next(next) }
}
