use crate::queue::{Link, Links};
use parking_lot::Mutex;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::Waker;

const WAITING: u8 = 0;
const GRANTED: u8 = 1;
const ABANDONED: u8 = 2;

/// A parked future, queued until a primitive grants it what it waits for.
///
/// The state only ever leaves `WAITING` once, either to `GRANTED` by the
/// primitive or to `ABANDONED` by the future itself. Whoever wins that race
/// owns the outcome.
pub(crate) struct Waiter {
    links: Links<Waiter>,
    state: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl Waiter {
    pub(crate) fn new(waker: Waker) -> Arc<Self> {
        Arc::new(Self {
            links: Links::new(),
            state: AtomicU8::new(WAITING),
            waker: Mutex::new(Some(waker)),
        })
    }

    /// Stores the waker of the latest poll. Call before [`Waiter::is_granted`]
    /// so a concurrent grant cannot be missed.
    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.waker.lock();
        match &*slot {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    pub(crate) fn is_granted(&self) -> bool {
        self.state.load(Ordering::Acquire) == GRANTED
    }

    /// Hands the waited-for resource to this waiter and wakes it. Fails if
    /// the waiter was abandoned.
    pub(crate) fn grant(&self) -> bool {
        if self
            .state
            .compare_exchange(WAITING, GRANTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let waker = self.waker.lock().take();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Withdraws the waiter. Fails if it was granted first.
    pub(crate) fn abandon(&self) -> bool {
        self.state
            .compare_exchange(WAITING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            WAITING => "waiting",
            GRANTED => "granted",
            _ => "abandoned",
        };
        f.debug_struct("Waiter").field("state", &state).finish()
    }
}

unsafe impl Link for Arc<Waiter> {
    type Node = Waiter;

    fn into_node(self) -> NonNull<Waiter> {
        // Safety: Arc::into_raw never returns null.
        unsafe { NonNull::new_unchecked(Arc::into_raw(self).cast_mut()) }
    }

    unsafe fn from_node(ptr: NonNull<Waiter>) -> Arc<Waiter> {
        unsafe { Arc::from_raw(ptr.as_ptr()) }
    }

    unsafe fn links(ptr: NonNull<Waiter>) -> NonNull<Links<Waiter>> {
        unsafe { NonNull::new_unchecked(&raw mut (*ptr.as_ptr()).links) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::AtomicJobQueue;
    use crate::test_utils::mock_waker;

    #[test]
    fn test_grant_and_abandon_are_exclusive() {
        let (waker, data) = mock_waker();
        let waiter = Waiter::new(waker);

        assert!(waiter.grant());
        assert!(!waiter.abandon());
        assert!(!waiter.grant());
        assert!(waiter.is_granted());
        assert_eq!(data.wake_count(), 1);
    }

    #[test]
    fn test_abandoned_waiter_never_woken() {
        let (waker, data) = mock_waker();
        let waiter = Waiter::new(waker);

        assert!(waiter.abandon());
        assert!(!waiter.grant());
        assert_eq!(data.wake_count(), 0);
    }

    #[test]
    fn test_queue_keeps_waiter_alive() {
        let (waker, _) = mock_waker();
        let waiter = Waiter::new(waker);
        let queue = AtomicJobQueue::new();

        queue.push(waiter.clone());
        assert_eq!(Arc::strong_count(&waiter), 2);

        let mut drained = queue.pop_all();
        assert_eq!(drained.len(), 1);
        drained.clear();
        assert_eq!(Arc::strong_count(&waiter), 1);
    }
}
