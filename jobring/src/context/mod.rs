//! Per-thread runtime context.
//!
//! Executors install the scheduler handle and the reactor they drive before
//! polling any job. Free functions such as [`spawn`](crate::spawn) and
//! [`sleep_for`](crate::time::sleep_for) read it back; there is no global
//! runtime singleton.

use crate::reactor::ReactorHandle;
use crate::runtime::Handle;
use crate::task::Id;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

struct Context {
    /// Scheduler new tasks are spawned onto.
    handle: RefCell<Option<Handle>>,

    /// Reactor driven by this thread.
    reactor: RefCell<Option<ReactorHandle>>,

    /// `(pool address, worker index)` when this thread is a pool worker.
    worker: Cell<Option<(usize, usize)>>,

    /// Task being polled right now.
    current_task_id: Cell<Option<Id>>,

    /// Set while a runtime tears down its queues.
    shutting_down: Cell<bool>,
}

thread_local! {
    static CONTEXT: Context = const {
        Context {
            handle: RefCell::new(None),
            reactor: RefCell::new(None),
            worker: Cell::new(None),
            current_task_id: Cell::new(None),
            shutting_down: Cell::new(false),
        }
    };
}

/// Restores the previous context on drop. Not `Send`, it must be dropped on
/// the thread that created it.
#[must_use]
pub(crate) struct EnterGuard {
    handle: Option<Handle>,
    reactor: Option<ReactorHandle>,
    worker: Option<(usize, usize)>,
    _p: PhantomData<*const ()>,
}

/// Installs `handle` and `reactor` as the current thread's context.
pub(crate) fn enter(
    handle: Handle,
    reactor: ReactorHandle,
    worker: Option<(usize, usize)>,
) -> EnterGuard {
    CONTEXT.with(|ctx| EnterGuard {
        handle: ctx.handle.replace(Some(handle)),
        reactor: ctx.reactor.replace(Some(reactor)),
        worker: ctx.worker.replace(worker),
        _p: PhantomData,
    })
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let _ = CONTEXT.try_with(|ctx| {
            // Swap out first, the previous values may run arbitrary drops.
            let handle = ctx.handle.replace(self.handle.take());
            let reactor = ctx.reactor.replace(self.reactor.take());
            ctx.worker.set(self.worker);
            drop((handle, reactor));
        });
    }
}

/// Runs `f` with the current scheduler handle, if any.
pub(crate) fn with_handle<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Handle) -> R,
{
    CONTEXT
        .try_with(|ctx| ctx.handle.borrow().as_ref().map(f))
        .ok()
        .flatten()
}

pub(crate) fn current_reactor() -> Option<ReactorHandle> {
    CONTEXT
        .try_with(|ctx| ctx.reactor.borrow().clone())
        .ok()
        .flatten()
}

/// True when `reactor` is the one this thread drives.
pub(crate) fn is_current_reactor(reactor: &ReactorHandle) -> bool {
    CONTEXT
        .try_with(|ctx| {
            ctx.reactor
                .borrow()
                .as_ref()
                .is_some_and(|current| current.ptr_eq(reactor))
        })
        .unwrap_or(false)
}

/// Index of the worker running on this thread, if it belongs to the pool
/// identified by `pool`.
pub(crate) fn worker_index(pool: usize) -> Option<usize> {
    CONTEXT
        .try_with(|ctx| match ctx.worker.get() {
            Some((addr, index)) if addr == pool => Some(index),
            _ => None,
        })
        .ok()
        .flatten()
}

/// Index of the pool worker running on this thread, whatever its pool.
pub fn current_worker_index() -> Option<usize> {
    CONTEXT
        .try_with(|ctx| ctx.worker.get().map(|(_, index)| index))
        .ok()
        .flatten()
}

pub(crate) fn set_current_task_id(id: Option<Id>) -> Option<Id> {
    CONTEXT
        .try_with(|ctx| ctx.current_task_id.replace(id))
        .unwrap_or(None)
}

pub(crate) fn current_task_id() -> Option<Id> {
    CONTEXT
        .try_with(|ctx| ctx.current_task_id.get())
        .unwrap_or(None)
}

/// Flags the current thread as tearing down a runtime until the guard drops.
pub(crate) fn enter_shutdown() -> ShutdownGuard {
    let prev = CONTEXT
        .try_with(|ctx| ctx.shutting_down.replace(true))
        .unwrap_or(false);

    ShutdownGuard {
        prev,
        _p: PhantomData,
    }
}

pub(crate) fn is_shutting_down() -> bool {
    CONTEXT
        .try_with(|ctx| ctx.shutting_down.get())
        .unwrap_or(true)
}

#[must_use]
pub(crate) struct ShutdownGuard {
    prev: bool,
    _p: PhantomData<*const ()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = CONTEXT.try_with(|ctx| ctx.shutting_down.set(self.prev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_swap_returns_previous() {
        let first = Id::next();
        let second = Id::next();

        assert_eq!(set_current_task_id(Some(first)), None);
        assert_eq!(set_current_task_id(Some(second)), Some(first));
        assert_eq!(current_task_id(), Some(second));
        assert_eq!(set_current_task_id(None), Some(second));
        assert_eq!(current_task_id(), None);
    }

    #[test]
    fn test_shutdown_guard_nests() {
        assert!(!is_shutting_down());
        {
            let _outer = enter_shutdown();
            {
                let _inner = enter_shutdown();
                assert!(is_shutting_down());
            }
            assert!(is_shutting_down());
        }
        assert!(!is_shutting_down());
    }

    #[test]
    fn test_no_context_outside_runtime() {
        assert!(with_handle(|_| ()).is_none());
        assert!(current_reactor().is_none());
        assert!(current_worker_index().is_none());
    }
}
