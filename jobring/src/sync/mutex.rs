use crate::queue::{AtomicJobQueue, JobQueue};
use crate::sync::waiter::Waiter;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

/// An asynchronous mutual exclusion lock with FIFO hand-off.
///
/// Unlocking never releases the lock while someone waits: ownership passes
/// straight to the oldest waiter still interested, so a task spinning on
/// [`Mutex::lock`] cannot barge ahead of parked ones.
///
/// ```
/// use jobring::sync::Mutex;
/// use std::sync::Arc;
///
/// #[jobring::main(flavor = "multi", worker_threads = 2)]
/// async fn main() {
///     let count = Arc::new(Mutex::new(0));
///
///     let handles = (0..8).map(|_| {
///         let count = count.clone();
///         jobring::spawn(async move {
///             *count.lock().await += 1;
///         })
///     });
///     jobring::wait_all(handles).await;
///
///     assert_eq!(*count.lock().await, 8);
/// }
/// ```
pub struct Mutex<T> {
    locked: AtomicBool,

    /// Waiters pushed by contending lockers.
    incoming: AtomicJobQueue<Arc<Waiter>>,

    /// Waiters already drained from `incoming`, oldest first. Only touched by
    /// the lock owner.
    pending: parking_lot::Mutex<JobQueue<Arc<Waiter>>>,

    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

/// Releases the lock when dropped.
#[must_use = "if unused, the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Lock<'a, T> {
    mutex: &'a Mutex<T>,
    waiter: Option<Arc<Waiter>>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            incoming: AtomicJobQueue::new(),
            pending: parking_lot::Mutex::new(JobQueue::new()),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            waiter: None,
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.try_acquire().then(|| MutexGuard { mutex: self })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Passes the lock to the oldest live waiter, or releases it.
    fn unlock(&self) {
        loop {
            {
                let mut pending = self.pending.lock();
                pending.append(self.incoming.pop_all());

                while let Some(waiter) = pending.pop_front() {
                    if waiter.grant() {
                        return;
                    }
                }
            }

            self.locked.store(false, Ordering::SeqCst);

            // A waiter pushed after the drain may have failed its retry
            // before the store. Take the lock back to serve it.
            if self.incoming.is_empty() || !self.try_acquire() {
                return;
            }
        }
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        // Only abandoned waiters can be left, live ones borrow the mutex.
        self.pending.get_mut().clear();
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<'a, T> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mutex = self.mutex;

        if let Some(waiter) = &self.waiter {
            waiter.register(cx.waker());
            if waiter.is_granted() {
                self.waiter = None;
                return Poll::Ready(MutexGuard { mutex });
            }
            return Poll::Pending;
        }

        if mutex.try_acquire() {
            return Poll::Ready(MutexGuard { mutex });
        }

        let waiter = Waiter::new(cx.waker().clone());
        mutex.incoming.push(waiter.clone());

        // The owner may have released between the failed attempt and the push.
        if mutex.try_acquire() {
            // Grants only happen while the lock is held, so nobody raced us.
            let abandoned = waiter.abandon();
            debug_assert!(abandoned, "lock granted to a waiter while released");
            return Poll::Ready(MutexGuard { mutex });
        }

        self.waiter = Some(waiter);
        Poll::Pending
    }
}

impl<T> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take()
            && !waiter.abandon()
        {
            // Granted but never observed, pass it on.
            self.mutex.unlock();
        }
    }
}

impl<T> fmt::Debug for Lock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("waiter", &self.waiter)
            .finish_non_exhaustive()
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: holding the guard means holding the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: holding the guard means holding the lock.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
