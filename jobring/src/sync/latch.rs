use crate::queue::AtomicJobQueue;
use crate::sync::waiter::Waiter;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

/// A single-use countdown. Waiters are released together once the count
/// reaches zero, and every later wait completes immediately.
///
/// ```
/// use jobring::sync::Latch;
/// use std::sync::Arc;
///
/// #[jobring::main(flavor = "multi", worker_threads = 2)]
/// async fn main() {
///     let latch = Arc::new(Latch::new(3));
///
///     for _ in 0..3 {
///         let latch = latch.clone();
///         jobring::spawn_detach(async move { latch.count_down() });
///     }
///
///     latch.wait().await;
///     assert!(latch.try_wait());
/// }
/// ```
pub struct Latch {
    count: AtomicUsize,
    waiters: AtomicJobQueue<Arc<Waiter>>,
}

/// Future returned by [`Latch::wait`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Wait<'a> {
    latch: &'a Latch,
    waiter: Option<Arc<Waiter>>,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            waiters: AtomicJobQueue::new(),
        }
    }

    /// Decrements the count, releasing every waiter when it hits zero.
    ///
    /// # Panics
    ///
    /// When the count is already zero.
    #[track_caller]
    pub fn count_down(&self) {
        let prev = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });

        match prev {
            Ok(1) => self.release_all(),
            Ok(_) => {}
            Err(_) => panic!("latch counted down below zero"),
        }
    }

    /// True once the count reached zero.
    pub fn try_wait(&self) -> bool {
        self.count.load(Ordering::Acquire) == 0
    }

    pub fn wait(&self) -> Wait<'_> {
        Wait {
            latch: self,
            waiter: None,
        }
    }

    /// Counts down, then waits for the others.
    pub async fn arrive_and_wait(&self) {
        self.count_down();
        self.wait().await
    }

    fn release_all(&self) {
        for waiter in self.waiters.pop_all().drain() {
            waiter.grant();
        }
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch")
            .field("count", &self.count.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(waiter) = &self.waiter {
            waiter.register(cx.waker());
            if waiter.is_granted() {
                self.waiter = None;
                return Poll::Ready(());
            }
            return Poll::Pending;
        }

        if self.latch.try_wait() {
            return Poll::Ready(());
        }

        let waiter = Waiter::new(cx.waker().clone());
        self.latch.waiters.push(waiter.clone());

        // Reached zero before the push landed, nobody else will drain it.
        if self.latch.try_wait() {
            waiter.abandon();
            self.latch.release_all();
            return Poll::Ready(());
        }

        self.waiter = Some(waiter);
        Poll::Pending
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            waiter.abandon();
        }
    }
}

impl fmt::Debug for Wait<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait")
            .field("waiter", &self.waiter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as jobring;
    use crate::test_utils::mock_waker;
    use std::pin::pin;
    use std::time::Duration;

    #[test]
    fn test_waiters_released_at_zero() {
        let latch = Latch::new(2);
        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);

        let mut first = pin!(latch.wait());
        let mut second = pin!(latch.wait());
        assert!(first.as_mut().poll(&mut cx).is_pending());
        assert!(second.as_mut().poll(&mut cx).is_pending());

        latch.count_down();
        assert_eq!(data.wake_count(), 0);
        assert!(!latch.try_wait());

        latch.count_down();
        assert_eq!(data.wake_count(), 2);
        assert!(first.as_mut().poll(&mut cx).is_ready());
        assert!(second.as_mut().poll(&mut cx).is_ready());
    }

    #[test]
    fn test_wait_after_release_is_ready() {
        let latch = Latch::new(1);
        latch.count_down();

        let (waker, _) = mock_waker();
        assert!(pin!(latch.wait()).poll(&mut Context::from_waker(&waker)).is_ready());
    }

    #[test]
    #[should_panic(expected = "latch counted down below zero")]
    fn test_count_down_below_zero_panics() {
        let latch = Latch::new(0);
        latch.count_down();
    }

    #[test]
    fn test_dropped_wait_not_woken() {
        let latch = Latch::new(1);
        let (waker, data) = mock_waker();

        let mut wait = Box::pin(latch.wait());
        assert!(wait.as_mut().poll(&mut Context::from_waker(&waker)).is_pending());
        drop(wait);

        latch.count_down();
        assert_eq!(data.wake_count(), 0);
    }

    #[jobring::test(flavor = "multi", worker_threads = 4)]
    async fn test_arrive_and_wait_releases_all() {
        let latch = Arc::new(Latch::new(4));

        let handles = (0..4u64).map(|i| {
            let latch = latch.clone();
            jobring::spawn(async move {
                jobring::time::sleep_for(Duration::from_millis(5 * i)).await;
                latch.arrive_and_wait().await;
                latch.try_wait()
            })
        });

        for res in jobring::wait_all(handles).await {
            assert!(res.expect("task failed"));
        }
    }
}
