use crate::context;
use crate::reactor::{IoError, ReactorHandle};
use crate::time::TimerId;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Completes once its deadline has passed.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep {
    deadline: Instant,
    reactor: Option<ReactorHandle>,
    registered: Option<(TimerId, Waker)>,
}

impl Sleep {
    /// Fails with [`IoError::NoReactor`] outside a runtime.
    pub fn try_new(deadline: Instant) -> Result<Self, IoError> {
        match context::current_reactor() {
            Some(reactor) => Ok(Self {
                deadline,
                reactor: Some(reactor),
                registered: None,
            }),
            None => Err(IoError::NoReactor),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Moves the deadline. Takes effect on the next poll.
    pub fn reset(&mut self, deadline: Instant) {
        self.deadline = deadline;
        self.deregister();
    }

    fn deregister(&mut self) {
        if let (Some(reactor), Some((id, _))) = (&self.reactor, self.registered.take()) {
            reactor.delete_timer(id);
        }
    }
}

/// Sleeps for `duration` on the current runtime.
///
/// # Panics
///
/// When polled outside a runtime.
pub fn sleep_for(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Sleeps until `deadline` on the current runtime.
///
/// # Panics
///
/// When polled outside a runtime.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        reactor: context::current_reactor(),
        registered: None,
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if Instant::now() >= this.deadline {
            // Due timers are popped by the reactor whether or not they were
            // deleted, deleting here would only grow the cancellation set.
            this.registered = None;
            return Poll::Ready(());
        }

        if let Some((_, waker)) = &this.registered
            && waker.will_wake(cx.waker())
        {
            return Poll::Pending;
        }

        this.deregister();
        let reactor = match this.reactor.take().or_else(context::current_reactor) {
            Some(reactor) => this.reactor.insert(reactor),
            None => panic!("`Sleep` polled outside a jobring runtime"),
        };

        let id = reactor.add_timer(this.deadline, cx.waker().clone());
        this.registered = Some((id, cx.waker().clone()));
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if !self.is_elapsed() {
            self.deregister();
        }
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("deadline", &self.deadline)
            .field("registered", &self.registered.as_ref().map(|(id, _)| *id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as jobring;
    use rstest::rstest;

    #[rstest]
    #[case::one_ms(Duration::from_millis(1))]
    #[case::five_ms(Duration::from_millis(5))]
    #[case::twenty_ms(Duration::from_millis(20))]
    #[jobring::test]
    async fn test_sleep_never_returns_early(#[case] duration: Duration) {
        let start = Instant::now();
        sleep_for(duration).await;
        let elapsed = start.elapsed();

        assert!(elapsed >= duration, "woke after {elapsed:?}, expected >= {duration:?}");
        // Generous bound, loaded CI machines are slow.
        assert!(elapsed < duration + Duration::from_millis(200));
    }

    #[jobring::test]
    async fn test_past_deadline_is_ready() {
        sleep_until(Instant::now() - Duration::from_secs(1)).await;
        sleep_for(Duration::ZERO).await;
    }

    #[jobring::test(flavor = "multi", worker_threads = 2)]
    async fn test_sleep_on_multi() {
        let start = Instant::now();
        let sleeps: Vec<_> = (0..8)
            .map(|i| jobring::spawn(sleep_for(Duration::from_millis(i * 2))))
            .collect();

        for handle in sleeps {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(14));
    }

    #[jobring::test]
    async fn test_reset_extends_deadline() {
        let start = Instant::now();
        let mut sleep = sleep_for(Duration::from_millis(1));
        sleep.reset(Instant::now() + Duration::from_millis(10));
        sleep.await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_try_new_outside_runtime() {
        assert!(matches!(
            Sleep::try_new(Instant::now()),
            Err(IoError::NoReactor)
        ));
    }
}
