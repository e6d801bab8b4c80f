//! Heap-allocated tasks and the handles pointing at them.
//!
//! A task cell holds the future, its scheduler handle and the join waker
//! behind a single atomic state word. Three kinds of handles share the cell,
//! each owning one ref-count:
//!
//! * [`Job`]: the task is queued for a poll. Exists only while `NOTIFIED` is
//!   held, so a task sits in at most one queue.
//! * [`JoinHandle`]: the continuation. Reads the output and is woken once on
//!   completion.
//! * `Waker`s and [`AbortHandle`]s.
//!
//! Access rules for the join waker slot:
//!
//! 1. While `JOIN_INTEREST` is set the output belongs to the `JoinHandle`.
//! 2. While `JOIN_WAKER` is unset only the `JoinHandle` may touch the waker.
//! 3. While `JOIN_WAKER` is set the `JoinHandle` may read it, and the runtime
//!    may read it once `COMPLETE` is set.
//! 4. Replacing a set waker requires unsetting `JOIN_WAKER` first, which fails
//!    when the task completed concurrently.

use crate::runtime::{ExeOpt, Schedule};
use std::future::Future;

pub mod abort;
pub use self::abort::AbortHandle;

mod error;
pub use self::error::JoinError;

mod join;
pub use self::join::JoinHandle;

pub mod id;
pub use self::id::{Id, id, try_id};

mod cell;

mod header;
pub(crate) use self::header::Header;

mod job;
pub use self::job::JobState;
pub(crate) use self::job::Job;

mod raw;
pub(crate) use self::raw::RawTask;

mod state;

mod waker;

mod yield_now;
pub use self::yield_now::yield_now;

/// Task result sent back.
pub(crate) type Result<T> = std::result::Result<T, JoinError>;

/// Allocates a task cell. Two references are created: the `Job`, which the
/// caller hands to a scheduler, and the `JoinHandle`.
pub(crate) fn new_task<T, S>(task: T, scheduler: S, opts: ExeOpt) -> (Job<S>, JoinHandle<T::Output>)
where
    S: Schedule,
    T: Future + 'static,
    T::Output: 'static,
{
    let raw = RawTask::new::<T, S>(task, scheduler, Id::next(), opts);
    let job = Job::new(raw);
    let join = JoinHandle::new(raw);

    (job, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{DropCounter, DummyScheduler, mock_waker};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    #[test]
    fn test_job_state_transitions() {
        let (job, join) = new_task(async { 7 }, DummyScheduler, ExeOpt::balance());
        assert_eq!(job.state(), JobState::Ready);
        assert!(!join.is_finished());

        job.run();
        assert!(join.is_finished());
        assert_eq!(join.get_result().ok(), Some(7));
    }

    #[test]
    fn test_join_waker_woken_once() {
        let (job, mut join) = new_task(async { "done" }, DummyScheduler, ExeOpt::balance());

        let (waker, data) = mock_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(std::pin::Pin::new(&mut join).poll(&mut cx).is_pending());
        assert_eq!(data.wake_count(), 0);

        job.run();
        assert_eq!(data.wake_count(), 1);

        match std::pin::Pin::new(&mut join).poll(&mut cx) {
            Poll::Ready(Ok(out)) => assert_eq!(out, "done"),
            other => panic!("unexpected poll result: {other:?}"),
        }
        assert_eq!(data.wake_count(), 1);
    }

    #[test]
    fn test_panic_is_captured() {
        let (job, join) = new_task(
            async {
                panic!("kaboom");
            },
            DummyScheduler,
            ExeOpt::balance(),
        );

        job.run();
        let err = join.get_result().unwrap_err();
        assert!(err.is_panic());
        assert_eq!(err.panic_message(), Some("kaboom"));
    }

    #[test]
    fn test_abort_before_run() {
        let counter = DropCounter::new();
        let guard = counter.guard();

        let (job, join) = new_task(
            async move {
                let _guard = guard;
            },
            DummyScheduler,
            ExeOpt::balance(),
        );

        // The job is already queued, abort only flags it.
        join.abort();
        assert_eq!(job.state(), JobState::Cancel);

        job.run();
        assert_eq!(counter.dropped(), 1);
        assert!(join.get_result().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_abort_handle_outlives_join() {
        let (job, join) = new_task(std::future::pending::<()>(), DummyScheduler, ExeOpt::balance());

        let abort = join.abort_handle();
        let other = abort.clone();
        assert_eq!(other.id(), join.id());
        join.detach();

        other.abort();
        assert!(!abort.is_finished());

        job.run();
        assert!(abort.is_finished());
    }

    #[test]
    fn test_get_result_before_completion() {
        let counter = DropCounter::new();
        let guard = counter.guard();

        let (job, join) = new_task(async move { guard }, DummyScheduler, ExeOpt::balance());
        let id = join.id();

        let err = join.get_result().unwrap_err();
        assert!(err.is_not_finished());
        assert!(!err.is_cancelled());
        assert_eq!(err.id(), id);

        // The task was not cancelled and still runs to completion.
        assert_eq!(job.state(), JobState::Ready);
        job.run();
        assert_eq!(counter.dropped(), 1);
    }

    #[test]
    fn test_shutdown_drops_future() {
        let counter = DropCounter::new();
        let guard = counter.guard();

        let (job, join) = new_task(
            async move {
                let _guard = guard;
                std::future::pending::<()>().await;
            },
            DummyScheduler,
            ExeOpt::balance(),
        );

        job.shutdown();
        assert_eq!(counter.dropped(), 1);
        assert!(join.get_result().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_detach_frees_cell() {
        let counter = DropCounter::new();
        let guard = counter.guard();

        let (job, join) = new_task(async move { guard }, DummyScheduler, ExeOpt::balance());
        join.detach();
        assert_eq!(counter.dropped(), 0);

        // The output is dropped as soon as the task completes.
        job.run();
        assert_eq!(counter.dropped(), 1);
    }

    #[test]
    fn test_wake_while_running_reschedules() {
        let polls = Arc::new(AtomicUsize::new(0));
        let polls_clone = polls.clone();

        let (job, join) = new_task(
            async move {
                polls_clone.fetch_add(1, Ordering::Relaxed);
                yield_now().await;
                polls_clone.fetch_add(1, Ordering::Relaxed);
            },
            DummyScheduler,
            ExeOpt::balance(),
        );

        // The yield wakes the task, DummyScheduler drops the new job.
        job.run();
        assert_eq!(polls.load(Ordering::Relaxed), 1);
        assert!(!join.is_finished());
        join.detach();
    }
}
