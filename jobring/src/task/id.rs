use crate::context;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a task for the lifetime of the process.
///
/// Drawn from one process-wide counter and never reused. Join errors and
/// log records refer to tasks by it.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

/// The [`Id`] of the task being polled on this thread.
///
/// # Panics
///
/// Outside a task. See [`try_id`] for a non-panicking variant.
#[track_caller]
pub fn id() -> Id {
    match context::current_task_id() {
        Some(id) => id,
        None => panic!("task::id() called outside of a task"),
    }
}

/// The [`Id`] of the task being polled on this thread, if any.
pub fn try_id() -> Option<Id> {
    context::current_task_id()
}

impl Id {
    pub(crate) fn next() -> Id {
        static NEXT: AtomicU64 = AtomicU64::new(1);

        // Starts at 1 and would need centuries to wrap.
        NonZeroU64::new(NEXT.fetch_add(1, Ordering::Relaxed))
            .map(Id)
            .unwrap_or_else(|| panic!("task ids exhausted"))
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Makes `id` the current task id until dropped, then restores the previous
/// one. Held while a future is polled or dropped and while an output is
/// dropped.
pub(super) struct TaskIdGuard {
    previous: Option<Id>,
}

impl TaskIdGuard {
    pub(super) fn enter(id: Id) -> TaskIdGuard {
        TaskIdGuard {
            previous: context::set_current_task_id(Some(id)),
        }
    }
}

impl Drop for TaskIdGuard {
    fn drop(&mut self) {
        context::set_current_task_id(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::ExeOpt;
    use crate::task::{new_task, try_id};
    use crate::test_utils::DummyScheduler;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let mut seen = HashSet::new();

        for _ in 0..16 {
            let (job, join) = new_task(async { 42 }, DummyScheduler, ExeOpt::balance());
            assert_eq!(job.id(), join.id());
            assert!(seen.insert(job.id()));

            job.run();
            assert_eq!(join.get_result().ok(), Some(42));
        }
    }

    #[test]
    fn test_id_visible_inside_task() {
        assert!(try_id().is_none());

        let (job, join) = new_task(async { super::id() }, DummyScheduler, ExeOpt::balance());
        let expected = job.id();
        job.run();

        assert_eq!(join.get_result().ok(), Some(expected));
        assert!(try_id().is_none());
    }
}
