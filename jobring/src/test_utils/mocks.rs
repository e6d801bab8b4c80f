use crate::runtime::{ExeOpt, Schedule};
use crate::task::Job;
use crate::test_utils::DropGuard;
use futures::task::{ArcWake, waker};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Waker;

/// Scheduler that drops every job handed to it.
#[derive(Debug, Default, Copy, Clone)]
pub(crate) struct DummyScheduler;

impl Schedule for DummyScheduler {
    fn schedule(&self, _job: Job<Self>) {}

    fn schedule_with(&self, _job: Job<Self>, _opts: ExeOpt) {}
}

#[derive(Debug, Default)]
pub(crate) struct WakerData {
    wake_count: AtomicUsize,
}

impl WakerData {
    pub(crate) fn wake_count(&self) -> usize {
        self.wake_count.load(Ordering::SeqCst)
    }
}

impl ArcWake for WakerData {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wake_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Waker counting its wake-ups.
pub(crate) fn mock_waker() -> (Waker, Arc<WakerData>) {
    let data = Arc::new(WakerData::default());
    (waker(data.clone()), data)
}

struct Guarded(#[allow(dead_code)] DropGuard);

impl ArcWake for Guarded {
    fn wake_by_ref(_arc_self: &Arc<Self>) {}
}

/// No-op waker that drops `guard` along with its last clone.
pub(crate) fn guarded_waker(guard: DropGuard) -> Waker {
    waker(Arc::new(Guarded(guard)))
}
