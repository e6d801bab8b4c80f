use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// Exports
pub(crate) mod backend;
pub(crate) use backend::MockBackend;

pub(crate) mod mocks;
pub(crate) use mocks::{DummyScheduler, guarded_waker, mock_waker};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`. Safe to call from
/// every test, only the first call wins.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts how many of its guards were dropped.
#[derive(Debug, Clone, Default)]
pub(crate) struct DropCounter(Arc<AtomicUsize>);

#[derive(Debug)]
pub(crate) struct DropGuard(Arc<AtomicUsize>);

impl DropCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn guard(&self) -> DropGuard {
        DropGuard(self.0.clone())
    }

    pub(crate) fn dropped(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
