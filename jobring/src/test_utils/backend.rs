use crate::reactor::{Backend, Completion, IoError, OpKind, Unpark};
use crate::utils::CompletionFlags;
use io_uring::types::Timespec;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// Everything a [`MockBackend`] was asked to do.
#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// `(user_data, op name, has link timeout)` in preparation order.
    pub(crate) prepared: Vec<(u64, &'static str, bool)>,
    pub(crate) cancelled: Vec<u64>,

    /// Timeout of every `submit_and_wait` call.
    pub(crate) timeouts: Vec<Option<Duration>>,
    pub(crate) unparks: usize,

    /// Fails every `prepare` with `EINVAL` while set.
    pub(crate) fail_prepare: bool,

    /// Handed out by the next `submit_and_wait`.
    pub(crate) completions: Vec<Completion>,
}

/// Scriptable backend. Never blocks: `submit_and_wait` only records its
/// timeout and returns the completions queued with [`MockBackend::complete`].
#[derive(Debug, Clone, Default)]
pub(crate) struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }

    pub(crate) fn complete(&self, user_data: u64, result: i32, more: bool) {
        let flags = if more {
            CompletionFlags::MORE
        } else {
            CompletionFlags::empty()
        };

        self.state.lock().completions.push(Completion {
            user_data,
            result,
            flags,
        });
    }
}

struct MockUnpark(Arc<Mutex<MockState>>);

impl Unpark for MockUnpark {
    fn unpark(&self) {
        self.0.lock().unparks += 1;
    }
}

impl Backend for MockBackend {
    fn supports_io(&self) -> bool {
        true
    }

    fn prepare(
        &mut self,
        user_data: u64,
        op: &mut OpKind,
        link_timeout: Option<&Timespec>,
    ) -> Result<(), IoError> {
        let mut state = self.state.lock();
        if state.fail_prepare {
            return Err(IoError::Os {
                errno: libc::EINVAL,
            });
        }

        state
            .prepared
            .push((user_data, op.name(), link_timeout.is_some()));
        Ok(())
    }

    fn cancel(&mut self, user_data: u64) {
        self.state.lock().cancelled.push(user_data);
    }

    fn submit(&mut self) -> Result<(), IoError> {
        Ok(())
    }

    fn submit_and_wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Completion>,
    ) -> Result<(), IoError> {
        let mut state = self.state.lock();
        state.timeouts.push(timeout);
        out.append(&mut state.completions);
        Ok(())
    }

    fn unparker(&self) -> Arc<dyn Unpark> {
        Arc::new(MockUnpark(self.state.clone()))
    }
}
