use crate::reactor::IoError;
use crate::reactor::backend::{Backend, Completion, OpKind, Unpark};
use io_uring::types::Timespec;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Backend without a kernel queue: timers and wake-ups only.
#[derive(Debug)]
pub(crate) struct ParkBackend {
    parker: Arc<Parker>,
}

#[derive(Debug, Default)]
struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl ParkBackend {
    pub(crate) fn new() -> Self {
        Self {
            parker: Arc::new(Parker::default()),
        }
    }
}

impl Unpark for Parker {
    fn unpark(&self) {
        *self.notified.lock() = true;
        self.condvar.notify_one();
    }
}

impl Backend for ParkBackend {
    fn supports_io(&self) -> bool {
        false
    }

    fn prepare(
        &mut self,
        _user_data: u64,
        _op: &mut OpKind,
        _link_timeout: Option<&Timespec>,
    ) -> Result<(), IoError> {
        Err(IoError::Unsupported)
    }

    fn cancel(&mut self, _user_data: u64) {}

    fn submit(&mut self) -> Result<(), IoError> {
        Ok(())
    }

    fn submit_and_wait(
        &mut self,
        timeout: Option<Duration>,
        _out: &mut Vec<Completion>,
    ) -> Result<(), IoError> {
        let mut notified = self.parker.notified.lock();

        if !*notified {
            match timeout {
                Some(dur) if dur.is_zero() => {}
                Some(dur) => {
                    let deadline = Instant::now() + dur;
                    while !*notified {
                        if self
                            .parker
                            .condvar
                            .wait_until(&mut notified, deadline)
                            .timed_out()
                        {
                            break;
                        }
                    }
                }
                None => {
                    while !*notified {
                        self.parker.condvar.wait(&mut notified);
                    }
                }
            }
        }

        *notified = false;
        Ok(())
    }

    fn unparker(&self) -> Arc<dyn Unpark> {
        self.parker.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_times_out() {
        let mut backend = ParkBackend::new();
        let start = Instant::now();
        backend
            .submit_and_wait(Some(Duration::from_millis(20)), &mut Vec::new())
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_unpark_before_wait_is_sticky() {
        let mut backend = ParkBackend::new();
        backend.unparker().unpark();

        let start = Instant::now();
        backend.submit_and_wait(None, &mut Vec::new()).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_unpark_from_other_thread() {
        let mut backend = ParkBackend::new();
        let unparker = backend.unparker();

        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            unparker.unpark();
        });

        backend.submit_and_wait(None, &mut Vec::new()).unwrap();
        t.join().unwrap();
    }

    #[test]
    fn test_io_unsupported() {
        let mut backend = ParkBackend::new();
        let res = backend.prepare(1, &mut OpKind::Nop, None);
        assert!(matches!(res, Err(IoError::Unsupported)));
    }
}
