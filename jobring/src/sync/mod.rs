//! Asynchronous synchronization primitives built on the intrusive queues.
//!
//! Waiters are pushed onto an [`AtomicJobQueue`] and drained all at once,
//! never popped one by one. A waiter that gives up is flagged as abandoned
//! and skipped by the next drain.
//!
//! [`AtomicJobQueue`]: crate::queue::AtomicJobQueue

mod latch;
pub use latch::{Latch, Wait};

mod mutex;
pub use mutex::{Lock, Mutex, MutexGuard};

mod waiter;
