//! Executor running every job on the thread blocked in `block_on`.
//!
//! Jobs may be scheduled from any thread: the queue sits behind a mutex and
//! foreign producers notify the reactor.

pub(crate) mod scheduler;
pub(crate) use scheduler::Handle;

mod worker;

#[cfg(test)]
mod tests;
