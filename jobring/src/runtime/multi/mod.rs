//! Executor running jobs on a fixed pool of worker threads.
//!
//! Every worker owns a mutex-protected queue and a reactor. Producers spread
//! jobs by probing queues with `try_lock` from a rotating start index, so no
//! global lock sits on the hot path. Affinity hints bypass the rotation.

pub(crate) mod scheduler;
pub(crate) use scheduler::Handle;

mod pool;

mod worker;
pub(crate) use worker::Worker;

#[cfg(test)]
mod tests;
