//! Free functions spawning onto the runtime of the calling thread.
//!
//! They read the scheduler handle installed by the executor, so they only work
//! from a thread running the runtime's jobs. Anywhere else, blocking pool
//! threads included, they panic.

use crate::context;
use crate::runtime::{ExeOpt, Handle};
use crate::task::{JoinError, JoinHandle};

#[track_caller]
fn current() -> Handle {
    match context::with_handle(Handle::clone) {
        Some(handle) => handle,
        None => panic!("must be called from within a jobring runtime"),
    }
}

/// Spawns a new task with the default [`ExeOpt`].
///
/// The task is lazy, nothing runs until a worker picks up its job.
///
/// ```
/// #[jobring::main(flavor = "inline")]
/// async fn main() {
///     let handle = jobring::spawn(async { 40 + 2 });
///     assert_eq!(handle.await.unwrap(), 42);
/// }
/// ```
#[track_caller]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    current().spawn_with(future, ExeOpt::default())
}

/// Spawns a new task with an explicit placement and priority.
#[track_caller]
pub fn spawn_with<F>(future: F, opts: ExeOpt) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    current().spawn_with(future, opts)
}

/// Spawns a task nobody will join. Its cell is freed as soon as it completes.
///
/// A panic in a detached task has no one to report to, it is logged instead.
#[track_caller]
pub fn spawn_detach<F>(future: F)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    spawn(future).detach();
}

/// Spawns every future in one batch. On a pool the batch is split evenly
/// across workers.
#[track_caller]
pub fn spawn_all<I, F>(futures: I, opts: ExeOpt) -> Vec<JoinHandle<F::Output>>
where
    I: IntoIterator<Item = F>,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    current().spawn_all(futures, opts)
}

/// Runs a synchronous closure on the blocking pool.
///
/// ```
/// #[jobring::main(flavor = "inline")]
/// async fn main() {
///     let sum = jobring::spawn_blocking(|| (1..=10).sum::<u32>()).await.unwrap();
///     assert_eq!(sum, 55);
/// }
/// ```
#[track_caller]
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    current().blocking().spawn(f)
}

/// Waits for every handle and returns their results in order.
pub async fn wait_all<T, I>(handles: I) -> Vec<Result<T, JoinError>>
where
    I: IntoIterator<Item = JoinHandle<T>>,
{
    futures::future::join_all(handles).await
}
