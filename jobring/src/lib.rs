//! A completion-based async task runtime.
//!
//! Tasks are futures wrapped in reference-counted cells and scheduled as
//! jobs on one of two executors:
//! - an inline executor running every job on the thread that calls
//!   [`Runtime::block_on`],
//! - a pool of workers, each with its own run queue and its own reactor.
//!
//! Reactors turn io_uring completions, timers and cross-thread wake-ups into
//! task wake-ups. Synchronous work that must block goes to a separate
//! blocking pool.
//!
//! ```
//! use jobring::runtime::Builder;
//! use std::time::Duration;
//!
//! let rt = Builder::new_multi().worker_threads(2).try_build().unwrap();
//!
//! let sum = rt.block_on(async {
//!     let handles = (0..8u64).map(|i| {
//!         jobring::spawn(async move {
//!             jobring::time::sleep_for(Duration::from_millis(i)).await;
//!             i
//!         })
//!     });
//!     let handles = handles.collect::<Vec<_>>();
//!
//!     jobring::wait_all(handles)
//!         .await
//!         .into_iter()
//!         .map(Result::unwrap)
//!         .sum::<u64>()
//! });
//!
//! assert_eq!(sum, 28);
//! ```

#[doc(inline)]
pub use jobring_macros::main;

#[doc(inline)]
pub use jobring_macros::test;

mod context;
pub use context::current_worker_index;

pub mod io;

mod queue;

mod reactor;
pub use reactor::IoError;
pub use reactor::backend::BackendKind;

pub mod runtime;
pub use runtime::{
    Builder, ExeOpt, Placement, Priority, Runtime, spawn, spawn_all, spawn_blocking,
    spawn_detach, spawn_with, wait_all,
};

pub mod sync;

pub mod task;

pub mod time;

mod utils;

#[cfg(test)]
mod test_utils;
