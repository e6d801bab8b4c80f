//! Timers.
//!
//! Each reactor owns a [`TimerManager`] of wakers. [`Sleep`] registers with
//! the reactor of the thread that first polls it and is resumed by that
//! reactor's next turn past the deadline.

mod heap;
pub use heap::NaryHeap;

mod timer;
pub use timer::{TimerId, TimerManager};

mod sleep;
pub use sleep::{Sleep, sleep_for, sleep_until};

mod timeout;
pub use timeout::{Elapsed, Timeout, timeout};
