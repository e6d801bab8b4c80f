use crate::reactor::IoError;
use crate::utils::CompletionFlags;
use anyhow::Result;
use io_uring::types::Timespec;
use nix::sys::socket::SockaddrStorage;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// user_data of the cross-thread notify registration.
pub(crate) const NOTIFY_USER_DATA: u64 = u64::MAX;

/// user_data of linked timeout entries, their CQEs are not routed.
pub(crate) const LINK_TIMEOUT_USER_DATA: u64 = u64::MAX - 1;

/// user_data of cancellation requests.
pub(crate) const CANCEL_USER_DATA: u64 = u64::MAX - 2;

/// Which completion backend a reactor drives.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// io_uring when the kernel allows it, the park backend otherwise.
    #[default]
    Auto,

    /// io_uring, failing to build the runtime if unavailable.
    Uring,

    /// Timers and cross-thread wake-ups only. I/O operations fail with
    /// [`IoError::Unsupported`].
    Park,
}

/// One completion record handed back by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    pub(crate) user_data: u64,

    /// Negative errno on failure, byte count or fd otherwise.
    pub(crate) result: i32,

    pub(crate) flags: CompletionFlags,
}

impl Completion {
    /// Multishot registrations keep producing completions while MORE is set.
    pub(crate) fn is_final(&self) -> bool {
        !self.flags.contains(CompletionFlags::MORE)
    }
}

/// Parameters of a staged operation. Buffers live on the heap so the
/// pointers handed to the kernel survive moves of the owning entry.
#[doc(hidden)]
pub enum OpKind {
    Nop,
    Recv {
        fd: RawFd,
        buf: Vec<u8>,
        flags: i32,
    },
    Send {
        fd: RawFd,
        buf: Vec<u8>,
        flags: i32,
    },
    Accept {
        fd: RawFd,
        addr: Box<(libc::sockaddr_storage, libc::socklen_t)>,
    },
    AcceptMulti {
        fd: RawFd,
    },
    Connect {
        fd: RawFd,
        addr: Box<SockaddrStorage>,
    },
    Read {
        fd: RawFd,
        buf: Vec<u8>,
        offset: u64,
    },
    Write {
        fd: RawFd,
        buf: Vec<u8>,
        offset: u64,
    },
    Timeout {
        ts: Box<Timespec>,
    },
    TimeoutUpdate {
        target: u64,
        ts: Box<Timespec>,
    },
    TimeoutRemove {
        target: u64,
    },
}

impl OpKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            OpKind::Nop => "nop",
            OpKind::Recv { .. } => "recv",
            OpKind::Send { .. } => "send",
            OpKind::Accept { .. } => "accept",
            OpKind::AcceptMulti { .. } => "accept_multi",
            OpKind::Connect { .. } => "connect",
            OpKind::Read { .. } => "read",
            OpKind::Write { .. } => "write",
            OpKind::Timeout { .. } => "timeout",
            OpKind::TimeoutUpdate { .. } => "timeout_update",
            OpKind::TimeoutRemove { .. } => "timeout_remove",
        }
    }

    pub(crate) fn is_multishot(&self) -> bool {
        matches!(self, OpKind::AcceptMulti { .. })
    }
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wakes a thread blocked in [`Backend::submit_and_wait`].
pub(crate) trait Unpark: Send + Sync + 'static {
    fn unpark(&self);
}

/// The completion-queue substrate a reactor drives.
///
/// Every method is called from the thread driving the reactor; only the
/// [`Unpark`] handle crosses threads.
pub(crate) trait Backend: Send + 'static {
    /// True when I/O operations can be staged at all.
    fn supports_io(&self) -> bool;

    /// Stages one operation tagged with `user_data`, followed by a linked
    /// timeout when one is given. Nothing is submitted yet.
    fn prepare(
        &mut self,
        user_data: u64,
        op: &mut OpKind,
        link_timeout: Option<&Timespec>,
    ) -> Result<(), IoError>;

    /// Best-effort asynchronous cancellation of `user_data`.
    fn cancel(&mut self, user_data: u64);

    /// Flushes staged operations without waiting.
    fn submit(&mut self) -> Result<(), IoError>;

    /// Flushes staged operations and blocks until a completion arrives, the
    /// timeout expires or the unparker fires. `None` waits forever.
    fn submit_and_wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Completion>,
    ) -> Result<(), IoError>;

    fn unparker(&self) -> Arc<dyn Unpark>;
}

/// Builds the backend for `kind`, falling back from io_uring to parking when
/// `kind` allows it.
pub(crate) fn build(kind: BackendKind, sq_ring_size: u32) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Park => Ok(Box::new(super::park::ParkBackend::new())),
        BackendKind::Uring => Ok(Box::new(super::uring::UringBackend::try_new(sq_ring_size)?)),
        BackendKind::Auto => match super::uring::UringBackend::try_new(sq_ring_size) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(e) => {
                tracing::warn!(error = %e, "io_uring unavailable, falling back to park backend");
                Ok(Box::new(super::park::ParkBackend::new()))
            }
        },
    }
}
