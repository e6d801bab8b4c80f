use io_uring::squeue::PushError;
use std::io;

/// Errors surfaced by I/O operations and the reactor.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// The kernel completed the operation with a negative result.
    #[error("OS error {errno}: {}", describe_errno(.errno))]
    Os { errno: i32 },

    /// A linked timeout fired before the operation completed.
    #[error("operation timed out")]
    TimedOut,

    /// The operation was cancelled before it completed.
    #[error("operation was cancelled")]
    Cancelled,

    /// The reactor backend cannot run this operation.
    #[error("operation not supported by the reactor backend")]
    Unsupported,

    /// Called from a thread that does not drive a reactor.
    #[error("no reactor on this thread, must be called from within a jobring runtime")]
    NoReactor,

    /// The submission queue has no room, even after flushing it.
    #[error("submission queue is full")]
    SubmissionQueueFull,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe_errno(errno: &i32) -> io::Error {
    io::Error::from_raw_os_error(*errno)
}

impl IoError {
    pub(crate) fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ECANCELED => IoError::Cancelled,
            libc::ETIME | libc::ETIMEDOUT => IoError::TimedOut,
            errno => IoError::Os { errno },
        }
    }

    /// The raw errno, when the kernel produced one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            IoError::Os { errno } => Some(*errno),
            IoError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            IoError::SubmissionQueueFull => true,
            _ => self
                .raw_os_error()
                .is_some_and(|errno| matches!(errno, libc::EAGAIN | libc::EINTR)),
        }
    }
}

impl From<PushError> for IoError {
    fn from(_: PushError) -> Self {
        IoError::SubmissionQueueFull
    }
}

impl From<IoError> for io::Error {
    fn from(err: IoError) -> io::Error {
        match err {
            IoError::Os { errno } => io::Error::from_raw_os_error(errno),
            IoError::Io(e) => e,
            IoError::TimedOut => io::Error::new(io::ErrorKind::TimedOut, err),
            IoError::Unsupported => io::Error::new(io::ErrorKind::Unsupported, err),
            err => io::Error::other(err),
        }
    }
}
