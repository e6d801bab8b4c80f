use crate::reactor::IoError;
use crate::reactor::backend::{
    Backend, CANCEL_USER_DATA, Completion, LINK_TIMEOUT_USER_DATA, NOTIFY_USER_DATA, OpKind,
    Unpark,
};
use anyhow::{Context, Result};
use io_uring::squeue::{Entry, Flags};
use io_uring::types::{Fd, SubmitArgs, Timespec};
use io_uring::{IoUring, cqueue, opcode};
use nix::sys::socket::{SockaddrLike, SockaddrStorage};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

/// io_uring backed completion queue.
///
/// Cross-thread wake-ups go through an `eventfd` watched by a multishot
/// `PollAdd`, so a blocked `io_uring_enter` returns as soon as a producer
/// writes to it.
pub(crate) struct UringBackend {
    ring: IoUring,
    notify: Arc<EventFd>,
    notify_armed: bool,
}

#[derive(Debug)]
struct EventFd(OwnedFd);

impl EventFd {
    fn try_new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(EventFd(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Resets the counter. `EAGAIN` just means somebody drained it already.
    fn drain(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(
                self.0.as_raw_fd(),
                (&mut buf as *mut u64).cast(),
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl Unpark for EventFd {
    fn unpark(&self) {
        let one = 1u64;
        let ret = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                (&one as *const u64).cast(),
                std::mem::size_of::<u64>(),
            )
        };

        // EAGAIN means the counter is saturated, the reader wakes anyway.
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EAGAIN) {
                tracing::error!(error = %err, "failed to signal reactor eventfd");
            }
        }
    }
}

impl UringBackend {
    pub(crate) fn try_new(sq_ring_size: u32) -> Result<Self> {
        // Reactors are built on the runtime's thread and then moved to their
        // worker, which rules out SINGLE_ISSUER.
        let ring = IoUring::builder()
            .setup_submit_all()
            .build(sq_ring_size)
            .context("failed to set up io_uring")?;

        if !ring.params().is_feature_ext_arg() {
            anyhow::bail!("io_uring lacks IORING_FEAT_EXT_ARG, timed waits are unavailable");
        }

        if !ring.params().is_feature_nodrop() {
            tracing::warn!("IORING_FEAT_NODROP missing, completions can be lost on CQ overflow");
        }

        let notify = EventFd::try_new().context("failed to create eventfd")?;

        Ok(Self {
            ring,
            notify: Arc::new(notify),
            notify_armed: false,
        })
    }

    /// Pushes every entry or none of them.
    fn push_all(&mut self, entries: &[Entry]) -> Result<(), IoError> {
        if self.free_slots() < entries.len() {
            // Make room by handing what we have to the kernel.
            self.ring.submit()?;
        }

        if self.free_slots() < entries.len() {
            return Err(IoError::SubmissionQueueFull);
        }

        unsafe { self.ring.submission().push_multiple(entries)? };
        Ok(())
    }

    fn free_slots(&mut self) -> usize {
        let sq = self.ring.submission();
        sq.capacity() - sq.len()
    }

    fn arm_notify(&mut self) -> Result<(), IoError> {
        let entry = opcode::PollAdd::new(Fd(self.notify.0.as_raw_fd()), libc::POLLIN as u32)
            .multi(true)
            .build()
            .user_data(NOTIFY_USER_DATA);

        self.push_all(&[entry])?;
        self.notify_armed = true;
        Ok(())
    }

    fn build_entry(op: &mut OpKind) -> Entry {
        match op {
            OpKind::Nop => opcode::Nop::new().build(),
            OpKind::Recv { fd, buf, flags } => {
                opcode::Recv::new(Fd(*fd), buf.as_mut_ptr(), buf.len() as u32)
                    .flags(*flags)
                    .build()
            }
            OpKind::Send { fd, buf, flags } => {
                opcode::Send::new(Fd(*fd), buf.as_ptr(), buf.len() as u32)
                    .flags(*flags)
                    .build()
            }
            OpKind::Accept { fd, addr } => {
                let (storage, len) = &mut **addr;
                opcode::Accept::new(
                    Fd(*fd),
                    (storage as *mut libc::sockaddr_storage).cast(),
                    len as *mut libc::socklen_t,
                )
                .flags(libc::SOCK_CLOEXEC)
                .build()
            }
            OpKind::AcceptMulti { fd } => opcode::AcceptMulti::new(Fd(*fd)).build(),
            OpKind::Connect { fd, addr } => {
                let addr: &SockaddrStorage = addr;
                opcode::Connect::new(Fd(*fd), SockaddrLike::as_ptr(addr), SockaddrLike::len(addr))
                    .build()
            }
            OpKind::Read { fd, buf, offset } => {
                opcode::Read::new(Fd(*fd), buf.as_mut_ptr(), buf.len() as u32)
                    .offset(*offset)
                    .build()
            }
            OpKind::Write { fd, buf, offset } => {
                opcode::Write::new(Fd(*fd), buf.as_ptr(), buf.len() as u32)
                    .offset(*offset)
                    .build()
            }
            OpKind::Timeout { ts } => opcode::Timeout::new(&**ts as *const Timespec).build(),
            OpKind::TimeoutUpdate { target, ts } => {
                opcode::TimeoutUpdate::new(*target, &**ts as *const Timespec).build()
            }
            OpKind::TimeoutRemove { target } => opcode::TimeoutRemove::new(*target).build(),
        }
    }

    fn drain_cq(&mut self, out: &mut Vec<Completion>) {
        let mut rearm = false;

        for cqe in self.ring.completion() {
            match cqe.user_data() {
                NOTIFY_USER_DATA => {
                    self.notify.drain();
                    if !cqueue::more(cqe.flags()) {
                        rearm = true;
                    }
                }
                LINK_TIMEOUT_USER_DATA | CANCEL_USER_DATA => {}
                user_data => out.push(Completion {
                    user_data,
                    result: cqe.result(),
                    flags: cqe.flags().into(),
                }),
            }
        }

        if rearm {
            self.notify_armed = false;
        }
    }
}

impl Backend for UringBackend {
    fn supports_io(&self) -> bool {
        true
    }

    fn prepare(
        &mut self,
        user_data: u64,
        op: &mut OpKind,
        link_timeout: Option<&Timespec>,
    ) -> Result<(), IoError> {
        let entry = Self::build_entry(op).user_data(user_data);

        match link_timeout {
            None => self.push_all(&[entry]),
            Some(ts) => {
                let timeout = opcode::LinkTimeout::new(ts as *const Timespec)
                    .build()
                    .user_data(LINK_TIMEOUT_USER_DATA);
                self.push_all(&[entry.flags(Flags::IO_LINK), timeout])
            }
        }
    }

    fn cancel(&mut self, user_data: u64) {
        let entry = opcode::AsyncCancel::new(user_data)
            .build()
            .user_data(CANCEL_USER_DATA);

        if let Err(e) = self.push_all(&[entry]) {
            tracing::warn!(user_data, error = %e, "failed to stage cancellation");
        }
    }

    fn submit(&mut self) -> Result<(), IoError> {
        match self.ring.submit() {
            Ok(_) => Ok(()),
            // CQ overflow, the next drain makes room.
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn submit_and_wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<Completion>,
    ) -> Result<(), IoError> {
        if !self.notify_armed {
            self.arm_notify()?;
        }

        let res = match timeout {
            Some(dur) if dur.is_zero() => self.ring.submit(),
            Some(dur) => {
                let ts = Timespec::from(dur);
                let args = SubmitArgs::new().timespec(&ts);
                self.ring.submitter().submit_with_args(1, &args)
            }
            None => self.ring.submit_and_wait(1),
        };

        match res {
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::ETIME | libc::EINTR | libc::EBUSY)
                ) => {}
            Err(e) => return Err(e.into()),
        }

        self.drain_cq(out);
        Ok(())
    }

    fn unparker(&self) -> Arc<dyn Unpark> {
        self.notify.clone()
    }
}
