use crate::io::{MultishotPayload, Op, OpPayload, OpStream};
use crate::reactor::{IoError, OpKind, OpToken};
use io_uring::types::Timespec;
use nix::sys::socket::{SockaddrLike, SockaddrStorage};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Completes immediately with result 0. Useful to measure reactor latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nop;

impl OpPayload for Nop {
    type Output = i32;

    fn into_op(self) -> OpKind {
        OpKind::Nop
    }

    fn into_output(result: Result<i32, IoError>, _op: OpKind) -> Result<i32, IoError> {
        result
    }
}

/// Receive up to `len` bytes from a socket.
#[derive(Debug, Clone)]
pub struct Recv {
    fd: RawFd,
    len: usize,
    flags: i32,
}

impl Recv {
    pub fn new(fd: RawFd, len: usize) -> Self {
        Self { fd, len, flags: 0 }
    }

    /// `MSG_*` flags passed to the kernel.
    pub fn flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }
}

impl OpPayload for Recv {
    type Output = Vec<u8>;

    fn into_op(self) -> OpKind {
        OpKind::Recv {
            fd: self.fd,
            buf: vec![0; self.len],
            flags: self.flags,
        }
    }

    fn into_output(result: Result<i32, IoError>, op: OpKind) -> Result<Vec<u8>, IoError> {
        let n = result?;
        match op {
            OpKind::Recv { mut buf, .. } => {
                buf.truncate(n as usize);
                Ok(buf)
            }
            other => unreachable!("recv resolved with {other:?}"),
        }
    }
}

/// Send a buffer on a socket. Resolves to the number of bytes sent.
#[derive(Debug, Clone)]
pub struct Send {
    fd: RawFd,
    buf: Vec<u8>,
    flags: i32,
}

impl Send {
    pub fn new(fd: RawFd, buf: impl Into<Vec<u8>>) -> Self {
        Self {
            fd,
            buf: buf.into(),
            flags: libc::MSG_NOSIGNAL,
        }
    }

    pub fn flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }
}

impl OpPayload for Send {
    type Output = usize;

    fn into_op(self) -> OpKind {
        OpKind::Send {
            fd: self.fd,
            buf: self.buf,
            flags: self.flags,
        }
    }

    fn into_output(result: Result<i32, IoError>, _op: OpKind) -> Result<usize, IoError> {
        Ok(result? as usize)
    }
}

/// Read up to `len` bytes at `offset`.
#[derive(Debug, Clone)]
pub struct Read {
    fd: RawFd,
    len: usize,
    offset: u64,
}

impl Read {
    pub fn new(fd: RawFd, len: usize, offset: u64) -> Self {
        Self { fd, len, offset }
    }
}

impl OpPayload for Read {
    type Output = Vec<u8>;

    fn into_op(self) -> OpKind {
        OpKind::Read {
            fd: self.fd,
            buf: vec![0; self.len],
            offset: self.offset,
        }
    }

    fn into_output(result: Result<i32, IoError>, op: OpKind) -> Result<Vec<u8>, IoError> {
        let n = result?;
        match op {
            OpKind::Read { mut buf, .. } => {
                buf.truncate(n as usize);
                Ok(buf)
            }
            other => unreachable!("read resolved with {other:?}"),
        }
    }
}

/// Write a buffer at `offset`. Resolves to the number of bytes written.
#[derive(Debug, Clone)]
pub struct Write {
    fd: RawFd,
    buf: Vec<u8>,
    offset: u64,
}

impl Write {
    pub fn new(fd: RawFd, buf: impl Into<Vec<u8>>, offset: u64) -> Self {
        Self {
            fd,
            buf: buf.into(),
            offset,
        }
    }
}

impl OpPayload for Write {
    type Output = usize;

    fn into_op(self) -> OpKind {
        OpKind::Write {
            fd: self.fd,
            buf: self.buf,
            offset: self.offset,
        }
    }

    fn into_output(result: Result<i32, IoError>, _op: OpKind) -> Result<usize, IoError> {
        Ok(result? as usize)
    }
}

/// Accept one connection, with the peer address when it is IPv4 or IPv6.
#[derive(Debug, Clone, Copy)]
pub struct Accept {
    fd: RawFd,
}

impl Accept {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl OpPayload for Accept {
    type Output = (OwnedFd, Option<SocketAddr>);

    fn into_op(self) -> OpKind {
        // SAFETY: sockaddr_storage is plain old data, all zeroes is valid.
        let storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        OpKind::Accept {
            fd: self.fd,
            addr: Box::new((storage, len)),
        }
    }

    fn into_output(result: Result<i32, IoError>, op: OpKind) -> Result<Self::Output, IoError> {
        let fd = result?;
        // SAFETY: a successful accept returns a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        match op {
            OpKind::Accept { addr, .. } => Ok((fd, to_socket_addr(&addr.0, addr.1))),
            other => unreachable!("accept resolved with {other:?}"),
        }
    }
}

fn to_socket_addr(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<SocketAddr> {
    // SAFETY: the kernel wrote `len` bytes of a valid address into `storage`.
    let addr = unsafe {
        SockaddrStorage::from_raw(
            (storage as *const libc::sockaddr_storage).cast(),
            Some(len),
        )
    }?;

    if let Some(v4) = addr.as_sockaddr_in() {
        return Some(SocketAddr::V4((*v4).into()));
    }
    addr.as_sockaddr_in6().map(|v6| SocketAddr::V6((*v6).into()))
}

/// Accept connections until cancelled, one descriptor per completion.
#[derive(Debug, Clone, Copy)]
pub struct AcceptMulti {
    fd: RawFd,
}

impl AcceptMulti {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl MultishotPayload for AcceptMulti {
    type Item = OwnedFd;

    fn into_op(self) -> OpKind {
        OpKind::AcceptMulti { fd: self.fd }
    }

    fn into_item(result: Result<i32, IoError>) -> Result<OwnedFd, IoError> {
        // SAFETY: each successful completion carries a fresh descriptor.
        result.map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

/// Connect a socket to `addr`.
#[derive(Debug, Clone, Copy)]
pub struct Connect {
    fd: RawFd,
    addr: SocketAddr,
}

impl Connect {
    pub fn new(fd: RawFd, addr: SocketAddr) -> Self {
        Self { fd, addr }
    }
}

impl OpPayload for Connect {
    type Output = ();

    fn into_op(self) -> OpKind {
        let addr = SockaddrStorage::from(self.addr);
        debug_assert!(addr.len() > 0);

        OpKind::Connect {
            fd: self.fd,
            addr: Box::new(addr),
        }
    }

    fn into_output(result: Result<i32, IoError>, _op: OpKind) -> Result<(), IoError> {
        result.map(|_| ())
    }
}

/// Kernel-side timeout. Resolves to `Ok(())` when it expires and to
/// [`IoError::Cancelled`] when removed first.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl OpPayload for Timeout {
    type Output = ();

    fn into_op(self) -> OpKind {
        OpKind::Timeout {
            ts: Box::new(Timespec::from(self.duration)),
        }
    }

    fn into_output(result: Result<i32, IoError>, _op: OpKind) -> Result<(), IoError> {
        match result {
            // Expiry completes with -ETIME.
            Ok(_) | Err(IoError::TimedOut) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Re-arms a pending [`Timeout`] to expire `duration` from now.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutUpdate {
    target: OpToken,
    duration: Duration,
}

impl TimeoutUpdate {
    pub fn new(target: OpToken, duration: Duration) -> Self {
        Self { target, duration }
    }
}

impl OpPayload for TimeoutUpdate {
    type Output = ();

    fn into_op(self) -> OpKind {
        OpKind::TimeoutUpdate {
            target: self.target.user_data(),
            ts: Box::new(Timespec::from(self.duration)),
        }
    }

    fn into_output(result: Result<i32, IoError>, _op: OpKind) -> Result<(), IoError> {
        result.map(|_| ())
    }
}

/// Removes a pending [`Timeout`]. The target then resolves to
/// [`IoError::Cancelled`].
#[derive(Debug, Clone, Copy)]
pub struct TimeoutRemove {
    target: OpToken,
}

impl TimeoutRemove {
    pub fn new(target: OpToken) -> Self {
        Self { target }
    }
}

impl OpPayload for TimeoutRemove {
    type Output = ();

    fn into_op(self) -> OpKind {
        OpKind::TimeoutRemove {
            target: self.target.user_data(),
        }
    }

    fn into_output(result: Result<i32, IoError>, _op: OpKind) -> Result<(), IoError> {
        result.map(|_| ())
    }
}

pub fn nop() -> Op<Nop> {
    Op::new(Nop)
}

pub fn recv(fd: &impl AsRawFd, len: usize) -> Op<Recv> {
    Op::new(Recv::new(fd.as_raw_fd(), len))
}

pub fn send(fd: &impl AsRawFd, buf: impl Into<Vec<u8>>) -> Op<Send> {
    Op::new(Send::new(fd.as_raw_fd(), buf))
}

pub fn read(fd: &impl AsRawFd, len: usize, offset: u64) -> Op<Read> {
    Op::new(Read::new(fd.as_raw_fd(), len, offset))
}

pub fn write(fd: &impl AsRawFd, buf: impl Into<Vec<u8>>, offset: u64) -> Op<Write> {
    Op::new(Write::new(fd.as_raw_fd(), buf, offset))
}

pub fn accept(fd: &impl AsRawFd) -> Op<Accept> {
    Op::new(Accept::new(fd.as_raw_fd()))
}

pub fn accept_multi(fd: &impl AsRawFd) -> OpStream<AcceptMulti> {
    OpStream::new(AcceptMulti::new(fd.as_raw_fd()))
}

pub fn connect(fd: &impl AsRawFd, addr: SocketAddr) -> Op<Connect> {
    Op::new(Connect::new(fd.as_raw_fd(), addr))
}

pub fn timeout(duration: Duration) -> Op<Timeout> {
    Op::new(Timeout::new(duration))
}

pub fn update_timeout(target: OpToken, duration: Duration) -> Op<TimeoutUpdate> {
    Op::new(TimeoutUpdate::new(target, duration))
}

pub fn remove_timeout(target: OpToken) -> Op<TimeoutRemove> {
    Op::new(TimeoutRemove::new(target))
}
