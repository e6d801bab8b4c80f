//! Asynchronous operations driven by the current thread's reactor.
//!
//! Every operation is staged on creation and resolves once its completion is
//! observed. Buffers move into the reactor for the lifetime of the
//! operation, so dropping an [`Op`] early is always safe: the operation is
//! cancelled and its buffers are released when the kernel is done with them.
//!
//! File descriptors are passed by value and must stay open until the
//! operation resolves.

mod ops;
pub use ops::{
    Accept, AcceptMulti, Connect, Nop, Read, Recv, Send, Timeout, TimeoutRemove, TimeoutUpdate,
    Write, accept, accept_multi, connect, nop, read, recv, remove_timeout, send, timeout,
    update_timeout, write,
};

pub use crate::reactor::{IoError, OpToken};

use crate::context;
use crate::reactor::{OpKind, ReactorHandle};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Parameters of one operation and the decoding of its result.
pub trait OpPayload {
    type Output;

    /// Moves the parameters, buffers included, into reactor-owned storage.
    #[doc(hidden)]
    fn into_op(self) -> OpKind;

    /// Decodes the completion. `op` hands the buffers back.
    #[doc(hidden)]
    fn into_output(result: Result<i32, IoError>, op: OpKind) -> Result<Self::Output, IoError>;
}

enum State {
    Staged {
        reactor: ReactorHandle,
        token: OpToken,
    },
    Failed(IoError),
    Done,
}

fn stage_on_current(op: OpKind, link_timeout: Option<Duration>) -> State {
    match context::current_reactor() {
        Some(reactor) => stage_on(reactor, op, link_timeout),
        None => State::Failed(IoError::NoReactor),
    }
}

fn stage_on(reactor: ReactorHandle, op: OpKind, link_timeout: Option<Duration>) -> State {
    match reactor.stage(op, link_timeout) {
        Ok(token) => State::Staged { reactor, token },
        Err(e) => State::Failed(e),
    }
}

/// A single-shot operation. Resolves to the payload's output.
#[must_use = "operations are cancelled when dropped"]
pub struct Op<P: OpPayload> {
    state: State,
    _p: PhantomData<fn() -> P>,
}

impl<P: OpPayload> Op<P> {
    /// Stages `payload` on the current thread's reactor.
    pub fn new(payload: P) -> Self {
        Self::from_state(stage_on_current(payload.into_op(), None))
    }

    /// Stages `payload` with a linked timeout. The operation resolves to
    /// [`IoError::TimedOut`] if it does not complete within `timeout`.
    pub fn with_link_timeout(payload: P, timeout: Duration) -> Self {
        Self::from_state(stage_on_current(payload.into_op(), Some(timeout)))
    }

    pub(crate) fn new_in(reactor: &ReactorHandle, payload: P, link_timeout: Option<Duration>) -> Self {
        Self::from_state(stage_on(reactor.clone(), payload.into_op(), link_timeout))
    }

    fn from_state(state: State) -> Self {
        Self {
            state,
            _p: PhantomData,
        }
    }

    /// Token of the staged operation, `None` if staging failed or the
    /// operation already resolved.
    pub fn token(&self) -> Option<OpToken> {
        match &self.state {
            State::Staged { token, .. } => Some(*token),
            _ => None,
        }
    }

    /// Cancels the operation. Returns false when it had already completed,
    /// in which case awaiting still yields its result.
    pub fn cancel(&self) -> bool {
        match &self.state {
            State::Staged { reactor, token } => reactor.cancel_op(*token),
            _ => false,
        }
    }
}

impl<P: OpPayload> Future for Op<P> {
    type Output = Result<P::Output, IoError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &this.state {
            State::Staged { reactor, token } => match reactor.poll_op(*token, cx) {
                Poll::Ready(resolved) => {
                    this.state = State::Done;
                    Poll::Ready(P::into_output(resolved.result, resolved.op))
                }
                Poll::Pending => Poll::Pending,
            },
            State::Failed(_) => match std::mem::replace(&mut this.state, State::Done) {
                State::Failed(e) => Poll::Ready(Err(e)),
                _ => unreachable!(),
            },
            State::Done => panic!("`Op` polled after completion"),
        }
    }
}

impl<P: OpPayload> Drop for Op<P> {
    fn drop(&mut self) {
        if let State::Staged { reactor, token } = &self.state {
            if !reactor.cancel_op(*token) {
                // Completed but never observed.
                reactor.remove_op(*token);
            }
        }
    }
}

impl<P: OpPayload> fmt::Debug for Op<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("payload", &std::any::type_name::<P>())
            .field("token", &self.token())
            .finish()
    }
}

/// Decoding of each result of a multishot operation.
pub trait MultishotPayload {
    type Item;

    #[doc(hidden)]
    fn into_op(self) -> OpKind;

    #[doc(hidden)]
    fn into_item(result: Result<i32, IoError>) -> Result<Self::Item, IoError>;
}

/// A multishot operation, yielding one item per completion.
///
/// The stream ends after the kernel's final completion. The last item is
/// usually the error that terminated the registration.
#[must_use = "streams do nothing unless polled"]
pub struct OpStream<P: MultishotPayload> {
    state: State,
    _p: PhantomData<fn() -> P>,
}

impl<P: MultishotPayload> OpStream<P> {
    pub fn new(payload: P) -> Self {
        Self {
            state: stage_on_current(payload.into_op(), None),
            _p: PhantomData,
        }
    }

    pub(crate) fn new_in(reactor: &ReactorHandle, payload: P) -> Self {
        Self {
            state: stage_on(reactor.clone(), payload.into_op(), None),
            _p: PhantomData,
        }
    }

    pub fn token(&self) -> Option<OpToken> {
        match &self.state {
            State::Staged { token, .. } => Some(*token),
            _ => None,
        }
    }
}

impl<P: MultishotPayload> Stream for OpStream<P> {
    type Item = Result<P::Item, IoError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match &this.state {
            State::Staged { reactor, token } => match reactor.poll_next_op(*token, cx) {
                Poll::Ready((result, last)) => {
                    if last {
                        this.state = State::Done;
                    }
                    Poll::Ready(Some(P::into_item(result)))
                }
                Poll::Pending => Poll::Pending,
            },
            State::Failed(_) => match std::mem::replace(&mut this.state, State::Done) {
                State::Failed(e) => Poll::Ready(Some(Err(e))),
                _ => unreachable!(),
            },
            State::Done => Poll::Ready(None),
        }
    }
}

impl<P: MultishotPayload> Drop for OpStream<P> {
    fn drop(&mut self) {
        if let State::Staged { reactor, token } = &self.state {
            if !reactor.cancel_op(*token) {
                reactor.remove_op(*token);
            }
        }
    }
}

impl<P: MultishotPayload> fmt::Debug for OpStream<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpStream")
            .field("payload", &std::any::type_name::<P>())
            .field("token", &self.token())
            .finish()
    }
}
