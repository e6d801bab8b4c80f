use crate::reactor::IoError;
use crate::reactor::backend::OpKind;
use io_uring::types::Timespec;
use slab::Slab;
use std::collections::VecDeque;
use std::fmt;
use std::task::{Poll, Waker};

/// Generations wrap before reaching the reserved user_data range.
const MAX_GENERATION: u32 = u32::MAX - 4;

/// Typed handle to one registered operation.
///
/// Encoded as the 64-bit user_data carried through the kernel: generation in
/// the high half, slab index in the low half. A token whose generation no
/// longer matches its slot is stale and resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpToken {
    index: u32,
    generation: u32,
}

impl OpToken {
    pub(crate) fn user_data(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub(crate) fn from_user_data(user_data: u64) -> Self {
        OpToken {
            index: user_data as u32,
            generation: (user_data >> 32) as u32,
        }
    }
}

impl fmt::Display for OpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

enum State {
    /// In flight, resumes the waker on completion.
    Waiting(Option<Waker>),

    /// Final result is in, waiting for the owner to collect it.
    Completed(i32),

    /// Never reached the kernel.
    Failed(IoError),

    /// Cancelled or dropped by the owner. Kept until the kernel is done with
    /// the buffers.
    Ignored,
}

struct Entry {
    generation: u32,
    state: State,
    op: OpKind,
    link_timeout: Option<Box<Timespec>>,
    submitted: bool,

    /// Results of multishot completions flagged MORE.
    more: VecDeque<i32>,
}

/// What a completion did to its operation.
#[derive(Debug)]
pub(crate) enum CompleteOutcome {
    /// The owner gets resumed. `None` when it has not polled yet.
    Resumed(Option<Waker>),

    /// Stale token or cancelled owner, nothing to resume.
    Dropped,
}

/// What a cancellation did to its operation.
#[derive(Debug)]
pub(crate) enum CancelOutcome {
    /// The cancellation won the race, the completion will be dropped.
    Won {
        /// The kernel holds the operation and must be asked to cancel it.
        needs_backend: bool,

        /// The owner's waker, to drop once locks are released.
        waker: Option<Waker>,
    },

    /// The operation had already completed, or the token is stale.
    Lost,
}

/// Result of an operation collected by its owner.
pub(crate) struct Resolved {
    pub(crate) result: Result<i32, IoError>,
    pub(crate) op: OpKind,
}

/// Bookkeeping for every operation the reactor has staged or submitted.
///
/// The entry, not the waiting task, is the authority on whether an operation
/// is still alive: completion and cancellation both go through it, so exactly
/// one of them resumes the owner.
#[derive(Default)]
pub(crate) struct PendingSet {
    slab: Slab<Entry>,
    generation: u32,
}

impl PendingSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    pub(crate) fn insert(&mut self, op: OpKind, link_timeout: Option<Timespec>) -> OpToken {
        self.generation = (self.generation + 1) % MAX_GENERATION;

        let entry = self.slab.vacant_entry();
        let index = u32::try_from(entry.key()).expect("pending set exceeded u32::MAX entries");

        entry.insert(Entry {
            generation: self.generation,
            state: State::Waiting(None),
            op,
            link_timeout: link_timeout.map(Box::new),
            submitted: false,
            more: VecDeque::new(),
        });

        OpToken {
            index,
            generation: self.generation,
        }
    }

    fn get_mut(&mut self, token: OpToken) -> Option<&mut Entry> {
        self.slab
            .get_mut(token.index as usize)
            .filter(|entry| entry.generation == token.generation)
    }

    fn take(&mut self, token: OpToken) -> Option<Entry> {
        self.get_mut(token)?;
        Some(self.slab.remove(token.index as usize))
    }

    /// Hands a staged operation to `prepare`. A failure resolves the
    /// operation with the error and returns the waker to resume.
    pub(crate) fn submit_with<F>(&mut self, token: OpToken, prepare: F) -> Option<Waker>
    where
        F: FnOnce(u64, &mut OpKind, Option<&Timespec>) -> Result<(), IoError>,
    {
        let entry = self.get_mut(token)?;

        if entry.submitted {
            return None;
        }

        match &mut entry.state {
            State::Waiting(waker) => {
                let res = prepare(
                    token.user_data(),
                    &mut entry.op,
                    entry.link_timeout.as_deref(),
                );

                match res {
                    Ok(()) => {
                        entry.submitted = true;
                        None
                    }
                    Err(err) => {
                        let waker = waker.take();
                        entry.state = State::Failed(err);
                        waker
                    }
                }
            }
            _ => None,
        }
    }

    /// Routes one completion to its operation.
    pub(crate) fn complete(&mut self, token: OpToken, result: i32, is_final: bool) -> CompleteOutcome {
        let Some(entry) = self.get_mut(token) else {
            return CompleteOutcome::Dropped;
        };

        match &mut entry.state {
            State::Waiting(waker) if !is_final => {
                entry.more.push_back(result);
                CompleteOutcome::Resumed(waker.clone())
            }
            State::Waiting(waker) => {
                let waker = waker.take();
                entry.state = State::Completed(result);
                CompleteOutcome::Resumed(waker)
            }
            State::Ignored => {
                if is_final {
                    self.slab.remove(token.index as usize);
                }
                CompleteOutcome::Dropped
            }
            State::Completed(_) | State::Failed(_) => {
                tracing::warn!(%token, result, "completion for an already resolved operation");
                CompleteOutcome::Dropped
            }
        }
    }

    /// Collects the final result of a single-shot operation, or registers
    /// `waker` to be resumed once it arrives.
    pub(crate) fn poll(&mut self, token: OpToken, waker: &Waker) -> Poll<Resolved> {
        let Some(entry) = self.get_mut(token) else {
            return Poll::Ready(Resolved {
                result: Err(IoError::Cancelled),
                op: OpKind::Nop,
            });
        };

        if let State::Waiting(slot) = &mut entry.state {
            if !slot.as_ref().is_some_and(|w| w.will_wake(waker)) {
                *slot = Some(waker.clone());
            }
            return Poll::Pending;
        }

        // The kernel still owns a cancelled entry, its final completion
        // frees it.
        if let State::Ignored = entry.state {
            return Poll::Ready(Resolved {
                result: Err(IoError::Cancelled),
                op: OpKind::Nop,
            });
        }

        let entry = self.slab.remove(token.index as usize);
        let linked = entry.link_timeout.is_some();

        let result = match entry.state {
            State::Completed(res) => decode(res, linked),
            State::Failed(err) => Err(err),
            State::Ignored | State::Waiting(_) => Err(IoError::Cancelled),
        };

        Poll::Ready(Resolved {
            result,
            op: entry.op,
        })
    }

    /// Collects the next result of a multishot operation. The flag is true
    /// for the last one.
    pub(crate) fn poll_next(&mut self, token: OpToken, waker: &Waker) -> Poll<(Result<i32, IoError>, bool)> {
        let Some(entry) = self.get_mut(token) else {
            return Poll::Ready((Err(IoError::Cancelled), true));
        };

        if let Some(res) = entry.more.pop_front() {
            return Poll::Ready((decode(res, false), false));
        }

        if let State::Waiting(slot) = &mut entry.state {
            if !slot.as_ref().is_some_and(|w| w.will_wake(waker)) {
                *slot = Some(waker.clone());
            }
            return Poll::Pending;
        }

        match self.poll(token, waker) {
            Poll::Ready(resolved) => Poll::Ready((resolved.result, true)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Cancels an operation on behalf of its owner.
    pub(crate) fn cancel(&mut self, token: OpToken) -> CancelOutcome {
        let Some(entry) = self.get_mut(token) else {
            return CancelOutcome::Lost;
        };

        match &mut entry.state {
            State::Waiting(_) if !entry.submitted => {
                let entry = self.slab.remove(token.index as usize);
                let waker = match entry.state {
                    State::Waiting(waker) => waker,
                    _ => None,
                };

                CancelOutcome::Won {
                    needs_backend: false,
                    waker,
                }
            }
            State::Waiting(waker) => {
                let waker = waker.take();
                entry.state = State::Ignored;

                CancelOutcome::Won {
                    needs_backend: true,
                    waker,
                }
            }
            // The result stays for the owner to collect or remove.
            State::Completed(_) | State::Failed(_) | State::Ignored => CancelOutcome::Lost,
        }
    }

    /// Forgets an operation. Idempotent: stale tokens are ignored and entries
    /// the kernel still owns are only marked ignored. Returns the owner's
    /// waker, if any, for dropping outside locks.
    pub(crate) fn remove(&mut self, token: OpToken) -> Option<Waker> {
        let entry = self.get_mut(token)?;

        match entry.state {
            State::Ignored => return None,
            State::Waiting(_) if entry.submitted => {
                return match std::mem::replace(&mut entry.state, State::Ignored) {
                    State::Waiting(waker) => waker,
                    _ => None,
                };
            }
            _ => {}
        }

        match self.take(token)?.state {
            State::Waiting(waker) => waker,
            _ => None,
        }
    }

    /// Takes every registered waker, leaving entries to be freed with the set.
    pub(crate) fn take_wakers(&mut self) -> Vec<Waker> {
        self.slab
            .iter_mut()
            .filter_map(|(_, entry)| match &mut entry.state {
                State::Waiting(waker) => waker.take(),
                _ => None,
            })
            .collect()
    }
}

fn decode(res: i32, linked: bool) -> Result<i32, IoError> {
    match res {
        res if res >= 0 => Ok(res),
        res if linked && -res == libc::ECANCELED => Err(IoError::TimedOut),
        res => Err(IoError::from_errno(-res)),
    }
}

impl fmt::Debug for PendingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSet")
            .field("len", &self.slab.len())
            .field("generation", &self.generation)
            .finish()
    }
}
