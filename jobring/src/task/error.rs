use crate::task::Id;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;

type Payload = Box<dyn Any + Send + 'static>;

/// Task failed to execute to completion.
#[derive(thiserror::Error)]
pub enum JoinError {
    /// The task was aborted, or dropped by a runtime shutting down.
    #[error("task {0} was cancelled")]
    Cancelled(Id),

    /// The output was requested before the task completed.
    #[error("task {0} has not finished")]
    NotFinished(Id),

    /// The task panicked. The payload is kept so it can be resumed.
    #[error("task {id} panicked{}", fmt_message(.message.as_deref()))]
    Panic {
        id: Id,
        message: Option<String>,
        payload: Mutex<Payload>,
    },
}

fn fmt_message(message: Option<&str>) -> String {
    message.map(|m| format!(" with message {m:?}")).unwrap_or_default()
}

impl JoinError {
    pub(crate) fn cancelled(id: Id) -> JoinError {
        JoinError::Cancelled(id)
    }

    pub(crate) fn panic(id: Id, payload: Payload) -> JoinError {
        JoinError::Panic {
            id,
            message: panic_payload_as_str(&payload).map(str::to_owned),
            payload: Mutex::new(payload),
        }
    }

    /// Returns true if the error was caused by the task being cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JoinError::Cancelled(_))
    }

    /// Returns true if the task was still running when its output was
    /// requested.
    pub fn is_not_finished(&self) -> bool {
        matches!(self, JoinError::NotFinished(_))
    }

    /// Returns true if the error was caused by the task panicking.
    pub fn is_panic(&self) -> bool {
        matches!(self, JoinError::Panic { .. })
    }

    /// Id of the task that failed.
    pub fn id(&self) -> Id {
        match self {
            JoinError::Cancelled(id) | JoinError::NotFinished(id) => *id,
            JoinError::Panic { id, .. } => *id,
        }
    }

    /// The panic message, when the payload was a string.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            JoinError::Panic { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Consumes the join error, returning the object with which the task
    /// panicked.
    ///
    /// # Panics
    ///
    /// `into_panic()` panics if the `Error` does not represent the underlying
    /// task terminating with a panic. Use `is_panic` to check the error reason
    /// or `try_into_panic` for a variant that does not panic.
    #[track_caller]
    pub fn into_panic(self) -> Payload {
        self.try_into_panic()
            .expect("`JoinError` reason is not a panic.")
    }

    /// Consumes the join error, returning the object with which the task
    /// panicked if the task terminated due to a panic. Otherwise, `self` is
    /// returned.
    pub fn try_into_panic(self) -> Result<Payload, JoinError> {
        match self {
            JoinError::Panic { payload, .. } => Ok(payload.into_inner()),
            err => Err(err),
        }
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Cancelled(id) => write!(f, "JoinError::Cancelled({id:?})"),
            JoinError::NotFinished(id) => write!(f, "JoinError::NotFinished({id:?})"),
            JoinError::Panic { id, message, .. } => match message {
                Some(msg) => write!(f, "JoinError::Panic({id:?}, {msg:?}, ...)"),
                None => write!(f, "JoinError::Panic({id:?}, ...)"),
            },
        }
    }
}

impl From<JoinError> for std::io::Error {
    fn from(src: JoinError) -> std::io::Error {
        std::io::Error::other(src.to_string())
    }
}

pub(crate) fn panic_payload_as_str(payload: &Payload) -> Option<&str> {
    if let Some(s) = payload.downcast_ref::<String>() {
        return Some(s);
    }

    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some(s);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracted() {
        let id = Id::next();

        let err = JoinError::panic(id, Box::new("boom"));
        assert!(err.is_panic());
        assert_eq!(err.panic_message(), Some("boom"));
        assert_eq!(err.id(), id);
        assert!(err.to_string().contains("boom"));

        let err = JoinError::panic(id, Box::new(String::from("owned boom")));
        assert_eq!(err.panic_message(), Some("owned boom"));

        let err = JoinError::panic(id, Box::new(42usize));
        assert_eq!(err.panic_message(), None);
        let payload = err.into_panic();
        assert_eq!(payload.downcast_ref::<usize>(), Some(&42));
    }

    #[test]
    fn test_cancelled_is_not_panic() {
        let err = JoinError::cancelled(Id::next());
        assert!(err.is_cancelled());
        assert!(err.panic_message().is_none());
        assert!(err.try_into_panic().is_err());
    }
}
