//! Error values and the propagation type of the execution core
//!
//! Every operation that can raise returns [`CallResult`]. The `Err` side is an
//! [`Unwind`]: either a raised [`RuntimeError`] travelling to the nearest
//! protection boundary, or a coroutine suspension travelling to its resume
//! boundary.

use core_types::Status;
use thiserror::Error;

use crate::value::Value;

/// Result of any operation that may raise or suspend
pub type CallResult<T> = Result<T, Unwind>;

/// A raised error: its class plus the error object
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{value}")]
pub struct RuntimeError {
    /// Error class
    pub status: Status,
    /// The error object
    pub value: Value,
}

impl RuntimeError {
    /// Create an error of the given class
    pub fn new(status: Status, value: impl Into<Value>) -> Self {
        Self {
            status,
            value: value.into(),
        }
    }

    /// Runtime-error class with a message
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(Status::RuntimeError, Value::from(message.into()))
    }
}

#[derive(Debug, Clone, Error)]
enum Signal {
    #[error(transparent)]
    Error(RuntimeError),
    #[error("coroutine suspended")]
    Yield,
}

/// Non-local exit of a call: a raised error or a coroutine suspension
#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct Unwind(Signal);

impl Unwind {
    pub(crate) fn error(err: RuntimeError) -> Self {
        Unwind(Signal::Error(err))
    }

    pub(crate) fn suspend() -> Self {
        Unwind(Signal::Yield)
    }

    /// Whether this is a coroutine suspension
    pub fn is_yield(&self) -> bool {
        matches!(self.0, Signal::Yield)
    }

    /// Status class carried by this unwind
    pub fn status(&self) -> Status {
        match &self.0 {
            Signal::Error(err) => err.status,
            Signal::Yield => Status::Yield,
        }
    }

    /// The raised error, unless this is a suspension
    pub fn as_error(&self) -> Option<&RuntimeError> {
        match &self.0 {
            Signal::Error(err) => Some(err),
            Signal::Yield => None,
        }
    }

    /// Convert into an error; a suspension that reached a boundary unable to
    /// hold it becomes a runtime error.
    pub(crate) fn into_error(self) -> RuntimeError {
        match self.0 {
            Signal::Error(err) => err,
            Signal::Yield => {
                RuntimeError::message("attempt to yield across a native-call boundary")
            }
        }
    }
}
