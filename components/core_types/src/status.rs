//! Status codes.
//!
//! Every call, resume and protected region finishes with one of these.
//! The error classes double as the error taxonomy of the runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome class of a call, resume or protected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Status {
    /// Completed normally
    #[default]
    Ok,
    /// A coroutine suspended itself
    Yield,
    /// An error raised by running code
    RuntimeError,
    /// A malformed callable was rejected at load time
    SyntaxError,
    /// Stack or frame allocation failed
    MemoryError,
    /// A message handler or closer kept failing while an error was handled
    ErrorInErrorHandling,
}

impl Status {
    /// True for every error class.
    pub fn is_error(self) -> bool {
        !matches!(self, Status::Ok | Status::Yield)
    }

    /// Fixed message attached to error classes whose error object is a sentinel.
    pub fn sentinel_message(self) -> Option<&'static str> {
        match self {
            Status::MemoryError => Some("not enough memory"),
            Status::ErrorInErrorHandling => Some("error in error handling"),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::Yield => "yield",
            Status::RuntimeError => "runtime error",
            Status::SyntaxError => "syntax error",
            Status::MemoryError => "memory error",
            Status::ErrorInErrorHandling => "error in error handling",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of an execution context.
///
/// ```text
/// Initial --resume--> Running --yield--> Suspended --resume--> Running
/// Running --resumes another--> Normal --other yields/returns--> Running
/// Running --returns--> Dead
/// Running --unhandled error--> ErrorDone
/// Suspended/Initial/ErrorDone --close--> Dead
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextStatus {
    /// Created with a body but never resumed
    Initial,
    /// Currently executing
    Running,
    /// Suspended by a yield
    Suspended,
    /// Active but waiting on a coroutine it resumed
    Normal,
    /// Finished or closed
    Dead,
    /// Terminated by an error nothing handled
    ErrorDone,
}

impl ContextStatus {
    /// Whether a resume may be attempted in this state.
    pub fn is_resumable(self) -> bool {
        matches!(self, ContextStatus::Initial | ContextStatus::Suspended)
    }

    /// Whether an explicit close is allowed in this state.
    pub fn is_closable(self) -> bool {
        !matches!(self, ContextStatus::Running | ContextStatus::Normal)
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextStatus::Initial | ContextStatus::Suspended => "suspended",
            ContextStatus::Running => "running",
            ContextStatus::Normal => "normal",
            ContextStatus::Dead | ContextStatus::ErrorDone => "dead",
        };
        f.write_str(name)
    }
}
