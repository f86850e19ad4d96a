//! Shared status codes and runtime limits for the execution core.
//!
//! This crate holds the small vocabulary every other component agrees on:
//!
//! - [`Status`] - outcome class of a call, resume or protected region
//! - [`ContextStatus`] - lifecycle state of an execution context (coroutine)
//! - [`RuntimeConfig`] - stack, nesting and allocation limits
//! - [`ConfigError`] - failures while loading or validating a configuration
//!
//! # Examples
//!
//! ```
//! use core_types::{RuntimeConfig, Status};
//!
//! let config = RuntimeConfig::from_toml_str("max_stack = 5000").unwrap();
//! assert_eq!(config.max_stack, 5000);
//! assert_eq!(config.error_stack_size(), 5200);
//! assert!(Status::MemoryError.is_error());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod config;
mod status;

pub use config::{
    ConfigError, RuntimeConfig, BASIC_STACK_SIZE, ERROR_STACK_MARGIN, EXTRA_STACK,
    MAX_CALL_CHAIN, MAX_NATIVE_CALLS, MAX_STACK, MIN_STACK,
};
pub use status::{ContextStatus, Status};
