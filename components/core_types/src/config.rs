//! Runtime limits.
//!
//! All limits of the stack manager, dispatcher and scheduler live in one
//! [`RuntimeConfig`], loadable from TOML. Missing keys take the defaults below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slots guaranteed to a native function on entry.
pub const MIN_STACK: usize = 20;
/// Initial stack size of a context.
pub const BASIC_STACK_SIZE: usize = 2 * MIN_STACK;
/// Slots kept beyond the logical end of the stack for internal pushes.
pub const EXTRA_STACK: usize = 5;
/// Largest logical stack size a context may grow to.
pub const MAX_STACK: usize = 1_000_000;
/// Extra slots granted once for error handling after an overflow.
pub const ERROR_STACK_MARGIN: usize = 200;
/// Maximum nesting of native (non-inlined) calls.
pub const MAX_NATIVE_CALLS: u32 = 200;
/// Maximum length of a `__call` metamethod chain.
pub const MAX_CALL_CHAIN: usize = 100;

/// Errors produced while loading or validating a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed
    #[error("failed to parse runtime config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A limit is inconsistent with another
    #[error("invalid runtime config field `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Stack, nesting and allocation limits of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Free slots reserved for every native frame
    pub min_stack: usize,
    /// Stack size a context starts with
    pub basic_stack_size: usize,
    /// Slack slots past the logical end of the stack
    pub extra_stack: usize,
    /// Maximum logical stack size
    pub max_stack: usize,
    /// Slots granted past `max_stack` to report an overflow
    pub error_stack_margin: usize,
    /// Maximum nesting of native calls
    pub max_native_calls: u32,
    /// Maximum `__call` chain length
    pub max_call_chain: usize,
    /// Cap on total stack slots a context may allocate (None = unbounded)
    pub allocation_limit: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            min_stack: MIN_STACK,
            basic_stack_size: BASIC_STACK_SIZE,
            extra_stack: EXTRA_STACK,
            max_stack: MAX_STACK,
            error_stack_margin: ERROR_STACK_MARGIN,
            max_native_calls: MAX_NATIVE_CALLS,
            max_call_chain: MAX_CALL_CHAIN,
            allocation_limit: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Stack size used while an overflow error is being handled.
    pub fn error_stack_size(&self) -> usize {
        self.max_stack + self.error_stack_margin
    }

    /// Native nesting at which further calls fail with an error-in-error-handling.
    pub fn native_calls_hard_limit(&self) -> u32 {
        self.max_native_calls / 10 * 11
    }

    /// Check that the limits are mutually consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_stack == 0 {
            return Err(invalid("min_stack", "must be at least 1"));
        }
        if self.basic_stack_size <= self.min_stack {
            return Err(invalid(
                "basic_stack_size",
                format!("must exceed min_stack ({})", self.min_stack),
            ));
        }
        if self.max_stack < self.basic_stack_size {
            return Err(invalid(
                "max_stack",
                format!("must be at least basic_stack_size ({})", self.basic_stack_size),
            ));
        }
        if self.extra_stack < 3 {
            return Err(invalid("extra_stack", "must be at least 3"));
        }
        if self.error_stack_margin == 0 {
            return Err(invalid("error_stack_margin", "must be at least 1"));
        }
        if self.max_native_calls < 10 {
            return Err(invalid("max_native_calls", "must be at least 10"));
        }
        if self.max_call_chain == 0 {
            return Err(invalid("max_call_chain", "must be at least 1"));
        }
        if let Some(limit) = self.allocation_limit {
            if limit < self.basic_stack_size + self.extra_stack {
                return Err(invalid(
                    "allocation_limit",
                    "must fit the initial stack of a context",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
