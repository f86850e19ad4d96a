//! Contract compliance tests for core_types
//!
//! These tests pin the public surface other components rely on.

use core_types::{
    ContextStatus, RuntimeConfig, Status, BASIC_STACK_SIZE, ERROR_STACK_MARGIN, MAX_STACK,
    MIN_STACK,
};

#[cfg(test)]
mod status_contract_tests {
    use super::*;

    /// Contract: Status has every outcome class
    #[test]
    fn test_status_variants() {
        let all = [
            Status::Ok,
            Status::Yield,
            Status::RuntimeError,
            Status::SyntaxError,
            Status::MemoryError,
            Status::ErrorInErrorHandling,
        ];
        assert_eq!(all.iter().filter(|s| s.is_error()).count(), 4);
    }

    /// Contract: ContextStatus has every lifecycle state
    #[test]
    fn test_context_status_variants() {
        let _ = [
            ContextStatus::Initial,
            ContextStatus::Running,
            ContextStatus::Suspended,
            ContextStatus::Normal,
            ContextStatus::Dead,
            ContextStatus::ErrorDone,
        ];
    }
}

#[cfg(test)]
mod config_contract_tests {
    use super::*;

    /// Contract: the initial stack is twice the native reservation
    #[test]
    fn test_basic_stack_size() {
        assert_eq!(BASIC_STACK_SIZE, 2 * MIN_STACK);
    }

    /// Contract: the error stack is the maximum plus the error margin
    #[test]
    fn test_error_stack_size() {
        let config = RuntimeConfig::default();
        assert_eq!(config.error_stack_size(), MAX_STACK + ERROR_STACK_MARGIN);
    }

    /// Contract: configs round-trip through TOML
    #[test]
    fn test_config_serializes_to_toml() {
        let config = RuntimeConfig {
            max_stack: 4096,
            allocation_limit: Some(8192),
            ..RuntimeConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(RuntimeConfig::from_toml_str(&text).unwrap(), config);
    }
}
