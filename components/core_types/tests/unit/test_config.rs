//! Unit tests for RuntimeConfig loading and validation

use core_types::{ConfigError, RuntimeConfig, EXTRA_STACK, MAX_NATIVE_CALLS};

#[test]
fn test_empty_document_gives_defaults() {
    let config = RuntimeConfig::from_toml_str("").unwrap();
    assert_eq!(config, RuntimeConfig::default());
}

#[test]
fn test_full_document() {
    let source = r#"
min_stack = 10
basic_stack_size = 30
extra_stack = 4
max_stack = 2000
error_stack_margin = 50
max_native_calls = 40
max_call_chain = 8
"#;
    let config = RuntimeConfig::from_toml_str(source).unwrap();
    assert_eq!(config.min_stack, 10);
    assert_eq!(config.basic_stack_size, 30);
    assert_eq!(config.extra_stack, 4);
    assert_eq!(config.error_stack_size(), 2050);
    assert_eq!(config.native_calls_hard_limit(), 44);
    assert_eq!(config.max_call_chain, 8);
    assert_eq!(config.allocation_limit, None);
}

#[test]
fn test_small_native_limit_rejected() {
    let err = RuntimeConfig::from_toml_str("max_native_calls = 5").unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "max_native_calls",
            ..
        }
    ));
}

#[test]
fn test_allocation_limit_must_fit_initial_stack() {
    let config = RuntimeConfig {
        allocation_limit: Some(10),
        ..RuntimeConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_toml() {
    let err = RuntimeConfig::from_toml_str("max_stack = \"big\"").unwrap_err();
    assert!(err.to_string().starts_with("failed to parse runtime config"));
}

#[test]
fn test_defaults_match_constants() {
    let config = RuntimeConfig::default();
    assert_eq!(config.extra_stack, EXTRA_STACK);
    assert_eq!(config.max_native_calls, MAX_NATIVE_CALLS);
}
