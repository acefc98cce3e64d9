//! Config loading and defaults integration tests

use std::path::PathBuf;
use std::time::Duration;

use enclave_broker::{BrokerConfig, ConfigError};
use tempfile::TempDir;

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
staging_dir = "/var/run/enclave-broker"
timeout_secs = 120
max_output_bytes = 8192
executable_name = "Key Manager"
"#;

    let config = BrokerConfig::from_toml_str(toml_str).expect("valid TOML");

    assert_eq!(
        config.staging_dir,
        Some(PathBuf::from("/var/run/enclave-broker"))
    );
    assert_eq!(config.timeout(), Some(Duration::from_secs(120)));
    assert_eq!(config.max_output_bytes, 8192);
    assert_eq!(config.executable_name, "Key Manager");
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config = BrokerConfig::from_toml_str("timeout_secs = 5").unwrap();
    let defaults = BrokerConfig::default();

    assert_eq!(config.timeout_secs, 5);
    assert_eq!(config.max_output_bytes, defaults.max_output_bytes);
    assert_eq!(config.executable_name, defaults.executable_name);
    assert_eq!(config.staging_dir, None);
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let config = BrokerConfig::load(&dir.path().join("nonexistent.toml")).unwrap();
    assert_eq!(config, BrokerConfig::default());
}

#[test]
fn test_config_loads_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("enclave-broker.toml");
    std::fs::write(&path, "timeout_secs = 0\nexecutable_name = \"signer\"\n").unwrap();

    let config = BrokerConfig::load(&path).unwrap();
    assert_eq!(config.timeout(), None);
    assert_eq!(config.executable_name, "signer");
}

#[test]
fn test_config_rejects_wrong_types() {
    let err = BrokerConfig::from_toml_str(r#"timeout_secs = "soon""#).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_config_unreadable_path() {
    // A directory exists but cannot be read as a file
    let dir = TempDir::new().unwrap();
    let err = BrokerConfig::load(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
