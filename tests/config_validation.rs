//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use framelink::config::{ConnectionConfig, LoggingConfig, ProtocolConfig, TransportConfig};
use framelink::core::frame::MAX_FRAME_LENGTH;
use framelink::core::serialization::SerializationKind;
use framelink::utils::compression::CompressionKind;
use framelink::utils::crypto::EncryptionKind;
use serial_test::serial;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = ProtocolConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_default_transforms() {
    let config = ConnectionConfig::default();
    assert_eq!(config.serialization, SerializationKind::MessagePack);
    assert_eq!(config.compression, CompressionKind::Lz4);
    assert_eq!(config.encryption, EncryptionKind::Symmetric);
    assert_eq!(config.fallback_encryption, EncryptionKind::None);
    assert!(config.client_initiates_handshake);
}

// ===== CONNECTION =====

#[test]
fn test_zero_exchange_log_capacity() {
    let mut config = ProtocolConfig::default();
    config.connection.exchange_log_capacity = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Exchange log capacity")));
}

#[test]
fn test_zero_capacity_allowed_without_logging() {
    let mut config = ProtocolConfig::default();
    config.connection.log_exchanges = false;
    config.connection.exchange_log_capacity = 0;

    assert!(config.validate().is_empty());
}

#[test]
fn test_excessive_exchange_log_capacity() {
    let mut config = ProtocolConfig::default();
    config.connection.exchange_log_capacity = 5_000_000;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("too large")));
}

#[test]
fn test_zero_first_connection_id() {
    let mut config = ProtocolConfig::default();
    config.connection.first_connection_id = 0;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("First connection id")));
}

#[test]
fn test_asymmetric_fallback_rejected() {
    let mut config = ProtocolConfig::default();
    config.connection.fallback_encryption = EncryptionKind::Asymmetric;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be asymmetric")));
}

#[test]
fn test_disabled_encryption_warning() {
    let mut config = ProtocolConfig::default();
    config.connection.encryption = EncryptionKind::None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("WARNING") && e.contains("Encryption is disabled")));
}

// ===== TRANSPORT =====

#[test]
fn test_small_read_buffer() {
    let config = TransportConfig {
        read_buffer_size: 16,
        ..TransportConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Read buffer size too small")));
}

#[test]
fn test_small_max_frame_length() {
    let config = TransportConfig {
        max_frame_length: 512,
        compression_threshold_bytes: 0,
        ..TransportConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Max frame length too small")));
}

#[test]
fn test_max_frame_length_above_ceiling() {
    let config = TransportConfig {
        max_frame_length: MAX_FRAME_LENGTH + 1,
        ..TransportConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("exceeds the protocol ceiling")));
}

#[test]
fn test_max_frame_length_at_ceiling_is_valid() {
    let config = TransportConfig {
        max_frame_length: MAX_FRAME_LENGTH,
        ..TransportConfig::default()
    };

    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_compression_level() {
    for level in [0, 23, -5] {
        let config = TransportConfig {
            compression_level: level,
            ..TransportConfig::default()
        };

        let errors = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("Invalid compression level")),
            "level {level} should be rejected"
        );
    }
}

#[test]
fn test_compression_threshold_above_frame_length() {
    let config = TransportConfig {
        max_frame_length: 4096,
        compression_threshold_bytes: 8192,
        ..TransportConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Compression threshold cannot be larger")));
}

// ===== LOGGING =====

#[test]
fn test_empty_app_name() {
    let config = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_long_app_name() {
    let config = LoggingConfig {
        app_name: "x".repeat(200),
        ..LoggingConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Application name too long")));
}

#[test]
fn test_json_format_without_console() {
    let config = LoggingConfig {
        json_format: true,
        log_to_console: false,
        ..LoggingConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("json_format has no effect")));
}

// ===== AGGREGATION =====

#[test]
fn test_multiple_validation_errors() {
    let mut config = ProtocolConfig::default();
    config.connection.first_connection_id = 0;
    config.transport.read_buffer_size = 1;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 3,
        "Should report every problem, got: {:?}",
        errors
    );
}

#[test]
fn test_validate_strict_lists_errors() {
    let mut config = ProtocolConfig::default();
    config.transport.compression_level = 99;

    let err = config.validate_strict().expect_err("should fail");
    let text = err.to_string();
    assert!(text.contains("Configuration validation failed"));
    assert!(text.contains("Invalid compression level: 99"));
}

#[test]
fn test_validate_strict_accepts_default() {
    assert!(ProtocolConfig::default().validate_strict().is_ok());
}

// ===== SOURCES =====

#[test]
fn test_toml_overrides_and_defaults() {
    let config = ProtocolConfig::from_toml(
        r#"
        [connection]
        serialization = "json"
        compression = "zstd"
        first_connection_id = 1000

        [transport]
        compression_threshold_bytes = 128

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("valid TOML");

    assert_eq!(config.connection.serialization, SerializationKind::Json);
    assert_eq!(config.connection.compression, CompressionKind::Zstd);
    assert_eq!(config.connection.first_connection_id, 1000);
    assert_eq!(config.connection.encryption, EncryptionKind::Symmetric);
    assert_eq!(config.transport.compression_threshold_bytes, 128);
    assert_eq!(config.transport.read_buffer_size, TransportConfig::default().read_buffer_size);
    assert_eq!(config.logging.log_level, Level::DEBUG);
}

#[test]
fn test_unknown_transform_in_toml_is_rejected() {
    let result = ProtocolConfig::from_toml(
        r#"
        [connection]
        compression = "brotli"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("framelink-config-{}.toml", std::process::id()));
    let config = ProtocolConfig::default_with_overrides(|c| {
        c.connection.serialization = SerializationKind::Bincode;
        c.transport.compression_level = 9;
    });

    config.save_to_file(&path).expect("write config");
    let loaded = ProtocolConfig::from_file(&path).expect("read config");
    let _ = std::fs::remove_file(&path);

    assert_eq!(loaded, config);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = ProtocolConfig::from_file("/nonexistent/framelink.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}

const ENV_KEYS: [&str; 5] = [
    "FRAMELINK_SERIALIZATION",
    "FRAMELINK_COMPRESSION",
    "FRAMELINK_FIRST_CONNECTION_ID",
    "FRAMELINK_LOG_LEVEL",
    "FRAMELINK_MAX_FRAME_LENGTH",
];

fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("FRAMELINK_SERIALIZATION", "JSON");
    std::env::set_var("FRAMELINK_COMPRESSION", "zstd");
    std::env::set_var("FRAMELINK_FIRST_CONNECTION_ID", "500");
    std::env::set_var("FRAMELINK_LOG_LEVEL", "warn");

    let config = ProtocolConfig::from_env();
    clear_env();
    let config = config.expect("valid environment");

    assert_eq!(config.connection.serialization, SerializationKind::Json);
    assert_eq!(config.connection.compression, CompressionKind::Zstd);
    assert_eq!(config.connection.first_connection_id, 500);
    assert_eq!(config.logging.log_level, Level::WARN);
}

#[test]
#[serial]
fn test_from_env_reports_bad_values() {
    clear_env();
    std::env::set_var("FRAMELINK_MAX_FRAME_LENGTH", "lots");

    let result = ProtocolConfig::from_env();
    clear_env();

    let err = result.unwrap_err();
    assert!(err
        .to_string()
        .contains("Invalid value for FRAMELINK_MAX_FRAME_LENGTH: lots"));
}

#[test]
#[serial]
fn test_from_env_without_variables_is_default() {
    clear_env();
    assert_eq!(ProtocolConfig::from_env().unwrap(), ProtocolConfig::default());
}
