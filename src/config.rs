//! # Configuration Management
//!
//! Centralized configuration for protocol contexts and their connections.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()` (prefix `FRAMELINK_`)
//! - Direct instantiation with defaults
//!
//! ## Security Considerations
//! - The maximum frame length bounds what a corrupted or hostile length prefix can allocate
//! - Disabling encryption is reported by `validate()`

use crate::core::frame::MAX_FRAME_LENGTH;
use crate::core::serialization::SerializationKind;
use crate::error::{ProtocolError, Result};
use crate::utils::compression::CompressionKind;
use crate::utils::crypto::EncryptionKind;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Environment variable prefix read by [`ProtocolConfig::from_env`]
pub const ENV_PREFIX: &str = "FRAMELINK_";

/// Top-level configuration of a protocol context
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ProtocolConfig {
    /// Per-connection defaults
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Framing and transform limits
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_var("SERIALIZATION") {
            config.connection.serialization = parse_enum(&v, "SERIALIZATION")?;
        }
        if let Some(v) = env_var("COMPRESSION") {
            config.connection.compression = parse_enum(&v, "COMPRESSION")?;
        }
        if let Some(v) = env_var("ENCRYPTION") {
            config.connection.encryption = parse_enum(&v, "ENCRYPTION")?;
        }
        if let Some(v) = env_var("LOG_EXCHANGES") {
            config.connection.log_exchanges = parse_value(&v, "LOG_EXCHANGES")?;
        }
        if let Some(v) = env_var("FIRST_CONNECTION_ID") {
            config.connection.first_connection_id = parse_value(&v, "FIRST_CONNECTION_ID")?;
        }
        if let Some(v) = env_var("MAX_FRAME_LENGTH") {
            config.transport.max_frame_length = parse_value(&v, "MAX_FRAME_LENGTH")?;
        }
        if let Some(v) = env_var("COMPRESSION_THRESHOLD_BYTES") {
            config.transport.compression_threshold_bytes =
                parse_value(&v, "COMPRESSION_THRESHOLD_BYTES")?;
        }
        if let Some(v) = env_var("LOG_LEVEL") {
            config.logging.log_level = v
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {v}")))?;
        }
        if let Some(v) = env_var("LOG_JSON") {
            config.logging.json_format = parse_value(&v, "LOG_JSON")?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.connection.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parse_value<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{name}: {raw}")))
}

/// Parse a snake_case enum name the same way TOML does
fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str, name: &str) -> Result<T> {
    let quoted = format!("\"{}\"", raw.trim().to_ascii_lowercase());
    serde_json::from_str(&quoted)
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{name}: {raw}")))
}

/// Per-connection defaults
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConnectionConfig {
    /// Serialization applied to application messages
    pub serialization: SerializationKind,

    /// Compression applied to application messages above the threshold
    pub compression: CompressionKind,

    /// Encryption requested for application messages
    pub encryption: EncryptionKind,

    /// Encryption used when the requested one has no key material yet
    pub fallback_encryption: EncryptionKind,

    /// Whether the connecting side sends its public key as soon as it is attached
    pub client_initiates_handshake: bool,

    /// Whether sent and received messages are kept in the exchange log
    pub log_exchanges: bool,

    /// Entries kept in the exchange log before the oldest is dropped
    pub exchange_log_capacity: usize,

    /// First identifier handed out by a context
    pub first_connection_id: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            serialization: SerializationKind::MessagePack,
            compression: CompressionKind::Lz4,
            encryption: EncryptionKind::Symmetric,
            fallback_encryption: EncryptionKind::None,
            client_initiates_handshake: true,
            log_exchanges: true,
            exchange_log_capacity: 256,
            first_connection_id: 1,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.log_exchanges && self.exchange_log_capacity == 0 {
            errors.push("Exchange log capacity must be greater than 0 when logging exchanges".to_string());
        } else if self.exchange_log_capacity > 1_000_000 {
            errors.push(format!(
                "Exchange log capacity too large: {} (max recommended: 1,000,000)",
                self.exchange_log_capacity
            ));
        }

        if self.first_connection_id == 0 {
            errors.push("First connection id must be greater than 0".to_string());
        }

        if self.fallback_encryption == EncryptionKind::Asymmetric {
            errors.push("Fallback encryption cannot be asymmetric".to_string());
        }

        if self.encryption == EncryptionKind::None {
            errors.push(
                "WARNING: Encryption is disabled - not recommended for production".to_string(),
            );
        }

        errors
    }
}

/// Framing and transform limits
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TransportConfig {
    /// Initial capacity of the per-connection read buffer
    pub read_buffer_size: usize,

    /// Largest frame payload accepted or produced
    pub max_frame_length: usize,

    /// Zstd compression level
    pub compression_level: i32,

    /// Minimum payload size (bytes) before compression is applied
    #[serde(default)]
    pub compression_threshold_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            max_frame_length: MAX_FRAME_LENGTH,
            compression_level: 3,
            compression_threshold_bytes: 512,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.read_buffer_size < 64 {
            errors.push("Read buffer size too small (minimum: 64 bytes)".to_string());
        }

        if self.max_frame_length < 1024 {
            errors.push("Max frame length too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_length > MAX_FRAME_LENGTH {
            errors.push(format!(
                "Max frame length {} exceeds the protocol ceiling of {MAX_FRAME_LENGTH} bytes",
                self.max_frame_length
            ));
        }

        if self.compression_level < 1 || self.compression_level > 22 {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 1-22)",
                self.compression_level
            ));
        }

        if self.compression_threshold_bytes > self.max_frame_length {
            errors.push("Compression threshold cannot be larger than max frame length".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("framelink"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.json_format && !self.log_to_console {
            errors.push("json_format has no effect when log_to_console is false".to_string());
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn example_config_parses_back() {
        let text = ProtocolConfig::example_config();
        let parsed = ProtocolConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, ProtocolConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let parsed = ProtocolConfig::from_toml(
            r#"
            [connection]
            serialization = "json"
            compression = "zstd"
            encryption = "symmetric"
            fallback_encryption = "none"
            client_initiates_handshake = false
            log_exchanges = false
            exchange_log_capacity = 16
            first_connection_id = 42
            "#,
        )
        .unwrap();

        assert_eq!(parsed.connection.serialization, SerializationKind::Json);
        assert_eq!(parsed.connection.first_connection_id, 42);
        assert_eq!(parsed.transport, TransportConfig::default());
    }

    #[test]
    fn parse_enum_accepts_mixed_case() {
        let kind: CompressionKind = parse_enum("ZSTD", "COMPRESSION").unwrap();
        assert_eq!(kind, CompressionKind::Zstd);
        assert!(parse_enum::<CompressionKind>("brotli", "COMPRESSION").is_err());
    }
}
