//! # Error Types
//!
//! Error handling for the framing layer, the transform pipeline and the handshake.
//!
//! ## Error Categories
//! - **Framing Errors**: invalid length, zero-length frame, sentinel or unknown transform ids
//! - **Transform Errors**: serialization, compression and encryption failures
//! - **Cryptographic Errors**: ciphertext that fails to authenticate, missing key material
//! - **Connection Errors**: I/O failures, closed connections
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! Framing and cryptographic errors are fatal to the connection that raised them.
//! Everything else is local to the operation that failed.
//!
//! ## Example Usage
//! ```rust
//! use framelink::core::frame::encode_length;
//! use framelink::error::ProtocolError;
//!
//! match encode_length(20_000_000) {
//!     Err(ProtocolError::InvalidLength(n)) => assert_eq!(n, 20_000_000),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Registry and session lock errors
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire lock on connection registry";
    pub const ERR_SESSION_LOCK: &str = "Failed to acquire lock on connection session";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Framing errors
    pub const ERR_CRITICAL_READ: &str = "Critical reading error : invalid pre-packet data";
    pub const ERR_ZERO_LENGTH: &str = "Critical reading error : zero-length frame";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_READY: &str = "Connection has not completed its handshake";

    /// Cryptographic errors
    pub const ERR_WEAK_SHARED_SECRET: &str = "Key exchange produced a weak shared secret";
    pub const ERR_INVALID_KEY_LENGTH: &str = "Key material has an invalid length";

    /// Handshake errors
    pub const ERR_NO_LOCAL_KEYPAIR: &str = "No local key pair";
    pub const ERR_NO_PEER_PUBLIC_KEY: &str = "No peer public key";
    pub const ERR_NO_SESSION_KEY: &str = "No session key";
    pub const ERR_WRONG_ADMIN_PASSWORD: &str = "Wrong password for admin rights";
    pub const ERR_AUTHORITATIVE_ONLY: &str = "Operation is reserved to the authoritative side";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    /// A length outside `0..=MAX_FRAME_LENGTH` was handed to the length codec.
    #[error("Invalid frame length: {0}")]
    InvalidLength(usize),

    #[error("Frame too large: {0} bytes")]
    OversizedPacket(usize),

    /// Unrecoverable stream corruption. The connection must be retired.
    #[error("{0}")]
    Framing(String),

    #[error("Unknown {family} id: {id}")]
    UnknownTransform { family: &'static str, id: u8 },

    #[error("Missing key material: {0}")]
    MissingKey(&'static str),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error leaves the byte stream or key state unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Framing(_)
                | ProtocolError::UnknownTransform { .. }
                | ProtocolError::DecryptionFailure
                | ProtocolError::DecompressionFailure
                | ProtocolError::DeserializeError(_)
                | ProtocolError::Io(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_and_crypto_errors_are_fatal() {
        assert!(ProtocolError::Framing(constants::ERR_CRITICAL_READ.into()).is_fatal());
        assert!(ProtocolError::DecryptionFailure.is_fatal());
        assert!(ProtocolError::UnknownTransform {
            family: "compression",
            id: 9
        }
        .is_fatal());
    }

    #[test]
    fn negotiation_errors_are_recoverable() {
        assert!(!ProtocolError::MissingKey(constants::ERR_NO_SESSION_KEY).is_fatal());
        assert!(!ProtocolError::HandshakeError("late".into()).is_fatal());
        assert!(!ProtocolError::InvalidLength(1).is_fatal());
    }
}
