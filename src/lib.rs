//! # framelink
//!
//! Length-prefixed, negotiated-format message transport over any byte stream, with
//! an in-band key-exchange handshake and typed dispatch.
//!
//! ## Features
//! - 6-byte frame header: three transform ids and a base-255 length
//! - Pluggable serialization (bincode, JSON, MessagePack) with a never-failing fallback
//! - LZ4 / Zstd compression above a configurable threshold
//! - X25519 sealed session keys, XChaCha20-Poly1305 traffic encryption
//! - Messages sent before the handshake completes are queued and flushed in order
//! - Additive per-connection and process-wide handlers
//!
//! ## Quick Start
//! ```rust,no_run
//! use framelink::prelude::*;
//!
//! # async fn run() -> framelink::error::Result<()> {
//! let context = ProtocolContext::new(ProtocolConfig::default());
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:7000").await?;
//! let connection = Connection::new(context, Role::Client);
//! connection.on_route(class::SYSTEM, system::PING, |_, message| {
//!     println!("ping at {}", message.created_at());
//!     Ok(())
//! })?;
//! connection.attach(stream)?;
//! connection.wait_ready().await?;
//! connection.send(Message::ok(class::FIRST_AVAILABLE, 0, vec![Value::from("hello")]))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub mod prelude {
    pub use crate::config::ProtocolConfig;
    pub use crate::core::pipeline::TransformSet;
    pub use crate::core::serialization::SerializationKind;
    pub use crate::error::{ProtocolError, Result};
    pub use crate::protocol::connection::{Connection, Disconnection, Role};
    pub use crate::protocol::context::ProtocolContext;
    pub use crate::protocol::handshake::HandshakeState;
    pub use crate::protocol::message::{class, control, system, Message, Outcome, Value};
    pub use crate::utils::compression::CompressionKind;
    pub use crate::utils::crypto::EncryptionKind;
}
