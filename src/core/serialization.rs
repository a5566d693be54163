//! # Serialization Strategies
//!
//! Pluggable message encodings addressed by a single wire byte.
//!
//! ## Strategies
//! - **Bincode** (`0x01`): compact binary, represents every payload. This is the fallback.
//! - **JSON** (`0x02`): human-readable; cannot carry non-finite floats
//! - **MessagePack** (`0x03`): compact binary, the default for application traffic
//!
//! A strategy may refuse a message in its `prepare` hook. The registry then encodes the
//! message with the fallback and reports which strategy was really used, so the frame
//! header always names the encoding that produced the bytes.
//!
//! ## Usage
//! ```rust
//! use framelink::core::serialization::{SerializationKind, SerializationRegistry};
//! use framelink::protocol::message::Message;
//!
//! let registry = SerializationRegistry::with_defaults();
//! let msg = Message::ok(3, 0, vec![f64::NAN.into()]);
//! let out = registry.serialize(&msg, SerializationKind::Json).unwrap();
//! assert_eq!(out.used, SerializationKind::Bincode);
//! ```

use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializationKind {
    /// Binary compact format, never fails
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
    /// Compact binary format (MessagePack, efficient)
    #[default]
    #[serde(alias = "messagepack", alias = "msgpack")]
    MessagePack,
}

impl SerializationKind {
    /// Strategy used when the requested one cannot represent a message
    pub const FALLBACK: SerializationKind = SerializationKind::Bincode;

    pub const ALL: [SerializationKind; 3] = [
        SerializationKind::Bincode,
        SerializationKind::Json,
        SerializationKind::MessagePack,
    ];

    /// Get the format identifier byte for wire protocol
    pub fn id(self) -> u8 {
        match self {
            SerializationKind::Bincode => 0x01,
            SerializationKind::Json => 0x02,
            SerializationKind::MessagePack => 0x03,
        }
    }

    /// Detect format from identifier byte
    pub fn from_id(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SerializationKind::Bincode),
            0x02 => Some(SerializationKind::Json),
            0x03 => Some(SerializationKind::MessagePack),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationKind::Bincode => "Bincode",
            SerializationKind::Json => "JSON",
            SerializationKind::MessagePack => "MessagePack",
        }
    }
}

/// Result of a strategy's pre-serialization hook
pub enum Prepared<'a> {
    /// Encode the message as given, or a surrogate of it
    Ready(Cow<'a, Message>),
    /// The strategy cannot represent this message
    Unrepresentable(&'static str),
}

/// One serialization format.
pub trait SerializationStrategy: Send + Sync {
    fn kind(&self) -> SerializationKind;

    /// Rewrite the message into something this strategy can encode, or refuse it.
    fn prepare<'a>(&self, message: &'a Message) -> Prepared<'a> {
        Prepared::Ready(Cow::Borrowed(message))
    }

    /// Undo whatever `prepare` rewrote
    fn restore(&self, message: Message) -> Message {
        message
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Message>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeStrategy;

impl SerializationStrategy for BincodeStrategy {
    fn kind(&self) -> SerializationKind {
        SerializationKind::Bincode
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        bincode::serialize(message).map_err(|e| ProtocolError::SerializeError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        bincode::deserialize(bytes).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStrategy;

impl SerializationStrategy for JsonStrategy {
    fn kind(&self) -> SerializationKind {
        SerializationKind::Json
    }

    fn prepare<'a>(&self, message: &'a Message) -> Prepared<'a> {
        if message.has_finite_payload() {
            Prepared::Ready(Cow::Borrowed(message))
        } else {
            Prepared::Unrepresentable("non-finite float")
        }
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| ProtocolError::SerializeError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackStrategy;

impl SerializationStrategy for MessagePackStrategy {
    fn kind(&self) -> SerializationKind {
        SerializationKind::MessagePack
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        rmp_serde::to_vec(message).map_err(|e| ProtocolError::SerializeError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
    }
}

/// Bytes produced by the registry and the strategy that produced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serialized {
    pub used: SerializationKind,
    pub bytes: Vec<u8>,
}

/// Strategies available to a context, keyed by kind.
pub struct SerializationRegistry {
    strategies: HashMap<SerializationKind, Arc<dyn SerializationStrategy>>,
}

impl Default for SerializationRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SerializationRegistry {
    /// Registry holding only the fallback strategy
    pub fn empty() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
        };
        registry.register(Arc::new(BincodeStrategy));
        registry
    }

    /// Registry holding all built-in strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonStrategy));
        registry.register(Arc::new(MessagePackStrategy));
        registry
    }

    /// Install a strategy, replacing any previous one of the same kind.
    ///
    /// The fallback slot cannot be replaced.
    pub fn register(&mut self, strategy: Arc<dyn SerializationStrategy>) -> bool {
        let kind = strategy.kind();
        if kind == SerializationKind::FALLBACK && self.strategies.contains_key(&kind) {
            warn!("Refusing to replace the fallback serialization strategy");
            return false;
        }
        self.strategies.insert(kind, strategy);
        true
    }

    pub fn contains(&self, kind: SerializationKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    pub fn get(&self, kind: SerializationKind) -> Option<Arc<dyn SerializationStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    /// Serialize with `requested`, falling back when it is missing or refuses the message.
    ///
    /// # Errors
    /// Only if the fallback strategy itself fails.
    pub fn serialize(&self, message: &Message, requested: SerializationKind) -> Result<Serialized> {
        if let Some(strategy) = self.strategies.get(&requested) {
            match strategy.prepare(message) {
                Prepared::Ready(prepared) => match strategy.encode(&prepared) {
                    Ok(bytes) => {
                        return Ok(Serialized {
                            used: requested,
                            bytes,
                        })
                    }
                    Err(e) => warn!(
                        strategy = requested.name(),
                        error = %e,
                        "Serialization failed, using fallback"
                    ),
                },
                Prepared::Unrepresentable(reason) => debug!(
                    strategy = requested.name(),
                    reason, "Payload unrepresentable, using fallback"
                ),
            }
        } else {
            warn!(
                strategy = requested.name(),
                "Serialization strategy not registered, using fallback"
            );
        }

        let bytes = BincodeStrategy.encode(message)?;
        Ok(Serialized {
            used: SerializationKind::FALLBACK,
            bytes,
        })
    }

    /// Decode bytes produced by `kind`.
    ///
    /// # Errors
    /// `ProtocolError::UnknownTransform` if `kind` is not registered, or the strategy's
    /// own decode error.
    pub fn deserialize(&self, bytes: &[u8], kind: SerializationKind) -> Result<Message> {
        let strategy = self
            .strategies
            .get(&kind)
            .ok_or(ProtocolError::UnknownTransform {
                family: "serialization",
                id: kind.id(),
            })?;
        let message = strategy.decode(bytes)?;
        Ok(strategy.restore(message))
    }
}
