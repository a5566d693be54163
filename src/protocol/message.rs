//! # Messages
//!
//! A [`Message`] is the unit of communication: an ordered payload of [`Value`]s plus
//! routing metadata. Outcome, class and sub-class are fixed at construction.
//!
//! ## Routing
//! - **Class**: coarse routing key, see [`class`]
//! - **Sub-class**: fine routing key within a class, see [`control`] and [`system`]
//! - **Outcome**: signed status code, see [`Outcome`]

use crate::utils::time::now_millis;
use serde::{Deserialize, Serialize};

/// Reserved message classes
pub mod class {
    pub const ADMIN: u8 = 0;
    pub const AUTH: u8 = 1;
    pub const SYNC: u8 = 2;
    pub const SYSTEM: u8 = 255;

    /// First class free for application use
    pub const FIRST_AVAILABLE: u8 = 3;
}

/// Sub-classes of [`class::AUTH`] driving the handshake
pub mod control {
    pub const PUBLIC_KEY: u8 = 0;
    pub const SYMMETRIC_KEY: u8 = 1;
    pub const CONFIRM: u8 = 2;
    pub const ADMIN_SIGNATURE: u8 = 3;
    pub const DISCONNECT: u8 = 4;
    pub const IDENTITY: u8 = 5;
    pub const CHANGE_SERIALIZATION: u8 = 127;
}

/// Sub-classes of [`class::SYSTEM`]
pub mod system {
    pub const PING: u8 = 0;
}

/// Signed status code carried by every message.
///
/// Non-negative values are the success family, negative values the error family.
/// The default is [`Outcome::OK`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outcome(pub i8);

impl Outcome {
    pub const OK: Outcome = Outcome(0);
    pub const ACK: Outcome = Outcome(1);
    pub const YES: Outcome = Outcome(2);
    pub const NO: Outcome = Outcome(3);
    pub const AWAITING_CONFIRMATION: Outcome = Outcome(4);
    pub const CONFIRMATION: Outcome = Outcome(5);
    pub const FORWARD: Outcome = Outcome(6);
    pub const MALFORMED: Outcome = Outcome(-1);
    pub const AUTH_DENIED: Outcome = Outcome(-2);
    pub const NO_REQUEST_MATCH: Outcome = Outcome(-3);
    pub const AMBIGUITY: Outcome = Outcome(-4);
    pub const BROKEN: Outcome = Outcome(-5);
    pub const ERROR: Outcome = Outcome(-6);
    pub const UNKNOWN: Outcome = Outcome(i8::MIN);

    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "ok",
            1 => "ack",
            2 => "yes",
            3 => "no",
            4 => "awaiting-confirmation",
            5 => "confirmation",
            6 => "forward",
            -1 => "malformed",
            -2 => "auth-denied",
            -3 => "no-request-match",
            -4 => "ambiguity",
            -5 => "broken",
            -6 => "error",
            i8::MIN => "unknown",
            _ => "custom",
        }
    }
}

/// One payload element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Ordered string-keyed pairs
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match *self {
            Value::U8(v) => Some(v),
            _ => None,
        }
    }

    /// Widen any unsigned integer variant
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Whether every float reachable from this value is finite
    pub fn is_finite(&self) -> bool {
        match self {
            Value::F32(v) => v.is_finite(),
            Value::F64(v) => v.is_finite(),
            Value::List(items) => items.iter().all(Value::is_finite),
            Value::Map(pairs) => pairs.iter().all(|(_, v)| v.is_finite()),
            _ => true,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Vec<u8> => Bytes,
    Vec<Value> => List,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    outcome: Outcome,
    class: u8,
    subclass: u8,
    payload: Vec<Value>,
    created_at: u64,
    label: Option<String>,
    intercepted_at: Option<u64>,
}

impl Message {
    pub fn new(outcome: Outcome, class: u8, subclass: u8, payload: Vec<Value>) -> Self {
        Self {
            outcome,
            class,
            subclass,
            payload,
            created_at: now_millis(),
            label: None,
            intercepted_at: None,
        }
    }

    /// Build a message with an `OK` outcome
    pub fn ok(class: u8, subclass: u8, payload: Vec<Value>) -> Self {
        Self::new(Outcome::OK, class, subclass, payload)
    }

    /// Attach a human-readable label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn class(&self) -> u8 {
        self.class
    }

    pub fn subclass(&self) -> u8 {
        self.subclass
    }

    pub fn route(&self) -> (u8, u8) {
        (self.class, self.subclass)
    }

    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<Value> {
        self.payload
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn intercepted_at(&self) -> Option<u64> {
        self.intercepted_at
    }

    /// Stamp the interception time. Only the first call has any effect.
    ///
    /// Returns whether the stamp was applied.
    pub fn mark_intercepted(&mut self) -> bool {
        if self.intercepted_at.is_some() {
            return false;
        }
        self.intercepted_at = Some(now_millis());
        true
    }

    /// Whether this message belongs to the handshake class
    pub fn is_control(&self) -> bool {
        self.class == class::AUTH
    }

    /// Whether every payload element is free of non-finite floats
    pub fn has_finite_payload(&self) -> bool {
        self.payload.iter().all(Value::is_finite)
    }
}
