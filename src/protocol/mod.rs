//! # Protocol Layer
//!
//! Messages, connections and everything that routes between them.
//!
//! ## Components
//! - **Message**: routing keys, outcome codes and the typed payload
//! - **Connection**: per-stream state, send queue and I/O tasks
//! - **Handshake**: key exchange and identity reconciliation over the AUTH class
//! - **Dispatcher**: additive class and route handler tables
//! - **Registry**: identifier → connection table
//! - **Context**: process-wide state shared by connections
//! - **Credentials**: admin credential verification and session hashing

pub mod connection;
pub mod context;
pub mod credentials;
pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod registry;

#[cfg(test)]
mod tests;
