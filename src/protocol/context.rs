//! # Protocol Context
//!
//! Everything shared by the connections of one process: configuration, the
//! transform pipeline, the connection registry, process-wide handlers, metrics,
//! the identifier allocator and the admin credential verifier.
//!
//! Built once at startup and handed to each connection as an `Arc`. Dropping the last
//! reference tears it down; there is no global state.

use crate::config::ProtocolConfig;
use crate::core::pipeline::Pipeline;
use crate::core::serialization::SerializationRegistry;
use crate::error::{ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::credentials::CredentialVerifier;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::Message;
use crate::protocol::registry::ConnectionRegistry;
use crate::utils::metrics::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::warn;

pub struct ProtocolContext {
    config: ProtocolConfig,
    pipeline: Pipeline,
    connections: ConnectionRegistry,
    dispatcher: Dispatcher,
    metrics: Metrics,
    next_id: AtomicU64,
    next_provisional: AtomicU64,
    verifier: OnceLock<Box<dyn CredentialVerifier>>,
}

impl std::fmt::Debug for ProtocolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolContext")
            .field("connections", &self.connections.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ProtocolContext {
    pub fn new(config: ProtocolConfig) -> Arc<Self> {
        Self::with_serializers(config, SerializationRegistry::with_defaults())
    }

    /// Context with a caller-assembled serialization registry
    pub fn with_serializers(config: ProtocolConfig, serializers: SerializationRegistry) -> Arc<Self> {
        let pipeline = Pipeline::new(serializers, &config.transport);
        let first_id = config.connection.first_connection_id.max(1);
        Arc::new(Self {
            config,
            pipeline,
            connections: ConnectionRegistry::new(),
            dispatcher: Dispatcher::new(),
            metrics: Metrics::new(),
            next_id: AtomicU64::new(first_id),
            // Provisional ids count down from the top so they never collide with canonical ones
            next_provisional: AtomicU64::new(u64::MAX),
            verifier: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Process-wide handlers, run after each connection's own
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Next canonical identifier
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn allocate_provisional_id(&self) -> u64 {
        self.next_provisional.fetch_sub(1, Ordering::Relaxed)
    }

    /// Install the admin credential verifier. Can be set once.
    pub fn set_verifier<V>(&self, verifier: V) -> Result<()>
    where
        V: CredentialVerifier + 'static,
    {
        self.verifier
            .set(Box::new(verifier))
            .map_err(|_| ProtocolError::ConfigError("Credential verifier already set".to_string()))
    }

    /// Whether `credential` grants admin rights. Always false without a verifier.
    pub fn verify_credential(&self, credential: &str) -> bool {
        match self.verifier.get() {
            Some(verifier) => verifier.verify(credential),
            None => {
                warn!("Admin credential received but no verifier is configured");
                false
            }
        }
    }

    pub fn connection(&self, id: u64) -> Result<Option<Connection>> {
        self.connections.get(id)
    }

    /// Send `message` to every ready connection. Returns how many accepted it.
    pub fn broadcast(&self, message: &Message) -> Result<usize> {
        let mut sent = 0;
        for connection in self.connections.snapshot()? {
            if !connection.is_ready() {
                continue;
            }
            match connection.send(message.clone()) {
                Ok(()) => sent += 1,
                Err(e) => warn!(connection_id = connection.id(), error = %e, "Broadcast send failed"),
            }
        }
        Ok(sent)
    }
}
