//! # Dispatch Router
//!
//! Handlers keyed by class and by (class, sub-class). Registration is additive:
//! every handler registered for a key fires, in registration order.
//!
//! `dispatch` runs class handlers, then route handlers. Interceptors are invoked
//! separately through `intercept` so a context can run them ahead of every
//! connection's own tables. A handler that fails or panics is logged and skipped;
//! the rest still run.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use crate::protocol::message::Message;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Callback invoked for a decoded message
pub type Handler = Arc<dyn Fn(&Connection, &Message) -> Result<()> + Send + Sync + 'static>;

/// Additive handler tables.
#[derive(Clone, Default)]
pub struct Dispatcher {
    interceptors: Arc<RwLock<Vec<Handler>>>,
    by_class: Arc<RwLock<HashMap<u8, Vec<Handler>>>>,
    by_route: Arc<RwLock<HashMap<(u8, u8), Vec<Handler>>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `handler` for every message passed to [`Dispatcher::intercept`]
    pub fn register_interceptor<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Message) -> Result<()> + Send + Sync + 'static,
    {
        let mut interceptors = self.interceptors.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;
        interceptors.push(Arc::new(handler));
        Ok(())
    }

    pub fn register_class<F>(&self, class: u8, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Message) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.by_class.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;
        handlers.entry(class).or_default().push(Arc::new(handler));
        Ok(())
    }

    pub fn register_route<F>(&self, class: u8, subclass: u8, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Message) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.by_route.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;
        handlers
            .entry((class, subclass))
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Number of class and route handlers that would fire for `(class, subclass)`
    pub fn handler_count(&self, class: u8, subclass: u8) -> Result<usize> {
        Ok(self.handlers_for(class, subclass)?.len())
    }

    /// Invoke every interceptor. Returns how many failed.
    pub fn intercept(&self, connection: &Connection, message: &Message) -> Result<usize> {
        let interceptors = self
            .interceptors
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?
            .clone();
        Ok(invoke(&interceptors, connection, message))
    }

    /// Invoke class handlers, then route handlers. Returns how many failed.
    ///
    /// Handlers run on a snapshot taken before the first call, so a handler may
    /// register further handlers without deadlocking; those fire from the next message on.
    pub fn dispatch(&self, connection: &Connection, message: &Message) -> Result<usize> {
        let handlers = self.handlers_for(message.class(), message.subclass())?;
        Ok(invoke(&handlers, connection, message))
    }

    fn handlers_for(&self, class: u8, subclass: u8) -> Result<Vec<Handler>> {
        let read_err = || ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string());

        let mut handlers = Vec::new();
        if let Some(list) = self.by_class.read().map_err(|_| read_err())?.get(&class) {
            handlers.extend(list.iter().cloned());
        }
        if let Some(list) = self
            .by_route
            .read()
            .map_err(|_| read_err())?
            .get(&(class, subclass))
        {
            handlers.extend(list.iter().cloned());
        }
        Ok(handlers)
    }
}

fn invoke(handlers: &[Handler], connection: &Connection, message: &Message) -> usize {
    let mut failures = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(connection, message))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                warn!(
                    connection_id = connection.id(),
                    class = message.class(),
                    subclass = message.subclass(),
                    error = %e,
                    "Handler failed"
                );
            }
            Err(_) => {
                failures += 1;
                warn!(
                    connection_id = connection.id(),
                    class = message.class(),
                    subclass = message.subclass(),
                    "Handler panicked"
                );
            }
        }
    }
    failures
}
