//! Identifier → connection table shared by one context.
//!
//! Connections update their own entry while holding their session lock, so the
//! registry lock is always taken second. Iterate through [`ConnectionRegistry::snapshot`],
//! never by calling into connections with the registry locked.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::connection::Connection;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<u64, Connection>>> {
        self.connections
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_LOCK.to_string()))
    }

    /// Register `connection` under `id`, returning whatever held that id before
    pub fn insert(&self, id: u64, connection: Connection) -> Result<Option<Connection>> {
        Ok(self.lock()?.insert(id, connection))
    }

    /// Remove `id` only while it still maps to `connection`
    pub fn remove_if_same(&self, id: u64, connection: &Connection) -> Result<bool> {
        let mut connections = self.lock()?;
        match connections.get(&id) {
            Some(existing) if existing.same_as(connection) => {
                connections.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Move the entry for `connection` from `from` to `to`.
    ///
    /// A missing `from` entry is not an error; the connection is simply inserted under `to`.
    pub fn rekey(&self, from: u64, to: u64, connection: &Connection) -> Result<()> {
        let mut connections = self.lock()?;
        if matches!(connections.get(&from), Some(existing) if existing.same_as(connection)) {
            connections.remove(&from);
        }
        connections.insert(to, connection.clone());
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Option<Connection>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    pub fn contains(&self, id: u64) -> Result<bool> {
        Ok(self.lock()?.contains_key(&id))
    }

    /// Copy of all entries; callers iterate without holding the lock
    pub fn snapshot(&self) -> Result<Vec<Connection>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
