//! Session registry
//!
//! Maps peer addresses to their [`Connection`]. Only the server loop touches
//! the registry, so it is a plain map without locking.

use rak_protocol::{AddressKey, Connection};
use std::collections::HashMap;
use thiserror::Error;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry is full (max {max} connections)")]
    Full { max: usize },

    #[error("Address already registered: {0}")]
    AlreadyRegistered(AddressKey),
}

/// Live connections keyed by peer address
pub struct SessionRegistry {
    connections: HashMap<AddressKey, Connection>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        SessionRegistry {
            connections: HashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Register a connection under its own address
    pub fn add(&mut self, connection: Connection) -> Result<(), RegistryError> {
        let key = connection.address();
        if self.connections.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered(key));
        }
        if self.is_full() {
            return Err(RegistryError::Full { max: self.capacity });
        }
        self.connections.insert(key, connection);
        Ok(())
    }

    pub fn remove(&mut self, key: &AddressKey) -> Option<Connection> {
        self.connections.remove(key)
    }

    pub fn get(&self, key: &AddressKey) -> Option<&Connection> {
        self.connections.get(key)
    }

    pub fn get_mut(&mut self, key: &AddressKey) -> Option<&mut Connection> {
        self.connections.get_mut(key)
    }

    pub fn has(&self, key: &AddressKey) -> bool {
        self.connections.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AddressKey, &Connection)> {
        self.connections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&AddressKey, &mut Connection)> {
        self.connections.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &AddressKey> {
        self.connections.keys()
    }
}
