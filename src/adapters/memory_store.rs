//! In-memory key-value store.
//!
//! Implements [`StoragePort`] for the host simulator and tests.  Writes
//! replace the whole value, so they are trivially atomic.

use std::collections::HashMap;

use log::debug;

use crate::app::ports::{StorageError, StoragePort};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    store: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }
}

impl StoragePort for MemoryStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self
            .store
            .get(&Self::composite_key(namespace, key))
            .ok_or(StorageError::NotFound)?;
        let dest = buf.get_mut(..data.len()).ok_or(StorageError::BufferTooSmall)?;
        dest.copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        debug!("STORE | {}::{} <- {} bytes", namespace, key, data.len());
        self.store
            .insert(Self::composite_key(namespace, key), data.to_vec());
        Ok(())
    }
}
