//! In-memory key-value store adapter.
//!
//! Host-side stand-in for the platform's persistent store.  Writes are
//! atomic by construction (whole-blob replacement under one lock), which
//! matches the contract the core relies on.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::app::ports::StorePort;
use crate::error::StoreError;

/// Namespaced in-memory blob store.
pub struct MemStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn slot(namespace: &str, key: &str) -> String {
        format!("{namespace}/{key}")
    }
}

impl StorePort for MemStore {
    fn read(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| StoreError::Io)?
            .get(&Self::slot(namespace, key))
            .cloned())
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Io)?
            .insert(Self::slot(namespace, key), data.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Io)?
            .remove(&Self::slot(namespace, key));
        Ok(())
    }
}
