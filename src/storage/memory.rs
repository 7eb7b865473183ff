//! In-memory state store

use super::{check_key, check_value, StateStore};
use crate::errors::{Result, StakeSignError};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Volatile state store backed by a hash map
#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn fetch(&self, key: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StakeSignError::NotFound(String::from_utf8_lossy(key).into_owned()))
    }

    fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        check_value(value)?;
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}
