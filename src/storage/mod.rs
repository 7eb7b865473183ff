//! Policy state storage
//!
//! Rule state is persisted as opaque bytes under string keys. Two backends:
//! - In-memory map, used in tests and ephemeral deployments
//! - redb database, durable across restarts

pub mod memory;
pub mod redb_store;

pub use self::memory::MemoryStateStore;
pub use self::redb_store::RedbStateStore;

use crate::config::{StorageBackend, StorageConfig};
use crate::errors::{Result, StakeSignError};
use std::sync::Arc;
use tracing::info;

/// Key/value store for policy state
pub trait StateStore: Send + Sync {
    /// Fetch the value for `key`, or `NotFound` if it has never been stored
    fn fetch(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Store `value` under `key`, replacing any previous value
    fn store(&self, key: &[u8], value: &[u8]) -> Result<()>;
}

pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StakeSignError::StorageError("key cannot be empty".to_string()));
    }
    Ok(())
}

pub(crate) fn check_value(value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(StakeSignError::StorageError("value cannot be empty".to_string()));
    }
    Ok(())
}

/// Open the configured state store
pub fn open(config: &StorageConfig) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory policy state; state will not survive restarts");
            Ok(Arc::new(MemoryStateStore::new()))
        }
        StorageBackend::Redb => {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            info!("Opening policy state database at {:?}", config.path);
            Ok(Arc::new(RedbStateStore::open(&config.path)?))
        }
    }
}
