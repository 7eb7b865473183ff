//! Durable state store backed by redb

use super::{check_key, check_value, StateStore};
use crate::errors::{Result, StakeSignError};
use redb::{Database, TableDefinition};
use std::path::Path;

const POLICY_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("policy_state");

/// State store persisted in a single redb file
pub struct RedbStateStore {
    db: Database,
}

impl RedbStateStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)?;
        {
            let w = db.begin_write()?;
            w.open_table(POLICY_STATE)?;
            w.commit()?;
        }
        Ok(Self { db })
    }
}

impl StateStore for RedbStateStore {
    fn fetch(&self, key: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        let r = self.db.begin_read()?;
        let table = r.open_table(POLICY_STATE)?;
        let value = table
            .get(key)?
            .map(|v| v.value().to_vec())
            .ok_or_else(|| StakeSignError::NotFound(String::from_utf8_lossy(key).into_owned()))?;
        Ok(value)
    }

    fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        check_value(value)?;
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(POLICY_STATE)?;
            table.insert(key, value)?;
        }
        w.commit()?;
        Ok(())
    }
}
