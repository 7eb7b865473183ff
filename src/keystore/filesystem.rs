//! Filesystem wallet store
//!
//! Layout under the base directory:
//!
//! ```text
//! <wallet uuid>/
//!     <wallet uuid>      wallet metadata
//!     <account uuid>     encrypted key file, one per account
//! ```

use super::WalletStore;
use crate::errors::{Result, StakeSignError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

#[derive(Deserialize)]
struct WalletName {
    name: String,
}

/// Wallet store rooted at a directory
pub struct FilesystemStore {
    name: String,
    base_path: PathBuf,
}

impl FilesystemStore {
    /// Create a store at `base_path`, creating the directory if needed
    pub fn new(name: &str, base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.exists() {
            fs::create_dir_all(&base_path)?;
        }
        Ok(Self {
            name: name.to_string(),
            base_path,
        })
    }

    fn wallet_dir(&self, wallet_id: Uuid) -> PathBuf {
        self.base_path.join(wallet_id.to_string())
    }

    fn wallet_dirs(&self) -> Result<Vec<(Uuid, PathBuf)>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| Uuid::parse_str(n).ok());
            if let Some(id) = id {
                dirs.push((id, path));
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

impl WalletStore for FilesystemStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn store_wallet(&self, wallet_id: Uuid, _wallet_name: &str, data: &[u8]) -> Result<()> {
        let dir = self.wallet_dir(wallet_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(wallet_id.to_string()), data)?;
        Ok(())
    }

    fn retrieve_wallet(&self, wallet_name: &str) -> Result<Vec<u8>> {
        for data in self.retrieve_wallets()? {
            match serde_json::from_slice::<WalletName>(&data) {
                Ok(w) if w.name == wallet_name => return Ok(data),
                Ok(_) => {}
                Err(e) => warn!("Unreadable wallet metadata in store {}: {}", self.name, e),
            }
        }
        Err(StakeSignError::NotFound(format!("wallet {}", wallet_name)))
    }

    fn retrieve_wallets(&self) -> Result<Vec<Vec<u8>>> {
        let mut wallets = Vec::new();
        for (id, dir) in self.wallet_dirs()? {
            let path = dir.join(id.to_string());
            if path.is_file() {
                wallets.push(fs::read(path)?);
            }
        }
        Ok(wallets)
    }

    fn store_account(&self, wallet_id: Uuid, account_id: Uuid, data: &[u8]) -> Result<()> {
        let dir = self.wallet_dir(wallet_id);
        if !dir.is_dir() {
            return Err(StakeSignError::NotFound(format!("wallet {}", wallet_id)));
        }
        fs::write(dir.join(account_id.to_string()), data)?;
        Ok(())
    }

    fn retrieve_accounts(&self, wallet_id: Uuid) -> Result<Vec<Vec<u8>>> {
        let dir = self.wallet_dir(wallet_id);
        if !dir.is_dir() {
            return Err(StakeSignError::NotFound(format!("wallet {}", wallet_id)));
        }

        let wallet_file = wallet_id.to_string();
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n != wallet_file && Uuid::parse_str(n).is_ok())
            })
            .collect();
        paths.sort();

        paths
            .into_iter()
            .map(|p| fs::read(p).map_err(StakeSignError::from))
            .collect()
    }
}
