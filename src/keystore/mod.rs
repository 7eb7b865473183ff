//! Wallets and validator accounts
//!
//! This module provides:
//! - Encrypted per-account key files
//! - Wallet and account handles with lock/unlock and BLS signing
//! - Backing stores (filesystem and in-memory) holding raw wallet data

pub mod encrypted;
pub mod filesystem;
pub mod memory;
pub mod wallet;

pub use encrypted::{EncryptedKeyFile, KdfParams};
pub use filesystem::FilesystemStore;
pub use memory::MemoryWalletStore;
pub use wallet::{Account, Wallet, WALLET_TYPE};

use crate::config::WalletsConfig;
use crate::errors::{Result, StakeSignError};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Raw persistence for wallets and their accounts
pub trait WalletStore: Send + Sync {
    /// Human-readable store name, used in logs
    fn name(&self) -> &str;

    fn store_wallet(&self, wallet_id: Uuid, wallet_name: &str, data: &[u8]) -> Result<()>;

    /// Metadata of the wallet called `wallet_name`
    fn retrieve_wallet(&self, wallet_name: &str) -> Result<Vec<u8>>;

    /// Metadata of every wallet in the store
    fn retrieve_wallets(&self) -> Result<Vec<Vec<u8>>>;

    fn store_account(&self, wallet_id: Uuid, account_id: Uuid, data: &[u8]) -> Result<()>;

    /// Key files of every account in a wallet
    fn retrieve_accounts(&self, wallet_id: Uuid) -> Result<Vec<Vec<u8>>>;
}

/// Split `wallet/account` into its components.
///
/// A path without a separator names only a wallet; everything after the
/// first separator is the account part.
pub fn split_path(path: &str) -> Result<(&str, &str)> {
    if path.is_empty() {
        return Err(StakeSignError::InvalidRequest(
            "invalid account format".to_string(),
        ));
    }
    Ok(match path.split_once('/') {
        Some((wallet, account)) => (wallet, account),
        None => (path, ""),
    })
}

/// Open the configured filesystem wallet stores, in search order
pub fn open_stores(config: &WalletsConfig) -> Result<Vec<Arc<dyn WalletStore>>> {
    let mut stores: Vec<Arc<dyn WalletStore>> = Vec::with_capacity(config.stores.len());
    for store in &config.stores {
        info!("Opening wallet store {} at {:?}", store.name, store.path);
        stores.push(Arc::new(FilesystemStore::new(&store.name, &store.path)?));
    }
    Ok(stores)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Create `wallet_name` in `store` with one account per entry, each
    /// encrypted under its passphrase with cheap KDF settings.
    pub(crate) fn wallet_with_accounts(
        store: Arc<dyn WalletStore>,
        wallet_name: &str,
        accounts: &[(&str, &str)],
    ) -> (Wallet, Vec<Account>) {
        let wallet = Wallet::create(wallet_name, store).unwrap();
        let created = accounts
            .iter()
            .map(|(name, passphrase)| {
                wallet
                    .create_account(name, passphrase, KdfParams::light())
                    .unwrap()
            })
            .collect();
        (wallet, created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("Wallet/Account").unwrap(), ("Wallet", "Account"));
        assert_eq!(split_path("Wallet").unwrap(), ("Wallet", ""));
        assert_eq!(split_path("Wallet/").unwrap(), ("Wallet", ""));
        assert_eq!(split_path("/Account").unwrap(), ("", "Account"));
        assert_eq!(split_path("Wallet/a/b").unwrap(), ("Wallet", "a/b"));
        assert!(split_path("").is_err());
    }
}
