//! In-memory wallet store

use super::WalletStore;
use crate::errors::{Result, StakeSignError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

struct StoredWallet {
    name: String,
    data: Vec<u8>,
    accounts: BTreeMap<Uuid, Vec<u8>>,
}

/// Wallet store that lives only as long as the process
pub struct MemoryWalletStore {
    name: String,
    wallets: RwLock<BTreeMap<Uuid, StoredWallet>>,
}

impl MemoryWalletStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            wallets: RwLock::new(BTreeMap::new()),
        }
    }
}

impl WalletStore for MemoryWalletStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn store_wallet(&self, wallet_id: Uuid, wallet_name: &str, data: &[u8]) -> Result<()> {
        let mut wallets = self.wallets.write();
        let entry = wallets.entry(wallet_id).or_insert_with(|| StoredWallet {
            name: wallet_name.to_string(),
            data: Vec::new(),
            accounts: BTreeMap::new(),
        });
        entry.name = wallet_name.to_string();
        entry.data = data.to_vec();
        Ok(())
    }

    fn retrieve_wallet(&self, wallet_name: &str) -> Result<Vec<u8>> {
        self.wallets
            .read()
            .values()
            .find(|w| w.name == wallet_name)
            .map(|w| w.data.clone())
            .ok_or_else(|| StakeSignError::NotFound(format!("wallet {}", wallet_name)))
    }

    fn retrieve_wallets(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.wallets.read().values().map(|w| w.data.clone()).collect())
    }

    fn store_account(&self, wallet_id: Uuid, account_id: Uuid, data: &[u8]) -> Result<()> {
        let mut wallets = self.wallets.write();
        let wallet = wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| StakeSignError::NotFound(format!("wallet {}", wallet_id)))?;
        wallet.accounts.insert(account_id, data.to_vec());
        Ok(())
    }

    fn retrieve_accounts(&self, wallet_id: Uuid) -> Result<Vec<Vec<u8>>> {
        self.wallets
            .read()
            .get(&wallet_id)
            .map(|w| w.accounts.values().cloned().collect())
            .ok_or_else(|| StakeSignError::NotFound(format!("wallet {}", wallet_id)))
    }
}
