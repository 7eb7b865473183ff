//! Account resolution with caching
//!
//! Resolves `wallet/account` paths and public keys to account handles.
//! Handles are cached so lock state set through one request is seen by the
//! next. Each of the three caches has its own lock; racing misses may both
//! hit the stores, but the first handle cached wins and every caller gets it.

use crate::errors::{Result, StakeSignError};
use crate::keystore::{split_path, Account, Wallet, WalletStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A resolved account together with the wallet that holds it
pub type ResolvedAccount = (Arc<Wallet>, Arc<Account>);

pub struct AccountFetcher {
    stores: Vec<Arc<dyn WalletStore>>,
    wallets: RwLock<HashMap<String, Arc<Wallet>>>,
    accounts: RwLock<HashMap<String, Arc<Account>>>,
    pubkey_paths: RwLock<HashMap<Vec<u8>, String>>,
}

impl AccountFetcher {
    pub fn new(stores: Vec<Arc<dyn WalletStore>>) -> Result<Self> {
        if stores.is_empty() {
            return Err(StakeSignError::ConfigError("no stores provided".to_string()));
        }
        Ok(Self {
            stores,
            wallets: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
            pubkey_paths: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve the wallet component of `path`
    pub fn fetch_wallet(&self, path: &str) -> Result<Arc<Wallet>> {
        let (wallet_name, _) = split_path(path)?;

        if let Some(wallet) = self.wallets.read().get(wallet_name) {
            return Ok(wallet.clone());
        }

        let wallet = self
            .stores
            .iter()
            .find_map(|store| Wallet::open(wallet_name, store.clone()).ok())
            .ok_or_else(|| StakeSignError::NotFound(format!("wallet {}", wallet_name)))?;

        Ok(self.cache_wallet(wallet))
    }

    /// Resolve a full `wallet/account` path
    pub fn fetch_account(&self, path: &str) -> Result<ResolvedAccount> {
        let wallet = self.fetch_wallet(path)?;

        if let Some(account) = self.accounts.read().get(path) {
            debug!(path, "account found in cache");
            return Ok((wallet, account.clone()));
        }

        let (_, account_name) = split_path(path)?;
        let account = self.cache_account(&wallet, wallet.account_by_name(account_name)?);
        debug!(path, "account stored in cache");
        Ok((wallet, account))
    }

    /// Resolve an account by its public key.
    ///
    /// Unknown keys trigger a full walk of every store.
    pub fn fetch_account_by_key(&self, public_key: &[u8]) -> Result<ResolvedAccount> {
        let known = self.pubkey_paths.read().get(public_key).cloned();
        if let Some(path) = known {
            return self.fetch_account(&path);
        }

        for store in &self.stores {
            for data in store.retrieve_wallets()? {
                let wallet = match Wallet::decode(&data, store.clone()) {
                    Ok(wallet) => wallet,
                    Err(e) => {
                        warn!("Failed to decode wallet in store {}: {}", store.name(), e);
                        continue;
                    }
                };
                let accounts = match wallet.accounts() {
                    Ok(accounts) => accounts,
                    Err(e) => {
                        warn!("Failed to list accounts of wallet {}: {}", wallet.name(), e);
                        continue;
                    }
                };
                if let Some(account) = accounts.into_iter().find(|a| a.public_key() == public_key)
                {
                    return Ok(self.cache_found(wallet, account));
                }
            }
        }

        Err(StakeSignError::NotFound(format!(
            "account with public key {}",
            hex::encode(public_key)
        )))
    }

    fn cache_found(&self, wallet: Wallet, account: Account) -> ResolvedAccount {
        let wallet = self.cache_wallet(wallet);
        let account = self.cache_account(&wallet, account);
        (wallet, account)
    }

    /// Cache `wallet` unless another handle got there first; returns the cached one
    fn cache_wallet(&self, wallet: Wallet) -> Arc<Wallet> {
        self.wallets
            .write()
            .entry(wallet.name().to_string())
            .or_insert_with(|| Arc::new(wallet))
            .clone()
    }

    /// Cache `account` under its path unless another handle got there first.
    ///
    /// Returns the cached handle, so lock state set on it is never lost to a
    /// racing miss.
    fn cache_account(&self, wallet: &Wallet, account: Account) -> Arc<Account> {
        let path = format!("{}/{}", wallet.name(), account.name());
        let account = self
            .accounts
            .write()
            .entry(path.clone())
            .or_insert_with(|| Arc::new(account))
            .clone();
        self.pubkey_paths
            .write()
            .insert(account.public_key().to_vec(), path);
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::testing::wallet_with_accounts;
    use crate::keystore::MemoryWalletStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Store wrapper counting wallet scans and lookups
    struct CountingStore {
        inner: MemoryWalletStore,
        scans: AtomicUsize,
        lookups: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryWalletStore::new("counting"),
                scans: AtomicUsize::new(0),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl WalletStore for CountingStore {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn store_wallet(&self, wallet_id: Uuid, wallet_name: &str, data: &[u8]) -> Result<()> {
            self.inner.store_wallet(wallet_id, wallet_name, data)
        }

        fn retrieve_wallet(&self, wallet_name: &str) -> Result<Vec<u8>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.retrieve_wallet(wallet_name)
        }

        fn retrieve_wallets(&self) -> Result<Vec<Vec<u8>>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.retrieve_wallets()
        }

        fn store_account(&self, wallet_id: Uuid, account_id: Uuid, data: &[u8]) -> Result<()> {
            self.inner.store_account(wallet_id, account_id, data)
        }

        fn retrieve_accounts(&self, wallet_id: Uuid) -> Result<Vec<Vec<u8>>> {
            self.inner.retrieve_accounts(wallet_id)
        }
    }

    fn setup() -> (Arc<CountingStore>, AccountFetcher, Vec<Account>) {
        let store = Arc::new(CountingStore::new());
        let (_, accounts) = wallet_with_accounts(
            store.clone(),
            "Validators",
            &[("1", "one"), ("2", "two")],
        );
        let fetcher = AccountFetcher::new(vec![store.clone() as Arc<dyn WalletStore>]).unwrap();
        store.lookups.store(0, Ordering::SeqCst);
        store.scans.store(0, Ordering::SeqCst);
        (store, fetcher, accounts)
    }

    #[test]
    fn test_requires_stores() {
        assert!(AccountFetcher::new(vec![]).is_err());
    }

    #[test]
    fn test_fetch_wallet_caches() {
        let (store, fetcher, _) = setup();
        let first = fetcher.fetch_wallet("Validators/1").unwrap();
        let second = fetcher.fetch_wallet("Validators").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
        assert!(matches!(
            fetcher.fetch_wallet("Missing"),
            Err(StakeSignError::NotFound(_))
        ));
        assert!(fetcher.fetch_wallet("").is_err());
    }

    #[test]
    fn test_fetch_account_returns_same_handle() {
        let (_, fetcher, _) = setup();
        let (_, first) = fetcher.fetch_account("Validators/1").unwrap();
        first.unlock("one").unwrap();
        let (wallet, second) = fetcher.fetch_account("Validators/1").unwrap();
        assert_eq!(wallet.name(), "Validators");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_unlocked());
        assert!(fetcher.fetch_account("Validators/3").is_err());
    }

    #[test]
    fn test_fetch_account_by_key_scans_once() {
        let (store, fetcher, accounts) = setup();
        let key = accounts[1].public_key().to_vec();

        let (_, first) = fetcher.fetch_account_by_key(&key).unwrap();
        assert_eq!(first.name(), "2");
        assert_eq!(store.scans.load(Ordering::SeqCst), 1);

        let (_, second) = fetcher.fetch_account_by_key(&key).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.scans.load(Ordering::SeqCst), 1);

        // The reverse index also serves lookups by name.
        let (_, by_name) = fetcher.fetch_account("Validators/2").unwrap();
        assert!(Arc::ptr_eq(&first, &by_name));
    }

    #[test]
    fn test_fetch_by_key_after_name_uses_index() {
        let (store, fetcher, accounts) = setup();
        let (_, by_name) = fetcher.fetch_account("Validators/1").unwrap();
        let (_, by_key) = fetcher
            .fetch_account_by_key(accounts[0].public_key())
            .unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_key));
        assert_eq!(store.scans.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_racing_miss_keeps_first_handle() {
        let (_, fetcher, _) = setup();
        let (wallet, first) = fetcher.fetch_account("Validators/1").unwrap();
        first.unlock("one").unwrap();

        // A second miss that resolved the account independently.
        let late = wallet.account_by_name("1").unwrap();
        assert!(!late.is_unlocked());
        let cached = fetcher.cache_account(&wallet, late);
        assert!(Arc::ptr_eq(&first, &cached));

        let (_, again) = fetcher.fetch_account("Validators/1").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(again.is_unlocked());

        let late_wallet = Wallet::open("Validators", wallet_store(&fetcher)).unwrap();
        assert!(Arc::ptr_eq(&wallet, &fetcher.cache_wallet(late_wallet)));
    }

    #[test]
    fn test_concurrent_misses_share_handle() {
        let (_, fetcher, _) = setup();
        let fetcher = Arc::new(fetcher);
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let fetcher = fetcher.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    fetcher.fetch_account("Validators/2").unwrap().1
                })
            })
            .collect();
        let accounts: Vec<Arc<Account>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let (_, cached) = fetcher.fetch_account("Validators/2").unwrap();
        assert!(accounts.iter().all(|a| Arc::ptr_eq(a, &cached)));
    }

    fn wallet_store(fetcher: &AccountFetcher) -> Arc<dyn WalletStore> {
        fetcher.stores[0].clone()
    }

    #[test]
    fn test_unknown_key() {
        let (_, fetcher, _) = setup();
        assert!(matches!(
            fetcher.fetch_account_by_key(&[0u8; 48]),
            Err(StakeSignError::NotFound(_))
        ));
    }
}
