//! Wallet and account handles
//!
//! Wallets are non-deterministic: every account holds an independently
//! generated BLS12-381 secret key in its own encrypted key file.

use super::encrypted::{EncryptedKeyFile, KdfParams};
use super::WalletStore;
use crate::errors::{Result, StakeSignError};
use blst::min_pk::SecretKey;
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

pub const WALLET_TYPE: &str = "non-deterministic";

const WALLET_VERSION: u32 = 1;

/// Length of a compressed BLS public key
pub const PUBLIC_KEY_LENGTH: usize = 48;

/// Proof-of-possession ciphersuite used by beacon chain validators
const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletInfo {
    uuid: Uuid,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    version: u32,
}

/// A named collection of accounts within one store
pub struct Wallet {
    info: WalletInfo,
    store: Arc<dyn WalletStore>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("name", &self.info.name)
            .field("uuid", &self.info.uuid)
            .field("store", &self.store.name())
            .finish()
    }
}

impl Wallet {
    /// Create a new empty wallet
    pub fn create(name: &str, store: Arc<dyn WalletStore>) -> Result<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(StakeSignError::WalletError(format!(
                "invalid wallet name {:?}",
                name
            )));
        }
        if store.retrieve_wallet(name).is_ok() {
            return Err(StakeSignError::WalletError(format!(
                "wallet {} already exists",
                name
            )));
        }

        let info = WalletInfo {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            kind: WALLET_TYPE.to_string(),
            version: WALLET_VERSION,
        };
        store.store_wallet(info.uuid, &info.name, &serde_json::to_vec(&info)?)?;
        info!("Created wallet {} in store {}", name, store.name());

        Ok(Self { info, store })
    }

    /// Open a wallet by name
    pub fn open(name: &str, store: Arc<dyn WalletStore>) -> Result<Self> {
        let data = store.retrieve_wallet(name)?;
        Self::decode(&data, store)
    }

    /// Build a handle from stored wallet metadata
    pub fn decode(data: &[u8], store: Arc<dyn WalletStore>) -> Result<Self> {
        let info: WalletInfo = serde_json::from_slice(data)
            .map_err(|e| StakeSignError::WalletError(format!("invalid wallet data: {}", e)))?;
        if info.kind != WALLET_TYPE {
            return Err(StakeSignError::WalletError(format!(
                "unsupported wallet type {}",
                info.kind
            )));
        }
        Ok(Self { info, store })
    }

    pub fn id(&self) -> Uuid {
        self.info.uuid
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// All accounts in the wallet; unreadable key files are skipped
    pub fn accounts(&self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        for data in self.store.retrieve_accounts(self.info.uuid)? {
            match Account::decode(&data) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!("Skipping unreadable account in wallet {}: {}", self.name(), e),
            }
        }
        Ok(accounts)
    }

    pub fn account_by_name(&self, name: &str) -> Result<Account> {
        self.accounts()?
            .into_iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| StakeSignError::NotFound(format!("{}/{}", self.name(), name)))
    }

    /// Generate a fresh key and store it as a new account
    pub fn create_account(&self, name: &str, passphrase: &str, kdf: KdfParams) -> Result<Account> {
        let mut ikm = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut ikm[..]);
        let secret = SecretKey::key_gen(&ikm[..], &[])
            .map_err(|e| StakeSignError::WalletError(format!("key generation failed: {:?}", e)))?;
        self.store_account(name, &secret, passphrase, kdf)
    }

    /// Store an existing 32-byte secret key as a new account
    pub fn import_account(
        &self,
        name: &str,
        secret: &[u8],
        passphrase: &str,
        kdf: KdfParams,
    ) -> Result<Account> {
        let secret = SecretKey::from_bytes(secret)
            .map_err(|e| StakeSignError::WalletError(format!("invalid secret key: {:?}", e)))?;
        self.store_account(name, &secret, passphrase, kdf)
    }

    fn store_account(
        &self,
        name: &str,
        secret: &SecretKey,
        passphrase: &str,
        kdf: KdfParams,
    ) -> Result<Account> {
        if name.is_empty() || name.contains('/') {
            return Err(StakeSignError::WalletError(format!(
                "invalid account name {:?}",
                name
            )));
        }
        if self.accounts()?.iter().any(|a| a.name() == name) {
            return Err(StakeSignError::WalletError(format!(
                "account {}/{} already exists",
                self.name(),
                name
            )));
        }

        let public_key = secret.sk_to_pk().compress();
        let secret_bytes = Zeroizing::new(secret.to_bytes());
        let keyfile = EncryptedKeyFile::new(
            Uuid::new_v4(),
            name,
            &secret_bytes[..],
            &public_key,
            passphrase,
            kdf,
        )?;
        self.store
            .store_account(self.info.uuid, keyfile.uuid, &serde_json::to_vec_pretty(&keyfile)?)?;
        debug!("Created account {}/{}", self.name(), name);

        Account::from_keyfile(keyfile)
    }
}

/// A validator account. Starts locked; signing requires `unlock`.
pub struct Account {
    keyfile: EncryptedKeyFile,
    public_key: Vec<u8>,
    secret: RwLock<Option<SecretKey>>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.keyfile.name)
            .field("public_key", &self.keyfile.public_key)
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

impl Account {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let keyfile: EncryptedKeyFile = serde_json::from_slice(data)
            .map_err(|e| StakeSignError::WalletError(format!("invalid account data: {}", e)))?;
        Self::from_keyfile(keyfile)
    }

    pub fn from_keyfile(keyfile: EncryptedKeyFile) -> Result<Self> {
        let public_key = keyfile.public_key_bytes()?;
        if public_key.len() != PUBLIC_KEY_LENGTH {
            return Err(StakeSignError::WalletError(format!(
                "account {} has a public key of {} bytes",
                keyfile.name,
                public_key.len()
            )));
        }
        Ok(Self {
            keyfile,
            public_key,
            secret: RwLock::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.keyfile.uuid
    }

    pub fn name(&self) -> &str {
        &self.keyfile.name
    }

    /// Compressed 48-byte public key
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn is_unlocked(&self) -> bool {
        self.secret.read().is_some()
    }

    /// Decrypt the secret key into memory.
    ///
    /// Returns `DecryptionFailed` for a wrong passphrase.
    pub fn unlock(&self, passphrase: &str) -> Result<()> {
        let secret = self.keyfile.decrypt(passphrase)?;
        let secret = SecretKey::from_bytes(secret.expose())
            .map_err(|e| StakeSignError::WalletError(format!("invalid secret key: {:?}", e)))?;
        if secret.sk_to_pk().compress()[..] != self.public_key[..] {
            return Err(StakeSignError::WalletError(format!(
                "secret key of {} does not match its public key",
                self.name()
            )));
        }
        *self.secret.write() = Some(secret);
        Ok(())
    }

    /// Drop the decrypted secret key
    pub fn lock(&self) {
        self.secret.write().take();
    }

    /// Sign a 32-byte signing root, returning the compressed 96-byte signature
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let secret = self.secret.read();
        let secret = secret
            .as_ref()
            .ok_or_else(|| StakeSignError::Locked(self.name().to_string()))?;
        Ok(secret.sign(message, BLS_DST, &[]).compress().to_vec())
    }
}

#[cfg(test)]
pub(crate) fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    use blst::min_pk::{PublicKey, Signature};
    use blst::BLST_ERROR;

    let (Ok(pk), Ok(sig)) = (
        PublicKey::from_bytes(public_key),
        Signature::from_bytes(signature),
    ) else {
        return false;
    };
    sig.verify(true, message, BLS_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}
