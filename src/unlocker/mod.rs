//! Automatic account unlocking
//!
//! Accounts start locked. When a signing request arrives for a locked
//! account the signer asks the unlocker to try its configured passphrases.

use crate::errors::{Result, StakeSignError};
use crate::keystore::{Account, Wallet};
use crate::security::SecureString;
use tracing::debug;

pub trait AutoUnlocker: Send + Sync {
    /// Try to unlock `account`.
    ///
    /// `Ok(false)` means no known passphrase fits; `Err` means the attempt
    /// itself could not be made.
    fn unlock(&self, wallet: &Wallet, account: &Account) -> Result<bool>;
}

/// Unlocker trying a fixed list of passphrases in order
pub struct KeysUnlocker {
    passphrases: Vec<SecureString>,
}

impl KeysUnlocker {
    pub fn new(passphrases: &[String]) -> Self {
        Self {
            passphrases: passphrases.iter().map(|p| SecureString::from(p.as_str())).collect(),
        }
    }
}

impl AutoUnlocker for KeysUnlocker {
    fn unlock(&self, wallet: &Wallet, account: &Account) -> Result<bool> {
        for passphrase in &self.passphrases {
            match account.unlock(passphrase.expose()) {
                Ok(()) => {
                    debug!("Unlocked {}/{}", wallet.name(), account.name());
                    return Ok(true);
                }
                Err(StakeSignError::DecryptionFailed(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }
}
