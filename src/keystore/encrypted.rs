//! Encrypted account key files
//!
//! Each account's BLS secret key is encrypted at rest with AES-256-GCM under
//! a key derived from the account passphrase with Argon2id. The Argon2
//! parameters travel with the file so they can be tuned per deployment.

use crate::errors::{Result, StakeSignError};
use crate::security::SecureBytes;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Salt size for Argon2
const SALT_SIZE: usize = 16;

/// Nonce size for AES-GCM
const NONCE_SIZE: usize = 12;

/// Current key file format
const KEYFILE_VERSION: u32 = 1;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and throwaway wallets
    pub fn light() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Encrypted account file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKeyFile {
    /// Version of the encryption format
    pub version: u32,

    pub uuid: Uuid,

    pub name: String,

    /// Compressed BLS public key (hex)
    pub public_key: String,

    pub kdf: KdfParams,

    /// Salt for key derivation (base64)
    pub salt: String,

    /// Nonce for AES-GCM (base64)
    pub nonce: String,

    /// Encrypted secret key (base64)
    pub ciphertext: String,

    /// Creation timestamp
    pub created_at: i64,
}

impl EncryptedKeyFile {
    /// Encrypt `secret` under `passphrase`
    pub fn new(
        uuid: Uuid,
        name: &str,
        secret: &[u8],
        public_key: &[u8],
        passphrase: &str,
        kdf: KdfParams,
    ) -> Result<Self> {
        let mut salt_bytes = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let encryption_key = derive_key(passphrase, &salt_bytes, &kdf)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(encryption_key.as_slice())
            .map_err(|e| StakeSignError::WalletError(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret)
            .map_err(|e| StakeSignError::WalletError(e.to_string()))?;

        Ok(Self {
            version: KEYFILE_VERSION,
            uuid,
            name: name.to_string(),
            public_key: hex::encode(public_key),
            kdf,
            salt: STANDARD.encode(salt_bytes),
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(&ciphertext),
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Decrypt the secret key.
    ///
    /// A wrong passphrase yields `DecryptionFailed`; a malformed file yields
    /// `WalletError`.
    pub fn decrypt(&self, passphrase: &str) -> Result<SecureBytes> {
        if self.version != KEYFILE_VERSION {
            return Err(StakeSignError::WalletError(format!(
                "unsupported key file version {}",
                self.version
            )));
        }

        let salt_bytes = decode_field("salt", &self.salt)?;
        let nonce_bytes = decode_field("nonce", &self.nonce)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(StakeSignError::WalletError("invalid nonce length".to_string()));
        }
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;

        let decryption_key = derive_key(passphrase, &salt_bytes, &self.kdf)?;
        let cipher = Aes256Gcm::new_from_slice(decryption_key.as_slice())
            .map_err(|e| StakeSignError::WalletError(e.to_string()))?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| StakeSignError::DecryptionFailed("incorrect passphrase".to_string()))?;

        Ok(SecureBytes::new(plaintext))
    }

    /// Decoded public key bytes
    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.public_key)
            .map_err(|e| StakeSignError::WalletError(format!("invalid public key: {}", e)))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| StakeSignError::WalletError(format!("invalid {}: {}", name, e)))
}

/// Derive an encryption key from a passphrase using Argon2id
fn derive_key(passphrase: &str, salt: &[u8], kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| StakeSignError::WalletError(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut output[..])
        .map_err(|e| StakeSignError::WalletError(e.to_string()))?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyfile(passphrase: &str) -> EncryptedKeyFile {
        EncryptedKeyFile::new(
            Uuid::new_v4(),
            "Account 1",
            &[7u8; 32],
            &[1u8; 48],
            passphrase,
            KdfParams::light(),
        )
        .unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let encrypted = keyfile("secret");
        let decrypted = encrypted.decrypt("secret").unwrap();
        assert_eq!(decrypted.expose(), &[7u8; 32]);
        assert_eq!(encrypted.public_key_bytes().unwrap(), vec![1u8; 48]);
    }

    #[test]
    fn test_wrong_passphrase() {
        let encrypted = keyfile("secret");
        let result = encrypted.decrypt("guess");
        assert!(matches!(result, Err(StakeSignError::DecryptionFailed(_))));
    }

    #[test]
    fn test_corrupt_file() {
        let mut encrypted = keyfile("secret");
        encrypted.nonce = "not base64!".to_string();
        let result = encrypted.decrypt("secret");
        assert!(matches!(result, Err(StakeSignError::WalletError(_))));
    }
}
