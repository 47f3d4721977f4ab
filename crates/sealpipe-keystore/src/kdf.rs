//! Vault key derivation using Argon2id.

use argon2::{Algorithm, Argon2, Params, Version};
use sealpipe_core::SymmetricKey;
use zeroize::Zeroize;

use crate::config::VaultConfig;
use crate::error::{KeystoreError, Result};

/// Salt size in bytes.
pub const SALT_SIZE: usize = 16;

/// Key derived from the vault passphrase.
pub struct VaultKey(SymmetricKey);

impl VaultKey {
    /// Derive the vault key from a passphrase.
    pub fn derive(passphrase: &str, salt: &[u8; SALT_SIZE], config: &VaultConfig) -> Result<Self> {
        let params = Params::new(
            config.argon2_memory_cost,
            config.argon2_time_cost,
            config.argon2_parallelism,
            Some(32),
        )
        .map_err(|e| KeystoreError::Kdf(format!("invalid Argon2 params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut bytes = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut bytes)
            .map_err(|e| KeystoreError::Kdf(format!("Argon2 failed: {e}")))?;

        let key = SymmetricKey::from_bytes(bytes);
        bytes.zeroize();
        Ok(Self(key))
    }

    /// Generate a random salt.
    pub fn random_salt() -> [u8; SALT_SIZE] {
        rand::random()
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.0
    }
}
