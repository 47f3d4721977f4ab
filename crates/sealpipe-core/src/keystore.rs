//! The key store contract.
//!
//! Everything that needs key material goes through this trait, so the
//! concrete store (passphrase vault, hardware token, test double) can be
//! swapped freely. Locking across calls is the caller's responsibility.

use crate::crypto::{reseal, Sealed, SymmetricKey};
use crate::error::{CoreError, Result};
use crate::types::KeyId;

/// A set of named symmetric keys.
pub trait KeyStore: Send + Sync {
    /// Generate and persist a new key, returning its id.
    fn generate_key(&self, bits: u32) -> Result<KeyId>;

    /// Add a known key. Adding a key that is already present is a no-op.
    fn add_key(&self, key_id: &KeyId, raw: &[u8]) -> Result<KeyId>;

    /// Get a key by id.
    ///
    /// Fails with [`CoreError::KeyNotFound`] if the key is unknown.
    fn get_key(&self, key_id: &KeyId) -> Result<SymmetricKey>;

    /// Whether the key is present.
    fn has_key(&self, key_id: &KeyId) -> bool {
        self.get_key(key_id).is_ok()
    }

    /// Encrypt a metadata string under `key_id`.
    fn encrypt_metadata(&self, key_id: &KeyId, plaintext: &str) -> Result<Sealed> {
        self.get_key(key_id)?.seal(key_id, plaintext.as_bytes())
    }

    /// Decrypt a metadata string sealed under `key_id`.
    ///
    /// Envelopes sealed under a different key fail with
    /// [`CoreError::DecryptionFailed`], even if that key is also held.
    fn decrypt_metadata(&self, key_id: &KeyId, sealed: &Sealed) -> Result<String> {
        let bytes = self.decrypt_bytes(key_id, sealed)?;
        String::from_utf8(bytes).map_err(|e| CoreError::DecryptionFailed(e.to_string()))
    }

    /// Encrypt raw bytes under `key_id`.
    fn encrypt_bytes(&self, key_id: &KeyId, plaintext: &[u8]) -> Result<Sealed> {
        self.get_key(key_id)?.seal(key_id, plaintext)
    }

    /// Decrypt raw bytes sealed under `key_id`.
    fn decrypt_bytes(&self, key_id: &KeyId, sealed: &Sealed) -> Result<Vec<u8>> {
        if !sealed.is_under(key_id) {
            return Err(CoreError::DecryptionFailed(format!(
                "envelope sealed under {}, not {}",
                sealed.key_id, key_id
            )));
        }
        self.get_key(key_id)?.open(sealed)
    }

    /// Move an envelope from `old` to `new`; a no-op if already under `new`.
    fn reseal(&self, sealed: &Sealed, old: &KeyId, new: &KeyId) -> Result<Sealed> {
        if sealed.is_under(new) {
            return Ok(sealed.clone());
        }
        let old_key = self.get_key(old)?;
        let new_key = self.get_key(new)?;
        reseal(sealed, old, &old_key, new, &new_key)
    }
}
