//! Passphrase-protected key store.

use std::collections::HashMap;
use std::sync::RwLock;

use sealpipe_core::{CoreError, KeyId, KeyStore, Sealed, SymmetricKey};
use tracing::{debug, info};

use crate::config::VaultConfig;
use crate::error::{KeystoreError, Result};
use crate::kdf::{VaultKey, SALT_SIZE};
use crate::vault::{
    entry_key_id, entry_label, VaultBackend, VaultFile, VAULT_VERSION, VERIFIER_LABEL,
    VERIFIER_PLAINTEXT,
};

/// A [`KeyStore`] backed by an encrypted vault.
///
/// Every mutation rewrites the vault before returning, so a key that was
/// handed out has already been persisted.
pub struct LocalKeyStore {
    keys: RwLock<HashMap<KeyId, SymmetricKey>>,
    vault_key: VaultKey,
    salt: [u8; SALT_SIZE],
    config: VaultConfig,
    verifier: Sealed,
    backend: Box<dyn VaultBackend>,
}

impl LocalKeyStore {
    /// Open the vault behind `backend`, creating it if none exists.
    ///
    /// An existing vault is reopened with the KDF parameters it was created
    /// with; `config` only applies to new vaults.
    pub fn open(
        backend: impl VaultBackend + 'static,
        passphrase: &str,
        config: VaultConfig,
    ) -> Result<Self> {
        let backend: Box<dyn VaultBackend> = Box::new(backend);
        match backend.load()? {
            Some(bytes) => Self::unlock(backend, &bytes, passphrase),
            None => Self::create(backend, passphrase, config),
        }
    }

    fn create(backend: Box<dyn VaultBackend>, passphrase: &str, config: VaultConfig) -> Result<Self> {
        let salt = VaultKey::random_salt();
        let vault_key = VaultKey::derive(passphrase, &salt, &config)?;
        let verifier = vault_key
            .key()
            .seal(&KeyId::from(VERIFIER_LABEL), VERIFIER_PLAINTEXT)?;

        let store = Self {
            keys: RwLock::new(HashMap::new()),
            vault_key,
            salt,
            config,
            verifier,
            backend,
        };
        store.persist(&HashMap::new())?;
        info!("created new key vault");
        Ok(store)
    }

    fn unlock(backend: Box<dyn VaultBackend>, bytes: &[u8], passphrase: &str) -> Result<Self> {
        let file = VaultFile::from_bytes(bytes)?;
        let vault_key = VaultKey::derive(passphrase, &file.salt, &file.kdf)?;

        match vault_key.key().open(&file.verifier) {
            Ok(plain) if plain == VERIFIER_PLAINTEXT => {}
            _ => return Err(KeystoreError::WrongPassphrase),
        }

        let mut keys = HashMap::with_capacity(file.entries.len());
        for entry in &file.entries {
            let key_id = entry_key_id(&entry.key_id).ok_or_else(|| {
                KeystoreError::Serialization(format!("malformed entry label {}", entry.key_id))
            })?;
            let raw = vault_key.key().open(entry)?;
            keys.insert(key_id, SymmetricKey::from_slice(&raw)?);
        }

        debug!(keys = keys.len(), "unlocked key vault");
        Ok(Self {
            keys: RwLock::new(keys),
            vault_key,
            salt: file.salt,
            config: file.kdf,
            verifier: file.verifier,
            backend,
        })
    }

    /// Ids of every key held, in no particular order.
    pub fn key_ids(&self) -> Result<Vec<KeyId>> {
        let keys = self.keys.read().map_err(|_| KeystoreError::Poisoned)?;
        Ok(keys.keys().cloned().collect())
    }

    /// Drop a key and persist. Returns whether it was present.
    pub fn remove_key(&self, key_id: &KeyId) -> Result<bool> {
        let mut keys = self.keys.write().map_err(|_| KeystoreError::Poisoned)?;
        if keys.remove(key_id).is_none() {
            return Ok(false);
        }
        self.persist(&keys)?;
        info!(%key_id, "removed key");
        Ok(true)
    }

    /// KDF parameters the vault was created with.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    fn insert(&self, key_id: KeyId, key: SymmetricKey) -> Result<KeyId> {
        let mut keys = self.keys.write().map_err(|_| KeystoreError::Poisoned)?;
        if keys.contains_key(&key_id) {
            return Ok(key_id);
        }
        keys.insert(key_id.clone(), key);
        if let Err(e) = self.persist(&keys) {
            keys.remove(&key_id);
            return Err(e);
        }
        Ok(key_id)
    }

    fn persist(&self, keys: &HashMap<KeyId, SymmetricKey>) -> Result<()> {
        let mut entries = keys
            .iter()
            .map(|(id, key)| self.vault_key.key().seal(&entry_label(id), key.as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.key_id.cmp(&b.key_id));

        let file = VaultFile {
            version: VAULT_VERSION,
            salt: self.salt,
            kdf: self.config,
            verifier: self.verifier.clone(),
            entries,
        };
        self.backend.save(&file.to_bytes()?)
    }
}

impl KeyStore for LocalKeyStore {
    fn generate_key(&self, bits: u32) -> sealpipe_core::Result<KeyId> {
        let key = SymmetricKey::generate(bits)?;
        let key_id = self.insert(KeyId::generate(), key)?;
        info!(%key_id, "generated key");
        Ok(key_id)
    }

    fn add_key(&self, key_id: &KeyId, raw: &[u8]) -> sealpipe_core::Result<KeyId> {
        let key = SymmetricKey::from_slice(raw)?;
        Ok(self.insert(key_id.clone(), key)?)
    }

    fn get_key(&self, key_id: &KeyId) -> sealpipe_core::Result<SymmetricKey> {
        let keys = self
            .keys
            .read()
            .map_err(|_| CoreError::from(KeystoreError::Poisoned))?;
        keys.get(key_id)
            .cloned()
            .ok_or_else(|| CoreError::KeyNotFound(key_id.clone()))
    }
}

impl std::fmt::Debug for LocalKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.keys.read().map(|k| k.len()).unwrap_or(0);
        f.debug_struct("LocalKeyStore")
            .field("keys", &count)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
