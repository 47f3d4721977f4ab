//! At-rest vault format and backends.
//!
//! The vault never contains plaintext key material. Each entry is a
//! [`Sealed`] envelope under the vault key whose label is
//! `vault/<key_id>`, so the entry's key id is bound as associated data and
//! cannot be swapped between entries.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sealpipe_core::{KeyId, Sealed};
use serde::{Deserialize, Serialize};

use crate::config::VaultConfig;
use crate::error::{KeystoreError, Result};
use crate::kdf::SALT_SIZE;

/// Current vault format version.
pub const VAULT_VERSION: u8 = 1;

/// Label prefix for entry envelopes.
const ENTRY_PREFIX: &str = "vault/";

/// Label of the passphrase check envelope.
pub(crate) const VERIFIER_LABEL: &str = "vault-verifier";

/// Plaintext sealed in the passphrase check envelope.
pub(crate) const VERIFIER_PLAINTEXT: &[u8] = b"sealpipe-vault-ok";

/// The serialized vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFile {
    pub version: u8,
    pub salt: [u8; SALT_SIZE],
    pub kdf: VaultConfig,
    /// Seals a known constant; opening it proves the passphrase.
    pub verifier: Sealed,
    pub entries: Vec<Sealed>,
}

impl VaultFile {
    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| KeystoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let file: Self = ciborium::from_reader(bytes)
            .map_err(|e| KeystoreError::Serialization(e.to_string()))?;
        if file.version != VAULT_VERSION {
            return Err(KeystoreError::UnsupportedVersion(file.version));
        }
        Ok(file)
    }
}

/// Label under which the entry for `key_id` is sealed.
pub(crate) fn entry_label(key_id: &KeyId) -> KeyId {
    KeyId::new(format!("{ENTRY_PREFIX}{key_id}"))
}

/// Recover the stored key id from an entry label.
pub(crate) fn entry_key_id(label: &KeyId) -> Option<KeyId> {
    label.as_str().strip_prefix(ENTRY_PREFIX).map(KeyId::from)
}

/// Where a vault is persisted.
pub trait VaultBackend: Send + Sync {
    /// Load the raw vault bytes, if a vault exists.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the stored vault.
    fn save(&self, bytes: &[u8]) -> Result<()>;
}

/// Vault stored in a file.
///
/// Writes go to a sibling temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileVault {
    path: PathBuf,
}

impl FileVault {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VaultBackend for FileVault {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Vault kept in memory. Clones share nothing.
#[derive(Debug, Default)]
pub struct MemoryVault {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored bytes.
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes.lock().ok().and_then(|b| b.clone())
    }
}

impl VaultBackend for MemoryVault {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.bytes.lock().map_err(|_| KeystoreError::Poisoned)?.clone())
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.lock().map_err(|_| KeystoreError::Poisoned)? = Some(bytes.to_vec());
        Ok(())
    }
}

impl<T: VaultBackend + ?Sized> VaultBackend for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        (**self).load()
    }

    fn save(&self, bytes: &[u8]) -> Result<()> {
        (**self).save(bytes)
    }
}
