//! Error types for the key store.

use sealpipe_core::CoreError;
use thiserror::Error;

/// Errors that can occur during key store operations.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// The passphrase does not open the vault.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// Key derivation error.
    #[error("key derivation error: {0}")]
    Kdf(String),

    /// Vault format version is not understood.
    #[error("unsupported vault version: {0}")]
    UnsupportedVersion(u8),

    /// Vault serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock guarding the store was poisoned.
    #[error("key store lock poisoned")]
    Poisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl From<KeystoreError> for CoreError {
    fn from(e: KeystoreError) -> Self {
        match e {
            KeystoreError::Core(inner) => inner,
            other => CoreError::KeyStore(other.to_string()),
        }
    }
}

/// Result type for key store operations.
pub type Result<T> = std::result::Result<T, KeystoreError>;
