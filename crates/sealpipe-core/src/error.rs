//! Error types for sealpipe core.

use thiserror::Error;

use crate::types::KeyId;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The key store does not hold the referenced key.
    #[error("key not found: {0}")]
    KeyNotFound(KeyId),

    /// Ciphertext and key do not match, or the ciphertext is corrupt.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The manifest MAC does not verify under the given key.
    #[error("invalid manifest signature")]
    ManifestSignatureInvalid,

    #[error("unsupported key size: {0} bits")]
    UnsupportedKeySize(u32),

    /// A sealed envelope was produced under neither of the expected keys.
    #[error("key mismatch: expected {expected}, found {found}")]
    KeyMismatch { expected: KeyId, found: KeyId },

    /// Every key after the highest one in use is taken.
    #[error("no free key left for {0}")]
    KeysExhausted(&'static str),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    /// Failure inside a concrete key store implementation.
    #[error("key store error: {0}")]
    KeyStore(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
