//! Error types for sealpipe sessions.

use std::time::Duration;

use sealpipe_channel::ChannelError;
use sealpipe_core::{CoreError, KeyId};
use sealpipe_keystore::KeystoreError;
use sealpipe_store::StoreError;
use thiserror::Error;

use crate::rotation::RotationError;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SealpipeError {
    /// Core error.
    #[error("core error: {0}")]
    Core(CoreError),

    /// Collaboration backend error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Pairwise channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Local key store error.
    #[error("key store error: {0}")]
    Keystore(#[from] KeystoreError),

    /// The local key store lacks a referenced key.
    #[error("cannot decrypt: key {0} not available")]
    KeyNotFound(KeyId),

    /// Ciphertext does not open under the key.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The manifest did not verify under the active key.
    #[error("Invalid manifest signature")]
    ManifestSignatureInvalid,

    /// Network failure outside the store and channel.
    #[error("network failure: {0}")]
    Network(String),

    /// This client is already rotating the space key.
    #[error("a key rotation is already in progress")]
    RotationInProgress,

    /// Rotation stopped after the point of no return.
    #[error(transparent)]
    Rotation(Box<RotationError>),

    /// The session must be restarted.
    #[error("session invalidated; start a new session")]
    SessionInvalidated,

    /// The external query executor failed.
    #[error("executor error: {0}")]
    Executor(#[from] anyhow::Error),

    /// An engine did not finish loading in time.
    #[error("engine load timed out after {0:?}")]
    LoaderTimeout(Duration),

    /// No transformer node with this id.
    #[error("transformer not found: {0}")]
    TransformerNotFound(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SealpipeError {
    /// Whether retrying the same step may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SealpipeError::Network(_) => true,
            SealpipeError::Store(e) => e.is_transient(),
            SealpipeError::Channel(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<CoreError> for SealpipeError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::KeyNotFound(id) => SealpipeError::KeyNotFound(id),
            CoreError::DecryptionFailed(msg) => SealpipeError::DecryptionFailed(msg),
            CoreError::ManifestSignatureInvalid => SealpipeError::ManifestSignatureInvalid,
            other => SealpipeError::Core(other),
        }
    }
}

impl From<RotationError> for SealpipeError {
    fn from(e: RotationError) -> Self {
        SealpipeError::Rotation(Box::new(e))
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SealpipeError>;
