//! Error types for the channel module.

use sealpipe_core::{CoreError, UserId};
use sealpipe_store::StoreError;
use thiserror::Error;

/// Errors that can occur on the pairwise channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No identity is known for the peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(UserId),

    /// Frame signature does not verify against the claimed sender.
    #[error("bad frame signature from {0}")]
    BadSignature(UserId),

    /// Frame could not be opened.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Frame could not be sealed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Payload exceeds the size limits.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// A shared key had the wrong length.
    #[error("invalid shared key: {0}")]
    InvalidKey(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Timeout waiting for a message.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Frame serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Key store operation failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl ChannelError {
    /// Whether retrying may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ChannelError::Transport(_) | ChannelError::Timeout(_) => true,
            ChannelError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
