//! Channel wire types.
//!
//! Frames carry pairwise-encrypted payloads; events are what the
//! collaboration channel delivers to every connected client.

use sealpipe_core::{EncryptionNonce, KeyId, SpaceHandle, UserId};
use serde::{Deserialize, Serialize};

use crate::crypto::AgreementKey;
use crate::error::{ChannelError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message size limits.
pub mod limits {
    /// Max plaintext sealed into one frame.
    pub const MAX_PLAINTEXT_SIZE: usize = 64 * 1024;
    /// Max encoded frame accepted for decryption.
    pub const MAX_FRAME_SIZE: usize = 96 * 1024;
}

/// A key share as delivered over the event stream.
///
/// Wire shape: `{ key_id, owner, receiver, ciphertext, message_id? }`.
pub type SecretShare = sealpipe_store::Secret;

/// Events delivered over the collaboration channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A new key was shared with `receiver`.
    SecretShared(SecretShare),

    /// The space's manifest was re-signed.
    ManifestUpdated { handle: SpaceHandle },

    /// The space's active key changed.
    KeyRotated { handle: SpaceHandle, key_id: KeyId },
}

impl ChannelEvent {
    /// Check if this event respects size limits.
    pub fn validate_limits(&self) -> Result<()> {
        if let ChannelEvent::SecretShared(share) = self {
            if share.ciphertext.len() > limits::MAX_FRAME_SIZE {
                return Err(ChannelError::MessageTooLarge {
                    size: share.ciphertext.len(),
                    max: limits::MAX_FRAME_SIZE,
                });
            }
        }
        Ok(())
    }
}

/// A sealed-box frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub version: u8,
    pub sender: UserId,
    pub receiver: UserId,
    pub ephemeral: AgreementKey,
    pub nonce: EncryptionNonce,
    pub ciphertext: Vec<u8>,
    /// Ed25519 signature over [`Frame::signing_bytes`].
    pub signature: Vec<u8>,
}

impl Frame {
    /// Routing context bound into the frame key.
    pub fn context(sender: &UserId, receiver: &UserId, ephemeral: &AgreementKey) -> Vec<u8> {
        let mut buf = Vec::new();
        push_field(&mut buf, sender.as_str().as_bytes());
        push_field(&mut buf, receiver.as_str().as_bytes());
        buf.extend_from_slice(ephemeral.as_bytes());
        buf
    }

    /// Bytes covered by the sender's signature: everything but the
    /// signature itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = vec![self.version];
        buf.extend_from_slice(&Self::context(&self.sender, &self.receiver, &self.ephemeral));
        buf.extend_from_slice(self.nonce.as_bytes());
        push_field(&mut buf, &self.ciphertext);
        buf
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > limits::MAX_FRAME_SIZE {
            return Err(ChannelError::MessageTooLarge {
                size: bytes.len(),
                max: limits::MAX_FRAME_SIZE,
            });
        }
        ciborium::from_reader(bytes).map_err(|e| ChannelError::Serialization(e.to_string()))
    }
}

/// Append a u32 length prefix and the bytes.
fn push_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn share(len: usize) -> SecretShare {
        SecretShare {
            key_id: KeyId::from("k2"),
            owner: UserId::from("alice"),
            receiver: UserId::from("bob"),
            ciphertext: vec![0; len],
            message_id: None,
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = ChannelEvent::KeyRotated {
            handle: SpaceHandle::from("s"),
            key_id: KeyId::from("k2"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "key_rotated", "handle": "s", "key_id": "k2"})
        );

        let shared = serde_json::to_value(ChannelEvent::SecretShared(share(1))).unwrap();
        assert_eq!(shared["type"], "secret_shared");
        assert_eq!(shared["receiver"], "bob");
    }

    #[test]
    fn test_event_limits() {
        assert!(ChannelEvent::SecretShared(share(16)).validate_limits().is_ok());
        assert!(matches!(
            ChannelEvent::SecretShared(share(limits::MAX_FRAME_SIZE + 1)).validate_limits(),
            Err(ChannelError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_context_is_unambiguous() {
        let eph = AgreementKey([0; 32]);
        let a = Frame::context(&UserId::from("ab"), &UserId::from("c"), &eph);
        let b = Frame::context(&UserId::from("a"), &UserId::from("bc"), &eph);
        assert_ne!(a, b);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let bytes = vec![0u8; limits::MAX_FRAME_SIZE + 1];
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(ChannelError::MessageTooLarge { .. })
        ));
    }
}
