//! Key agreement and frame encryption.
//!
//! Each frame is sealed under a one-time ChaCha20-Poly1305 key derived from
//! an X25519 agreement between a fresh sender secret and the receiver's
//! long-term agreement key.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use sealpipe_core::EncryptionNonce;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ChannelError, Result};

/// Domain for deriving frame keys from an agreement.
const FRAME_KEY_DOMAIN: &str = "sealpipe-channel-v1 frame key";

/// Public half of an agreement key, as carried in frames and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementKey(pub [u8; 32]);

impl AgreementKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<&AgreementKey> for PublicKey {
    fn from(key: &AgreementKey) -> Self {
        PublicKey::from(key.0)
    }
}

/// A member's long-term agreement secret. Frames addressed to the member
/// are opened with it.
pub struct AgreementSecret(StaticSecret);

impl AgreementSecret {
    pub fn random() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(StaticSecret::from(seed))
    }

    pub fn public(&self) -> AgreementKey {
        AgreementKey(PublicKey::from(&self.0).to_bytes())
    }

    /// Frame key for a frame whose sender used `ephemeral`.
    pub fn frame_key(&self, ephemeral: &AgreementKey, context: &[u8]) -> FrameKey {
        FrameKey::derive(&self.0.diffie_hellman(&ephemeral.into()), context)
    }
}

/// Sender side of a single frame. The secret is consumed by
/// [`FrameSender::frame_key`] so it can never seal a second frame.
pub struct FrameSender {
    secret: EphemeralSecret,
    public: AgreementKey,
}

impl FrameSender {
    pub fn new() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = AgreementKey(PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Key the receiver needs to reach the same agreement.
    pub fn ephemeral(&self) -> AgreementKey {
        self.public
    }

    pub fn frame_key(self, receiver: &AgreementKey, context: &[u8]) -> FrameKey {
        FrameKey::derive(&self.secret.diffie_hellman(&receiver.into()), context)
    }
}

impl Default for FrameSender {
    fn default() -> Self {
        Self::new()
    }
}

/// One-time key for a single frame.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct FrameKey([u8; 32]);

impl FrameKey {
    /// Bind the agreement to the frame's routing context.
    fn derive(agreement: &SharedSecret, context: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(FRAME_KEY_DOMAIN);
        hasher.update(agreement.as_bytes());
        hasher.update(context);
        Self(*hasher.finalize().as_bytes())
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(&self.0.into())
    }

    pub fn seal(&self, plaintext: &[u8], nonce: &EncryptionNonce, aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        self.cipher()
            .encrypt(Nonce::from_slice(nonce.as_bytes()), payload)
            .map_err(|e| ChannelError::Encryption(e.to_string()))
    }

    pub fn open(&self, ciphertext: &[u8], nonce: &EncryptionNonce, aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        self.cipher()
            .decrypt(Nonce::from_slice(nonce.as_bytes()), payload)
            .map_err(|_| ChannelError::Decryption("frame authentication failed".into()))
    }
}
