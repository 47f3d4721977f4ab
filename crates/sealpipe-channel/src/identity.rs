//! Long-term user identities and the peer directory.

use std::collections::HashMap;
use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sealpipe_core::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::crypto::{AgreementKey, AgreementSecret};
use crate::error::{ChannelError, Result};

const FINGERPRINT_CONTEXT: &str = "sealpipe-channel-v1 fingerprint";

/// A user's secret identity: an Ed25519 signing key and an X25519
/// agreement secret.
pub struct Identity {
    user: UserId,
    signing_key: SigningKey,
    agreement: AgreementSecret,
}

impl Identity {
    /// Generate a new random identity.
    pub fn generate(user: impl Into<UserId>) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            user: user.into(),
            signing_key: SigningKey::generate(&mut rng),
            agreement: AgreementSecret::random(),
        }
    }

    /// Create from seeds.
    pub fn from_seeds(user: impl Into<UserId>, signing: &[u8; 32], agreement: [u8; 32]) -> Self {
        Self {
            user: user.into(),
            signing_key: SigningKey::from_bytes(signing),
            agreement: AgreementSecret::from_seed(agreement),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// The public half, as published to the directory.
    pub fn peer(&self) -> PeerIdentity {
        PeerIdentity {
            user: self.user.clone(),
            verifying_key: self.signing_key.verifying_key().to_bytes(),
            agreement_key: self.agreement.public(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    pub(crate) fn agreement(&self) -> &AgreementSecret {
        &self.agreement
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.user)
    }
}

/// Public identity of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub user: UserId,
    pub verifying_key: [u8; 32],
    pub agreement_key: AgreementKey,
}

impl PeerIdentity {
    /// Verify an Ed25519 signature made by this peer.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.verifying_key)
            .map_err(|_| ChannelError::BadSignature(self.user.clone()))?;
        let sig = Signature::from_slice(signature)
            .map_err(|_| ChannelError::BadSignature(self.user.clone()))?;
        key.verify_strict(message, &sig)
            .map_err(|_| ChannelError::BadSignature(self.user.clone()))
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new_derive_key(FINGERPRINT_CONTEXT);
        hasher.update(&self.verifying_key);
        hasher.update(self.agreement_key.as_bytes());
        Fingerprint(*hasher.finalize().as_bytes())
    }
}

/// Out-of-band verifiable digest of a peer's public keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({}...)", &self.to_hex()[..16])
    }
}

/// Published public identities, keyed by user.
#[derive(Debug, Default)]
pub struct Directory {
    peers: RwLock<HashMap<UserId, PeerIdentity>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish or replace a peer's identity.
    pub async fn register(&self, peer: PeerIdentity) {
        self.peers.write().await.insert(peer.user.clone(), peer);
    }

    pub async fn get(&self, user: &UserId) -> Option<PeerIdentity> {
        self.peers.read().await.get(user).cloned()
    }

    pub async fn snapshot(&self) -> Vec<PeerIdentity> {
        self.peers.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let alice = Identity::generate("alice");
        let sig = alice.sign(b"frame");
        alice.peer().verify(b"frame", &sig).unwrap();
        assert!(matches!(
            alice.peer().verify(b"framE", &sig),
            Err(ChannelError::BadSignature(_))
        ));
    }

    #[test]
    fn test_verify_wrong_peer() {
        let alice = Identity::generate("alice");
        let mallory = Identity::generate("mallory");
        let sig = mallory.sign(b"frame");
        assert!(alice.peer().verify(b"frame", &sig).is_err());
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Identity::from_seeds("alice", &[1; 32], [2; 32]);
        let b = Identity::from_seeds("alice", &[1; 32], [2; 32]);
        let c = Identity::from_seeds("alice", &[1; 32], [3; 32]);
        assert_eq!(a.peer().fingerprint(), b.peer().fingerprint());
        assert_ne!(a.peer().fingerprint(), c.peer().fingerprint());
        assert_eq!(a.peer().fingerprint().to_string().len(), 64);
    }

    #[tokio::test]
    async fn test_directory() {
        let dir = Directory::new();
        let alice = Identity::generate("alice");
        dir.register(alice.peer()).await;

        assert_eq!(dir.get(&UserId::from("alice")).await, Some(alice.peer()));
        assert!(dir.get(&UserId::from("bob")).await.is_none());
        assert_eq!(dir.snapshot().await.len(), 1);
    }
}
