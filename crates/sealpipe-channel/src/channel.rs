//! The pairwise secure channel contract and its sealed-box implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sealpipe_core::{EncryptionNonce, UserId};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::crypto::FrameSender;
use crate::error::{ChannelError, Result};
use crate::identity::{Directory, Fingerprint, Identity, PeerIdentity};
use crate::messages::{limits, Frame, PROTOCOL_VERSION};

/// Per-recipient authenticated encryption with asynchronous delivery.
///
/// Every method is a suspension point. A ciphertext produced by
/// `encrypt(receiver, ..)` can only be opened by `receiver`, and
/// `decrypt(sender, ..)` only succeeds if `sender` produced it.
#[async_trait]
pub trait SecureChannel: Send + Sync {
    /// The user this channel acts for.
    fn local_user(&self) -> &UserId;

    async fn encrypt(&self, receiver: &UserId, plaintext: &[u8]) -> Result<Vec<u8>>;

    async fn decrypt(&self, sender: &UserId, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Fingerprint of the identity pinned for `user`.
    async fn fingerprint(&self, user: &UserId) -> Option<Fingerprint>;

    /// Compare the pinned fingerprint with one obtained out of band.
    async fn verify_fingerprint(&self, user: &UserId, expected: &Fingerprint) -> bool {
        self.fingerprint(user).await.as_ref() == Some(expected)
    }

    /// Refresh peer identities. Returns how many new peers were pinned.
    async fn sync(&self) -> Result<usize>;
}

/// Sealed-box channel: one ephemeral X25519 exchange per frame, signed by
/// the sender's Ed25519 key.
///
/// Peer identities are pinned on first sight; a later change in the
/// directory is logged and ignored.
pub struct SealedBoxChannel {
    identity: Identity,
    directory: Arc<Directory>,
    pinned: RwLock<HashMap<UserId, PeerIdentity>>,
}

impl SealedBoxChannel {
    /// Create a channel and publish the local identity.
    pub async fn connect(identity: Identity, directory: Arc<Directory>) -> Self {
        directory.register(identity.peer()).await;
        let mut pinned = HashMap::new();
        pinned.insert(identity.user().clone(), identity.peer());
        Self {
            identity,
            directory,
            pinned: RwLock::new(pinned),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn peer(&self, user: &UserId) -> Result<PeerIdentity> {
        if let Some(peer) = self.pinned.read().await.get(user) {
            return Ok(peer.clone());
        }
        self.sync().await?;
        self.pinned
            .read()
            .await
            .get(user)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownPeer(user.clone()))
    }
}

#[async_trait]
impl SecureChannel for SealedBoxChannel {
    fn local_user(&self) -> &UserId {
        self.identity.user()
    }

    async fn encrypt(&self, receiver: &UserId, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > limits::MAX_PLAINTEXT_SIZE {
            return Err(ChannelError::MessageTooLarge {
                size: plaintext.len(),
                max: limits::MAX_PLAINTEXT_SIZE,
            });
        }
        let peer = self.peer(receiver).await?;
        let sender = self.identity.user().clone();

        let frame_sender = FrameSender::new();
        let ephemeral = frame_sender.ephemeral();
        let frame_key = frame_sender.frame_key(
            &peer.agreement_key,
            &Frame::context(&sender, receiver, &ephemeral),
        );

        let nonce = EncryptionNonce::generate();
        let ciphertext = frame_key.seal(plaintext, &nonce, &[PROTOCOL_VERSION])?;

        let mut frame = Frame {
            version: PROTOCOL_VERSION,
            sender,
            receiver: receiver.clone(),
            ephemeral,
            nonce,
            ciphertext,
            signature: Vec::new(),
        };
        frame.signature = self.identity.sign(&frame.signing_bytes());
        frame.to_bytes()
    }

    async fn decrypt(&self, sender: &UserId, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let frame = Frame::from_bytes(ciphertext)?;
        if frame.version != PROTOCOL_VERSION {
            return Err(ChannelError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: frame.version,
            });
        }
        if &frame.sender != sender || &frame.receiver != self.local_user() {
            return Err(ChannelError::Decryption(format!(
                "frame addressed {} -> {}, expected {} -> {}",
                frame.sender,
                frame.receiver,
                sender,
                self.local_user()
            )));
        }

        let peer = self.peer(sender).await?;
        peer.verify(&frame.signing_bytes(), &frame.signature)?;

        let frame_key = self.identity.agreement().frame_key(
            &frame.ephemeral,
            &Frame::context(&frame.sender, &frame.receiver, &frame.ephemeral),
        );
        frame_key.open(&frame.ciphertext, &frame.nonce, &[frame.version])
    }

    async fn fingerprint(&self, user: &UserId) -> Option<Fingerprint> {
        self.peer(user).await.ok().map(|p| p.fingerprint())
    }

    async fn sync(&self) -> Result<usize> {
        let published = self.directory.snapshot().await;
        let mut pinned = self.pinned.write().await;
        let mut added = 0;
        for peer in published {
            match pinned.get(&peer.user) {
                Some(known) if known != &peer => {
                    warn!(user = %peer.user, "published identity changed; keeping pinned identity");
                }
                Some(_) => {}
                None => {
                    pinned.insert(peer.user.clone(), peer);
                    added += 1;
                }
            }
        }
        debug!(added, total = pinned.len(), "synced peer directory");
        Ok(added)
    }
}
