//! # sealpipe Channel
//!
//! Pairwise authenticated encryption between collaborators, and delivery of
//! key shares over it.
//!
//! ## Overview
//!
//! Callers depend only on the [`SecureChannel`] contract: a ciphertext
//! produced for a receiver opens only for that receiver, and only if it
//! came from the claimed sender. [`SealedBoxChannel`] implements it with a
//! fresh X25519 exchange per frame and an Ed25519 signature from the
//! sender; any ratcheting channel can replace it.
//!
//! ## Key Properties
//!
//! - **Store-and-forward**: shares are persisted, so receivers need not be online
//! - **Idempotent**: applying a share twice leaves the key store unchanged
//! - **Pinned identities**: a peer's keys are trusted on first sight only
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sealpipe_channel::{Directory, Identity, SealedBoxChannel, SecureChannel};
//!
//! async fn example() {
//!     let directory = Arc::new(Directory::new());
//!     let alice = SealedBoxChannel::connect(Identity::generate("alice"), directory.clone()).await;
//!     let bob = SealedBoxChannel::connect(Identity::generate("bob"), directory).await;
//!
//!     let ct = alice.encrypt(bob.local_user(), b"key bytes").await.unwrap();
//!     let pt = bob.decrypt(alice.local_user(), &ct).await.unwrap();
//!     assert_eq!(pt, b"key bytes");
//! }
//! ```

pub mod channel;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod inbox;
pub mod messages;
pub mod transport;

pub use channel::{SealedBoxChannel, SecureChannel};
pub use error::{ChannelError, Result};
pub use identity::{Directory, Fingerprint, Identity, PeerIdentity};
pub use inbox::{InboxReport, SecretInbox};
pub use messages::{limits, ChannelEvent, Frame, SecretShare, PROTOCOL_VERSION};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};
