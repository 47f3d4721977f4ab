//! # sealpipe Core
//!
//! Pure primitives for sealpipe: identifiers, sealed envelopes, manifests,
//! and the WAL representation of transformation steps.
//!
//! This crate contains no I/O, no storage, no networking. Key material is
//! reached only through the [`KeyStore`] contract, so any concrete key store
//! can sit behind it.
//!
//! ## Key Types
//!
//! - [`Sealed`] - Ciphertext tagged with the key that produced it
//! - [`Manifest`] - MAC-signed membership snapshot of a data space
//! - [`Wal`] - Replayable description of one transformation step
//! - [`ValueRegistry`] - Encrypted literals referenced from WAL templates
//!
//! ## Placeholder Syntax
//!
//! WAL templates are persisted and replayed by other clients, so the
//! placeholder syntax is fixed:
//!
//! - `%<n>$I` is replaced by the quoted identifier interned under `n`
//! - a bare `$<n>` is replaced by the decrypted literal interned under `n`

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod intern;
pub mod keystore;
pub mod manifest;
pub mod materialize;
pub mod types;
pub mod wal;

pub use canonical::manifest_bytes;
pub use crypto::{reseal, EncryptionNonce, Sealed, SymmetricKey, KEY_BITS};
pub use error::{CoreError, Result};
pub use intern::{intern, ReverseIndex};
pub use keystore::KeyStore;
pub use manifest::Manifest;
pub use materialize::{materialize, placeholders, Placeholders, ValueRegistry};
pub use types::{ContentId, KeyId, SpaceHandle, UserId};
pub use wal::{Artifact, ArtifactBody, Identifier, IdentifierAction, IdentifierKind, Wal};
