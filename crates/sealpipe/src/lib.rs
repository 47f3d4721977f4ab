//! # sealpipe
//!
//! Client-side state for collaborative, end-to-end encrypted data
//! pipelines: replayable transformation logs and multi-client key rotation.
//!
//! ## Overview
//!
//! Collaborators share a data space. Everything the backend stores for it
//! (column metadata, concepts, internal widgets, transformer WALs) is
//! sealed under the space's single active key. A [`Session`] ties together:
//!
//! - **Store**: the collaboration backend, which only ever sees ciphertext
//! - **Channel**: pairwise encryption used to hand keys to other members
//! - **Key store**: the local, passphrase-protected set of symmetric keys
//!
//! ## Key Concepts
//!
//! - **WAL**: statement templates with placeholders, materialized against
//!   the current keys when a step is executed or replayed
//! - **Rotation**: moves every sealed record to a new key and shares that
//!   key with each member; the session is invalidated afterwards
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sealpipe::{Session, SessionConfig};
//! use sealpipe::channel::{Directory, Identity, SealedBoxChannel};
//! use sealpipe::keystore::{FileVault, LocalKeyStore, VaultConfig};
//! use sealpipe::store::SqliteStore;
//!
//! async fn example() -> sealpipe::Result<()> {
//!     let store = Arc::new(SqliteStore::open("sealpipe.db")?);
//!     let keys = Arc::new(LocalKeyStore::open(
//!         FileVault::new("alice.vault"),
//!         "correct horse",
//!         VaultConfig::default(),
//!     )?);
//!     let directory = Arc::new(Directory::new());
//!     let channel = Arc::new(SealedBoxChannel::connect(Identity::generate("alice"), directory).await);
//!
//!     let session = Session::start(store, channel, keys, SessionConfig::new("alice", "sales")).await?;
//!     let value = session.seal_value("'EU'").await?;
//!     println!("sealed literal {value}");
//!
//!     let report = session.rotate_key().await?;
//!     println!("rotated to {}", report.new_key_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `sealpipe::core` - Identifiers, sealed envelopes, manifests, WAL
//! - `sealpipe::keystore` - Passphrase-protected local key store
//! - `sealpipe::store` - Backend abstraction, SQLite and in-memory stores
//! - `sealpipe::channel` - Pairwise channel, key shares, transport

pub mod config;
pub mod error;
pub mod rotation;
pub mod session;
pub mod transform;

// Re-export component crates
pub use sealpipe_channel as channel;
pub use sealpipe_core as core;
pub use sealpipe_keystore as keystore;
pub use sealpipe_store as store;

pub use config::{RetryPolicy, RotationConfig, SessionConfig};
pub use error::{Result, SealpipeError};
pub use rotation::{
    RecordKind, RotationCheckpoint, RotationCoordinator, RotationError, RotationReport,
    RotationState, StrandedRecord,
};
pub use session::{Session, TransformerGuard};
pub use transform::{
    load_engine, replay, ColumnSchema, EngineLoader, ExecutionResult, QueryExecutor, Statement,
    StepOutput, TransformStep,
};

pub use sealpipe_core::{ContentId, KeyId, KeyStore, Manifest, SpaceHandle, UserId, Wal};
