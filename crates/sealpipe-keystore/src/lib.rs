//! # sealpipe Key Store
//!
//! A local, passphrase-protected implementation of the
//! [`KeyStore`](sealpipe_core::KeyStore) contract.
//!
//! ## Overview
//!
//! Keys live in memory while a session runs and are persisted to a vault
//! that is encrypted at rest:
//!
//! 1. **Vault key**: derived from the passphrase with Argon2id
//! 2. **Entries**: each symmetric key sealed under the vault key
//!
//! The vault is CBOR-encoded and written through a [`VaultBackend`], so the
//! same store works against a file or an in-memory buffer.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sealpipe_core::{KeyStore, KEY_BITS};
//! use sealpipe_keystore::{FileVault, LocalKeyStore, VaultConfig};
//!
//! let store = LocalKeyStore::open(
//!     FileVault::new("keys.vault"),
//!     "correct horse battery staple",
//!     VaultConfig::default(),
//! )
//! .unwrap();
//!
//! let key_id = store.generate_key(KEY_BITS).unwrap();
//! let sealed = store.encrypt_metadata(&key_id, "revenue").unwrap();
//! assert_eq!(store.decrypt_metadata(&key_id, &sealed).unwrap(), "revenue");
//! ```

pub mod config;
pub mod error;
pub mod kdf;
pub mod store;
pub mod vault;

pub use config::VaultConfig;
pub use error::{KeystoreError, Result};
pub use kdf::VaultKey;
pub use store::LocalKeyStore;
pub use vault::{FileVault, MemoryVault, VaultBackend, VaultFile};
