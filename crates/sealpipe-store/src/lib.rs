//! # sealpipe Store
//!
//! Collaboration backend abstraction for sealpipe. Provides a trait-based
//! interface for spaces, manifests, encrypted content and key shares, with
//! SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait, one method per backend call
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`Secret`] - A key share addressed to one member
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sealpipe_store::{SqliteStore, Store};
//! use sealpipe_core::SpaceHandle;
//!
//! async fn example() {
//!     let store = SqliteStore::open("sealpipe.db").unwrap();
//!     let space = store.get_space(&SpaceHandle::from("sales")).await.unwrap();
//!     println!("active key: {}", space.active_key_id);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Ciphertext only**: the backend never sees plaintext or raw keys
//! - **Wholesale replacement**: `put_*` overwrites; rotation relies on it
//! - **Store-and-forward**: key shares wait for their receiver to come online

pub mod error;
pub mod memory;
pub mod migration;
pub mod records;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use records::{
    AccessGrant, ConceptRecord, DataSpace, MetadataRecord, Secret, TransformerNode, Widget,
    WidgetContent,
};
pub use sqlite::SqliteStore;
pub use traits::{Store, StoreExt};
