//! Store trait: the abstract interface to the collaboration backend.
//!
//! One method per backend call. Implementations include SQLite (primary)
//! and in-memory (for tests).

use async_trait::async_trait;
use sealpipe_core::{KeyId, Manifest, SpaceHandle, UserId, ValueRegistry};

use crate::error::Result;
use crate::records::{ConceptRecord, DataSpace, MetadataRecord, Secret, TransformerNode, Widget};

/// The Store trait: async interface to the collaboration backend.
///
/// # Design Notes
///
/// - **Wholesale replacement**: every `put_*` replaces the record with the
///   same id. Nothing is merged.
/// - **Ordering**: list calls return records ordered by id.
/// - **Store-and-forward secrets**: a [`Secret`] stays until superseded by
///   a share for the same `(key_id, owner, receiver)`.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Space Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a data space. Fails with `NotFound` if unknown.
    async fn get_space(&self, handle: &SpaceHandle) -> Result<DataSpace>;

    /// Create a data space with its initial manifest.
    ///
    /// Fails with `AlreadyExists` if the handle is taken.
    async fn create_space(&self, space: &DataSpace, manifest: &Manifest) -> Result<()>;

    /// Fetch the signed manifest.
    async fn fetch_manifest(&self, handle: &SpaceHandle) -> Result<Manifest>;

    /// `PUT /spaces/{handle}/manifest`.
    async fn put_manifest(&self, handle: &SpaceHandle, manifest: &Manifest) -> Result<()>;

    /// `POST /spaces/{handle}/rotate`: publish the new active key id.
    async fn publish_active_key(&self, handle: &SpaceHandle, key_id: &KeyId) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Encrypted Content
    // ─────────────────────────────────────────────────────────────────────────

    async fn list_metadata(&self, handle: &SpaceHandle) -> Result<Vec<MetadataRecord>>;

    async fn put_metadata(&self, handle: &SpaceHandle, record: &MetadataRecord) -> Result<()>;

    async fn list_concepts(&self, handle: &SpaceHandle) -> Result<Vec<ConceptRecord>>;

    async fn put_concept(&self, handle: &SpaceHandle, concept: &ConceptRecord) -> Result<()>;

    async fn list_widgets(&self, handle: &SpaceHandle) -> Result<Vec<Widget>>;

    async fn put_widget(&self, handle: &SpaceHandle, widget: &Widget) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Transformers
    // ─────────────────────────────────────────────────────────────────────────

    async fn list_transformers(&self, handle: &SpaceHandle) -> Result<Vec<TransformerNode>>;

    async fn get_transformer(
        &self,
        handle: &SpaceHandle,
        id: &str,
    ) -> Result<Option<TransformerNode>>;

    /// Replace a transformer node and its WAL in full.
    async fn put_transformer(&self, handle: &SpaceHandle, node: &TransformerNode) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Secrets
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a key share, replacing any share for the same slot.
    async fn put_secret(&self, handle: &SpaceHandle, secret: &Secret) -> Result<()>;

    /// Shares addressed to `receiver`, oldest first.
    async fn secrets_for(&self, handle: &SpaceHandle, receiver: &UserId) -> Result<Vec<Secret>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Load the space's metadata records as a value registry.
    fn value_registry(
        &self,
        handle: &SpaceHandle,
    ) -> impl std::future::Future<Output = Result<ValueRegistry>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn value_registry(&self, handle: &SpaceHandle) -> Result<ValueRegistry> {
        let records = self.list_metadata(handle).await?;
        Ok(records
            .into_iter()
            .map(|r| (r.content_id, r.sealed))
            .collect())
    }
}
