//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use sealpipe_core::{ContentId, KeyId, Manifest, SpaceHandle, UserId};

use crate::error::{Result, StoreError};
use crate::records::{ConceptRecord, DataSpace, MetadataRecord, Secret, TransformerNode, Widget};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<SpaceHandle, SpaceState>>,
}

struct SpaceState {
    space: DataSpace,
    manifest: Manifest,
    metadata: BTreeMap<ContentId, MetadataRecord>,
    concepts: BTreeMap<String, ConceptRecord>,
    widgets: BTreeMap<String, Widget>,
    transformers: BTreeMap<String, TransformerNode>,
    /// Insertion order; a replaced share moves to the end.
    secrets: Vec<Secret>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<SpaceHandle, SpaceState>>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<SpaceHandle, SpaceState>>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }

    fn with_space<T>(&self, handle: &SpaceHandle, f: impl FnOnce(&SpaceState) -> T) -> Result<T> {
        let inner = self.read()?;
        let state = inner
            .get(handle)
            .ok_or_else(|| StoreError::NotFound(format!("space {handle}")))?;
        Ok(f(state))
    }

    fn with_space_mut<T>(
        &self,
        handle: &SpaceHandle,
        f: impl FnOnce(&mut SpaceState) -> T,
    ) -> Result<T> {
        let mut inner = self.write()?;
        let state = inner
            .get_mut(handle)
            .ok_or_else(|| StoreError::NotFound(format!("space {handle}")))?;
        Ok(f(state))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_space(&self, handle: &SpaceHandle) -> Result<DataSpace> {
        self.with_space(handle, |s| s.space.clone())
    }

    async fn create_space(&self, space: &DataSpace, manifest: &Manifest) -> Result<()> {
        let mut inner = self.write()?;
        if inner.contains_key(&space.handle) {
            return Err(StoreError::AlreadyExists(format!("space {}", space.handle)));
        }
        inner.insert(
            space.handle.clone(),
            SpaceState {
                space: space.clone(),
                manifest: manifest.clone(),
                metadata: BTreeMap::new(),
                concepts: BTreeMap::new(),
                widgets: BTreeMap::new(),
                transformers: BTreeMap::new(),
                secrets: Vec::new(),
            },
        );
        Ok(())
    }

    async fn fetch_manifest(&self, handle: &SpaceHandle) -> Result<Manifest> {
        self.with_space(handle, |s| s.manifest.clone())
    }

    async fn put_manifest(&self, handle: &SpaceHandle, manifest: &Manifest) -> Result<()> {
        self.with_space_mut(handle, |s| s.manifest = manifest.clone())
    }

    async fn publish_active_key(&self, handle: &SpaceHandle, key_id: &KeyId) -> Result<()> {
        self.with_space_mut(handle, |s| s.space.active_key_id = key_id.clone())
    }

    async fn list_metadata(&self, handle: &SpaceHandle) -> Result<Vec<MetadataRecord>> {
        self.with_space(handle, |s| s.metadata.values().cloned().collect())
    }

    async fn put_metadata(&self, handle: &SpaceHandle, record: &MetadataRecord) -> Result<()> {
        self.with_space_mut(handle, |s| {
            s.metadata.insert(record.content_id.clone(), record.clone());
        })
    }

    async fn list_concepts(&self, handle: &SpaceHandle) -> Result<Vec<ConceptRecord>> {
        self.with_space(handle, |s| s.concepts.values().cloned().collect())
    }

    async fn put_concept(&self, handle: &SpaceHandle, concept: &ConceptRecord) -> Result<()> {
        self.with_space_mut(handle, |s| {
            s.concepts.insert(concept.id.clone(), concept.clone());
        })
    }

    async fn list_widgets(&self, handle: &SpaceHandle) -> Result<Vec<Widget>> {
        self.with_space(handle, |s| s.widgets.values().cloned().collect())
    }

    async fn put_widget(&self, handle: &SpaceHandle, widget: &Widget) -> Result<()> {
        self.with_space_mut(handle, |s| {
            s.widgets.insert(widget.id.clone(), widget.clone());
        })
    }

    async fn list_transformers(&self, handle: &SpaceHandle) -> Result<Vec<TransformerNode>> {
        self.with_space(handle, |s| s.transformers.values().cloned().collect())
    }

    async fn get_transformer(
        &self,
        handle: &SpaceHandle,
        id: &str,
    ) -> Result<Option<TransformerNode>> {
        self.with_space(handle, |s| s.transformers.get(id).cloned())
    }

    async fn put_transformer(&self, handle: &SpaceHandle, node: &TransformerNode) -> Result<()> {
        self.with_space_mut(handle, |s| {
            s.transformers.insert(node.id.clone(), node.clone());
        })
    }

    async fn put_secret(&self, handle: &SpaceHandle, secret: &Secret) -> Result<()> {
        self.with_space_mut(handle, |s| {
            s.secrets.retain(|existing| !existing.same_slot(secret));
            s.secrets.push(secret.clone());
        })
    }

    async fn secrets_for(&self, handle: &SpaceHandle, receiver: &UserId) -> Result<Vec<Secret>> {
        self.with_space(handle, |s| {
            s.secrets
                .iter()
                .filter(|secret| &secret.receiver == receiver)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealpipe_core::{SymmetricKey, KEY_BITS};

    fn space() -> (DataSpace, Manifest) {
        let handle = SpaceHandle::from("space");
        let key = SymmetricKey::generate(KEY_BITS).unwrap();
        let manifest = Manifest::sign(&handle, vec![UserId::from("alice")], &key);
        (
            DataSpace {
                handle,
                active_key_id: KeyId::from("k1"),
            },
            manifest,
        )
    }

    fn secret(receiver: &str, ciphertext: u8) -> Secret {
        Secret {
            key_id: KeyId::from("k2"),
            owner: UserId::from("alice"),
            receiver: UserId::from(receiver),
            ciphertext: vec![ciphertext],
            message_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_space() {
        let store = MemoryStore::new();
        let (space, manifest) = space();
        store.create_space(&space, &manifest).await.unwrap();

        assert_eq!(store.get_space(&space.handle).await.unwrap(), space);
        assert_eq!(store.fetch_manifest(&space.handle).await.unwrap(), manifest);
        assert!(matches!(
            store.create_space(&space, &manifest).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_space() {
        let store = MemoryStore::new();
        let handle = SpaceHandle::from("nope");
        assert!(matches!(
            store.get_space(&handle).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list_metadata(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_active_key() {
        let store = MemoryStore::new();
        let (space, manifest) = space();
        store.create_space(&space, &manifest).await.unwrap();

        store
            .publish_active_key(&space.handle, &KeyId::from("k2"))
            .await
            .unwrap();
        assert_eq!(
            store.get_space(&space.handle).await.unwrap().active_key_id,
            KeyId::from("k2")
        );
    }

    #[tokio::test]
    async fn test_secret_replaces_same_slot() {
        let store = MemoryStore::new();
        let (space, manifest) = space();
        store.create_space(&space, &manifest).await.unwrap();

        store.put_secret(&space.handle, &secret("bob", 1)).await.unwrap();
        store.put_secret(&space.handle, &secret("carol", 2)).await.unwrap();
        store.put_secret(&space.handle, &secret("bob", 3)).await.unwrap();

        let bob = store
            .secrets_for(&space.handle, &UserId::from("bob"))
            .await
            .unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].ciphertext, vec![3]);
    }

    #[tokio::test]
    async fn test_transformer_replaced_wholesale() {
        let store = MemoryStore::new();
        let (space, manifest) = space();
        store.create_space(&space, &manifest).await.unwrap();

        let mut node = TransformerNode::new("t1");
        node.wal.push_transaction("SELECT 1");
        store.put_transformer(&space.handle, &node).await.unwrap();

        let replacement = TransformerNode::new("t1");
        store.put_transformer(&space.handle, &replacement).await.unwrap();

        let stored = store
            .get_transformer(&space.handle, "t1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.wal.transactions.is_empty());
        assert!(store
            .get_transformer(&space.handle, "t2")
            .await
            .unwrap()
            .is_none());
    }
}
