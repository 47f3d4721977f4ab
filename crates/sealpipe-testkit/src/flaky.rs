//! Fault injection for the collaboration backend.
//!
//! [`FlakyStore`] wraps any store and makes chosen calls fail with
//! `Unavailable` (a transient error) a set number of times. Calls can also
//! be held at a gate to force an interleaving.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sealpipe_core::{KeyId, Manifest, SpaceHandle, UserId};
use sealpipe_store::{
    ConceptRecord, DataSpace, MetadataRecord, Result, Secret, Store, StoreError, TransformerNode,
    Widget,
};
use tokio::sync::OwnedMutexGuard;

/// Store calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetSpace,
    CreateSpace,
    FetchManifest,
    PutManifest,
    PublishActiveKey,
    ListMetadata,
    PutMetadata,
    ListConcepts,
    PutConcept,
    ListWidgets,
    PutWidget,
    ListTransformers,
    GetTransformer,
    PutTransformer,
    PutSecret,
    SecretsFor,
}

/// A store wrapper that injects transient failures.
pub struct FlakyStore<S> {
    inner: S,
    failures: Mutex<HashMap<Op, usize>>,
    calls: Mutex<HashMap<Op, usize>>,
    gates: Mutex<HashMap<Op, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `times` calls to `op`.
    pub fn fail_next(&self, op: Op, times: usize) {
        self.failures.lock().unwrap().insert(op, times);
    }

    /// Fail every call to `op` until [`FlakyStore::heal`].
    pub fn fail_always(&self, op: Op) {
        self.fail_next(op, usize::MAX);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Calls made to `op`, failed ones included.
    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Block calls to `op` until the returned guard is dropped.
    pub async fn hold(&self, op: Op) -> OwnedMutexGuard<()> {
        let gate = self.gates.lock().unwrap().entry(op).or_default().clone();
        gate.lock_owned().await
    }

    async fn trip(&self, op: Op) -> Result<()> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;

        let gate = self.gates.lock().unwrap().get(&op).cloned();
        if let Some(gate) = gate {
            drop(gate.lock().await);
        }

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&op) {
            Some(left) if *left > 0 => {
                if *left != usize::MAX {
                    *left -= 1;
                }
                Err(StoreError::Unavailable(format!("injected failure in {op:?}")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<S: Store> Store for FlakyStore<S> {
    async fn get_space(&self, handle: &SpaceHandle) -> Result<DataSpace> {
        self.trip(Op::GetSpace).await?;
        self.inner.get_space(handle).await
    }

    async fn create_space(&self, space: &DataSpace, manifest: &Manifest) -> Result<()> {
        self.trip(Op::CreateSpace).await?;
        self.inner.create_space(space, manifest).await
    }

    async fn fetch_manifest(&self, handle: &SpaceHandle) -> Result<Manifest> {
        self.trip(Op::FetchManifest).await?;
        self.inner.fetch_manifest(handle).await
    }

    async fn put_manifest(&self, handle: &SpaceHandle, manifest: &Manifest) -> Result<()> {
        self.trip(Op::PutManifest).await?;
        self.inner.put_manifest(handle, manifest).await
    }

    async fn publish_active_key(&self, handle: &SpaceHandle, key_id: &KeyId) -> Result<()> {
        self.trip(Op::PublishActiveKey).await?;
        self.inner.publish_active_key(handle, key_id).await
    }

    async fn list_metadata(&self, handle: &SpaceHandle) -> Result<Vec<MetadataRecord>> {
        self.trip(Op::ListMetadata).await?;
        self.inner.list_metadata(handle).await
    }

    async fn put_metadata(&self, handle: &SpaceHandle, record: &MetadataRecord) -> Result<()> {
        self.trip(Op::PutMetadata).await?;
        self.inner.put_metadata(handle, record).await
    }

    async fn list_concepts(&self, handle: &SpaceHandle) -> Result<Vec<ConceptRecord>> {
        self.trip(Op::ListConcepts).await?;
        self.inner.list_concepts(handle).await
    }

    async fn put_concept(&self, handle: &SpaceHandle, concept: &ConceptRecord) -> Result<()> {
        self.trip(Op::PutConcept).await?;
        self.inner.put_concept(handle, concept).await
    }

    async fn list_widgets(&self, handle: &SpaceHandle) -> Result<Vec<Widget>> {
        self.trip(Op::ListWidgets).await?;
        self.inner.list_widgets(handle).await
    }

    async fn put_widget(&self, handle: &SpaceHandle, widget: &Widget) -> Result<()> {
        self.trip(Op::PutWidget).await?;
        self.inner.put_widget(handle, widget).await
    }

    async fn list_transformers(&self, handle: &SpaceHandle) -> Result<Vec<TransformerNode>> {
        self.trip(Op::ListTransformers).await?;
        self.inner.list_transformers(handle).await
    }

    async fn get_transformer(
        &self,
        handle: &SpaceHandle,
        id: &str,
    ) -> Result<Option<TransformerNode>> {
        self.trip(Op::GetTransformer).await?;
        self.inner.get_transformer(handle, id).await
    }

    async fn put_transformer(&self, handle: &SpaceHandle, node: &TransformerNode) -> Result<()> {
        self.trip(Op::PutTransformer).await?;
        self.inner.put_transformer(handle, node).await
    }

    async fn put_secret(&self, handle: &SpaceHandle, secret: &Secret) -> Result<()> {
        self.trip(Op::PutSecret).await?;
        self.inner.put_secret(handle, secret).await
    }

    async fn secrets_for(&self, handle: &SpaceHandle, receiver: &UserId) -> Result<Vec<Secret>> {
        self.trip(Op::SecretsFor).await?;
        self.inner.secrets_for(handle, receiver).await
    }
}
