//! Multi-client key rotation.
//!
//! Rotation moves a data space from its active key to a fresh one:
//!
//! ```text
//! Idle → ManifestFetched → ManifestVerified → NewKeyCommitted
//!      → MetadataRotated → ConceptsRotated → WidgetsRotated
//!      → TransformersRotated → KeysShared → ManifestResigned
//!      → SessionInvalidated
//! ```
//!
//! Publishing the new key id is the point of no return. Before it, any
//! failure leaves the space untouched and the verification phase is
//! retried from `Idle`. After it, every step is idempotent and is retried
//! forward; if a step still fails, the caller gets a [`RotationCheckpoint`]
//! to resume from.
//!
//! Rotation is serialized per client only. Two clients rotating the same
//! space at once is not coordinated. While a rotation runs, the rotating
//! session refuses its own writes with
//! [`SealpipeError::RotationInProgress`].
//!
//! Each reseal step opens a record with whatever key it is sealed under,
//! as long as the local key store holds that key. Records sealed under a
//! key this client does not hold are skipped and listed in
//! [`RotationReport::stranded`].

use std::fmt;
use std::future::Future;

use futures::future::try_join_all;
use sealpipe_channel::{ChannelEvent, SecureChannel};
use sealpipe_core::{KeyId, KeyStore, Manifest, Sealed, SpaceHandle};
use sealpipe_store::{
    ConceptRecord, MetadataRecord, Secret, Store, TransformerNode, Widget, WidgetContent,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SealpipeError};
use crate::session::Session;

/// Rotation progress, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RotationState {
    Idle,
    ManifestFetched,
    ManifestVerified,
    NewKeyCommitted,
    MetadataRotated,
    ConceptsRotated,
    WidgetsRotated,
    TransformersRotated,
    KeysShared,
    ManifestResigned,
    SessionInvalidated,
}

impl RotationState {
    /// The state after this one.
    pub fn next(self) -> Option<Self> {
        use RotationState::*;
        match self {
            Idle => Some(ManifestFetched),
            ManifestFetched => Some(ManifestVerified),
            ManifestVerified => Some(NewKeyCommitted),
            NewKeyCommitted => Some(MetadataRotated),
            MetadataRotated => Some(ConceptsRotated),
            ConceptsRotated => Some(WidgetsRotated),
            WidgetsRotated => Some(TransformersRotated),
            TransformersRotated => Some(KeysShared),
            KeysShared => Some(ManifestResigned),
            ManifestResigned => Some(SessionInvalidated),
            SessionInvalidated => None,
        }
    }

    /// Whether the new key id has been published.
    pub fn is_past_point_of_no_return(self) -> bool {
        self >= RotationState::NewKeyCommitted
    }

    pub fn is_terminal(self) -> bool {
        self == RotationState::SessionInvalidated
    }

    pub fn as_str(self) -> &'static str {
        use RotationState::*;
        match self {
            Idle => "idle",
            ManifestFetched => "manifest_fetched",
            ManifestVerified => "manifest_verified",
            NewKeyCommitted => "new_key_committed",
            MetadataRotated => "metadata_rotated",
            ConceptsRotated => "concepts_rotated",
            WidgetsRotated => "widgets_rotated",
            TransformersRotated => "transformers_rotated",
            KeysShared => "keys_shared",
            ManifestResigned => "manifest_resigned",
            SessionInvalidated => "session_invalidated",
        }
    }
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to pick a rotation back up.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationCheckpoint {
    pub handle: SpaceHandle,
    /// Last state reached.
    pub state: RotationState,
    pub old_key_id: KeyId,
    pub new_key_id: KeyId,
    /// The verified manifest; re-signed at the end.
    pub manifest: Manifest,
}

/// A rotation that stopped partway.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("rotation interrupted at {}: {source}", .checkpoint.state)]
    Interrupted {
        checkpoint: Box<RotationCheckpoint>,
        source: Box<SealpipeError>,
    },
}

impl RotationError {
    pub fn checkpoint(&self) -> &RotationCheckpoint {
        match self {
            RotationError::Interrupted { checkpoint, .. } => checkpoint,
        }
    }

    pub fn into_checkpoint(self) -> RotationCheckpoint {
        match self {
            RotationError::Interrupted { checkpoint, .. } => *checkpoint,
        }
    }
}

/// Kinds of record a rotation reseals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Metadata,
    Concept,
    Widget,
    Transformer,
}

/// A record left under a key the rotating client does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandedRecord {
    pub kind: RecordKind,
    pub id: String,
    pub key_id: KeyId,
}

/// Summary of a finished rotation.
#[derive(Debug, Clone)]
pub struct RotationReport {
    pub old_key_id: KeyId,
    pub new_key_id: KeyId,
    pub metadata: usize,
    pub concepts: usize,
    pub widgets: usize,
    pub transformers: usize,
    /// Records skipped because their key is not held locally.
    pub stranded: Vec<StrandedRecord>,
    /// Shares written for the other members.
    pub secrets: Vec<Secret>,
    pub final_state: RotationState,
}

impl RotationReport {
    fn start(checkpoint: &RotationCheckpoint) -> Self {
        Self {
            old_key_id: checkpoint.old_key_id.clone(),
            new_key_id: checkpoint.new_key_id.clone(),
            metadata: 0,
            concepts: 0,
            widgets: 0,
            transformers: 0,
            stranded: Vec::new(),
            secrets: Vec::new(),
            final_state: checkpoint.state,
        }
    }

    fn record(&mut self, state: RotationState, outcome: StepOutcome) {
        self.stranded.extend(outcome.stranded);
        match state {
            RotationState::MetadataRotated => self.metadata = outcome.touched,
            RotationState::ConceptsRotated => self.concepts = outcome.touched,
            RotationState::WidgetsRotated => self.widgets = outcome.touched,
            RotationState::TransformersRotated => self.transformers = outcome.touched,
            RotationState::KeysShared => self.secrets = outcome.secrets,
            _ => {}
        }
        self.final_state = state;
    }
}

#[derive(Debug, Default)]
struct StepOutcome {
    touched: usize,
    stranded: Vec<StrandedRecord>,
    secrets: Vec<Secret>,
}

impl StepOutcome {
    fn touched(touched: usize) -> Self {
        Self {
            touched,
            ..Self::default()
        }
    }

    fn resealed(touched: usize, stranded: Vec<StrandedRecord>) -> Self {
        Self {
            touched,
            stranded,
            ..Self::default()
        }
    }
}

/// A stored record with parts a rotation reseals.
trait Rotatable {
    const KIND: RecordKind;

    fn record_id(&self) -> &str;

    fn sealed_parts(&self) -> Vec<&Sealed>;
}

impl Rotatable for MetadataRecord {
    const KIND: RecordKind = RecordKind::Metadata;

    fn record_id(&self) -> &str {
        self.content_id.as_str()
    }

    fn sealed_parts(&self) -> Vec<&Sealed> {
        vec![&self.sealed]
    }
}

impl Rotatable for ConceptRecord {
    const KIND: RecordKind = RecordKind::Concept;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sealed_parts(&self) -> Vec<&Sealed> {
        vec![&self.sealed]
    }
}

/// Only widgets published with an internal grant carry sealed content.
impl Rotatable for Widget {
    const KIND: RecordKind = RecordKind::Widget;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sealed_parts(&self) -> Vec<&Sealed> {
        if self.is_internal() {
            self.sealed().into_iter().collect()
        } else {
            Vec::new()
        }
    }
}

impl Rotatable for TransformerNode {
    const KIND: RecordKind = RecordKind::Transformer;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn sealed_parts(&self) -> Vec<&Sealed> {
        self.wal.sealed_parts().collect()
    }
}

/// Drives one rotation for a session.
pub struct RotationCoordinator<'a, S: ?Sized, C: ?Sized, K: ?Sized> {
    session: &'a Session<S, C, K>,
}

impl<'a, S, C, K> RotationCoordinator<'a, S, C, K>
where
    S: Store + ?Sized,
    C: SecureChannel + ?Sized,
    K: KeyStore + ?Sized,
{
    pub fn new(session: &'a Session<S, C, K>) -> Self {
        Self { session }
    }

    /// Rotate the space key from scratch.
    pub async fn run(&self) -> Result<RotationReport> {
        let _guard = self
            .session
            .rotation_lock
            .try_lock()
            .map_err(|_| SealpipeError::RotationInProgress)?;
        let _writes = self.session.write_gate.write().await;

        self.session.ensure_active().await?;
        let checkpoint = self.prepare().await?;
        self.advance(checkpoint).await
    }

    /// Continue an interrupted rotation.
    ///
    /// A checkpoint from before the new key was generated carries nothing
    /// worth keeping, so rotation restarts.
    pub async fn resume(&self, checkpoint: RotationCheckpoint) -> Result<RotationReport> {
        let _guard = self
            .session
            .rotation_lock
            .try_lock()
            .map_err(|_| SealpipeError::RotationInProgress)?;
        let _writes = self.session.write_gate.write().await;

        if &checkpoint.handle != self.session.handle() {
            return Err(SealpipeError::Config(format!(
                "checkpoint is for space {}, session is for {}",
                checkpoint.handle,
                self.session.handle()
            )));
        }

        if checkpoint.state < RotationState::ManifestVerified {
            self.session.ensure_active().await?;
            let checkpoint = self.prepare().await?;
            return self.advance(checkpoint).await;
        }

        info!(
            space = %checkpoint.handle,
            state = %checkpoint.state,
            new_key_id = %checkpoint.new_key_id,
            "resuming key rotation"
        );
        self.advance(checkpoint).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Before the point of no return
    // ─────────────────────────────────────────────────────────────────────────

    async fn prepare(&self) -> Result<RotationCheckpoint> {
        let config = self.session.config();
        let handle = self.session.handle();

        let (manifest, old_key_id) = config
            .retry
            .run("verify manifest", || self.fetch_and_verify())
            .await?;

        let new_key_id = self.session.keys.generate_key(config.rotation.key_bits)?;
        info!(space = %handle, %old_key_id, %new_key_id, "generated rotation key");

        Ok(RotationCheckpoint {
            handle: handle.clone(),
            state: RotationState::ManifestVerified,
            old_key_id,
            new_key_id,
            manifest,
        })
    }

    async fn fetch_and_verify(&self) -> Result<(Manifest, KeyId)> {
        let handle = self.session.handle();
        let store = &*self.session.store;

        let manifest = store.fetch_manifest(handle).await?;
        info!(space = %handle, from = %RotationState::Idle, to = %RotationState::ManifestFetched, "rotation advanced");

        let space = store.get_space(handle).await?;
        let old_key = self.session.keys.get_key(&space.active_key_id)?;
        if manifest.verify(handle, &old_key).is_err() {
            error!(space = %handle, key_id = %space.active_key_id, "manifest signature invalid, aborting rotation");
            return Err(SealpipeError::ManifestSignatureInvalid);
        }
        info!(space = %handle, from = %RotationState::ManifestFetched, to = %RotationState::ManifestVerified, "rotation advanced");

        Ok((manifest, space.active_key_id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Forward steps
    // ─────────────────────────────────────────────────────────────────────────

    async fn advance(&self, mut checkpoint: RotationCheckpoint) -> Result<RotationReport> {
        let retry = &self.session.config().retry;
        let mut report = RotationReport::start(&checkpoint);

        while let Some(next) = checkpoint.state.next() {
            let outcome = retry
                .run(next.as_str(), || self.step(next, &checkpoint))
                .await;

            match outcome {
                Ok(outcome) => {
                    info!(
                        space = %checkpoint.handle,
                        from = %checkpoint.state,
                        to = %next,
                        touched = outcome.touched,
                        "rotation advanced"
                    );
                    report.record(next, outcome);
                    checkpoint.state = next;
                }
                Err(source) => {
                    error!(
                        space = %checkpoint.handle,
                        state = %checkpoint.state,
                        step = %next,
                        error = %source,
                        "rotation interrupted"
                    );
                    // The published key may no longer match the cached one.
                    if next.is_past_point_of_no_return() {
                        self.session.invalidate().await;
                    }
                    return Err(RotationError::Interrupted {
                        checkpoint: Box::new(checkpoint),
                        source: Box::new(source),
                    }
                    .into());
                }
            }
        }

        Ok(report)
    }

    async fn step(&self, state: RotationState, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        match state {
            RotationState::Idle
            | RotationState::ManifestFetched
            | RotationState::ManifestVerified => Ok(StepOutcome::default()),
            RotationState::NewKeyCommitted => self.commit_key(cp).await,
            RotationState::MetadataRotated => self.rotate_metadata(cp).await,
            RotationState::ConceptsRotated => self.rotate_concepts(cp).await,
            RotationState::WidgetsRotated => self.rotate_widgets(cp).await,
            RotationState::TransformersRotated => self.rotate_transformers(cp).await,
            RotationState::KeysShared => self.share_key(cp).await,
            RotationState::ManifestResigned => self.resign_manifest(cp).await,
            RotationState::SessionInvalidated => {
                self.session.invalidate().await;
                Ok(StepOutcome::default())
            }
        }
    }

    async fn commit_key(&self, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        self.session
            .store
            .publish_active_key(&cp.handle, &cp.new_key_id)
            .await?;

        self.notify(ChannelEvent::KeyRotated {
            handle: cp.handle.clone(),
            key_id: cp.new_key_id.clone(),
        })
        .await;
        Ok(StepOutcome::default())
    }

    async fn rotate_metadata(&self, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        let store = &*self.session.store;
        let (handle, new) = (&cp.handle, &cp.new_key_id);

        let (pending, stranded) = self.triage(store.list_metadata(handle).await?, new);

        let touched = self
            .fan_out(pending, |record| async move {
                let sealed = self.reseal(&record.sealed, new)?;
                store
                    .put_metadata(
                        handle,
                        &MetadataRecord {
                            content_id: record.content_id,
                            sealed,
                        },
                    )
                    .await?;
                Ok::<_, SealpipeError>(())
            })
            .await?;
        Ok(StepOutcome::resealed(touched, stranded))
    }

    async fn rotate_concepts(&self, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        let store = &*self.session.store;
        let (handle, new) = (&cp.handle, &cp.new_key_id);

        let (pending, stranded) = self.triage(store.list_concepts(handle).await?, new);

        let touched = self
            .fan_out(pending, |concept| async move {
                let sealed = self.reseal(&concept.sealed, new)?;
                store
                    .put_concept(handle, &ConceptRecord { id: concept.id, sealed })
                    .await?;
                Ok::<_, SealpipeError>(())
            })
            .await?;
        Ok(StepOutcome::resealed(touched, stranded))
    }

    async fn rotate_widgets(&self, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        let store = &*self.session.store;
        let (handle, new) = (&cp.handle, &cp.new_key_id);

        let (pending, stranded) = self.triage(store.list_widgets(handle).await?, new);

        let touched = self
            .fan_out(pending, |widget| async move {
                let Some(sealed) = widget.sealed() else {
                    return Ok(());
                };
                let content = WidgetContent::Sealed(self.reseal(sealed, new)?);
                store
                    .put_widget(handle, &Widget { content, ..widget })
                    .await?;
                Ok::<_, SealpipeError>(())
            })
            .await?;
        Ok(StepOutcome::resealed(touched, stranded))
    }

    async fn rotate_transformers(&self, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        let store = &*self.session.store;
        let (handle, new) = (&cp.handle, &cp.new_key_id);

        let (pending, stranded) = self.triage(store.list_transformers(handle).await?, new);

        let touched = self
            .fan_out(pending, |node| async move {
                let wal = node.wal.map_sealed(|s| self.reseal(s, new))?;
                store
                    .put_transformer(handle, &TransformerNode { id: node.id, wal })
                    .await?;
                Ok::<_, SealpipeError>(())
            })
            .await?;
        Ok(StepOutcome::resealed(touched, stranded))
    }

    /// Encrypt the new key for every other member and persist the shares.
    async fn share_key(&self, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        let (store, channel) = (&*self.session.store, &*self.session.channel);
        let me = self.session.user();
        let raw = self.session.keys.get_key(&cp.new_key_id)?;

        let receivers: Vec<_> = cp.manifest.others(me).cloned().collect();
        let shares = try_join_all(receivers.into_iter().map(|receiver| {
            let raw = &raw;
            async move {
                let ciphertext = channel.encrypt(&receiver, raw.as_bytes()).await?;
                let secret = Secret {
                    key_id: cp.new_key_id.clone(),
                    owner: me.clone(),
                    receiver,
                    ciphertext,
                    message_id: Some(uuid::Uuid::new_v4().to_string()),
                };
                store.put_secret(&cp.handle, &secret).await?;
                debug!(receiver = %secret.receiver, key_id = %secret.key_id, "stored key share");
                Ok::<_, SealpipeError>(secret)
            }
        }))
        .await?;

        for share in &shares {
            self.notify(ChannelEvent::SecretShared(share.clone())).await;
        }

        Ok(StepOutcome {
            touched: shares.len(),
            secrets: shares,
            ..StepOutcome::default()
        })
    }

    async fn resign_manifest(&self, cp: &RotationCheckpoint) -> Result<StepOutcome> {
        let new_key = self.session.keys.get_key(&cp.new_key_id)?;
        let manifest = cp.manifest.resign(&cp.handle, &new_key);
        self.session
            .store
            .put_manifest(&cp.handle, &manifest)
            .await?;

        self.notify(ChannelEvent::ManifestUpdated {
            handle: cp.handle.clone(),
        })
        .await;
        Ok(StepOutcome::touched(1))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Split records into those still to reseal and those sealed under a key
    /// the local key store does not hold. Records already under `new` are
    /// dropped.
    fn triage<T: Rotatable>(&self, records: Vec<T>, new: &KeyId) -> (Vec<T>, Vec<StrandedRecord>) {
        let keys = &*self.session.keys;
        let mut pending = Vec::new();
        let mut stranded = Vec::new();

        for record in records {
            let parts = record.sealed_parts();
            let missing = parts
                .iter()
                .find(|s| !s.is_under(new) && !keys.has_key(&s.key_id))
                .map(|s| s.key_id.clone());
            let stale = parts.iter().any(|s| !s.is_under(new));

            if let Some(key_id) = missing {
                warn!(
                    kind = ?T::KIND,
                    id = record.record_id(),
                    %key_id,
                    "record sealed under a key not held locally, skipping"
                );
                stranded.push(StrandedRecord {
                    kind: T::KIND,
                    id: record.record_id().to_string(),
                    key_id,
                });
            } else if stale {
                pending.push(record);
            }
        }
        (pending, stranded)
    }

    /// Move one sealed part to `new` from whichever held key it is under.
    fn reseal(&self, sealed: &Sealed, new: &KeyId) -> sealpipe_core::Result<Sealed> {
        if !sealed.is_under(new) {
            debug!(from = %sealed.key_id, to = %new, "resealing");
        }
        self.session.keys.reseal(sealed, &sealed.key_id, new)
    }

    /// Run `f` over `items`, at most `max_parallel` at a time.
    async fn fan_out<T, F, Fut>(&self, items: Vec<T>, f: F) -> Result<usize>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let total = items.len();
        let width = self.session.config().rotation.max_parallel.max(1);
        let mut items = items.into_iter().peekable();

        while items.peek().is_some() {
            let batch: Vec<Fut> = items.by_ref().take(width).map(&f).collect();
            try_join_all(batch).await?;
        }
        Ok(total)
    }

    /// Best-effort live notification; persisted state is authoritative.
    async fn notify(&self, event: ChannelEvent) {
        let Some(transport) = self.session.transport() else {
            return;
        };

        let result = match &event {
            ChannelEvent::SecretShared(share) => transport.send(&share.receiver, event.clone()).await,
            _ => transport.broadcast(event.clone()).await,
        };
        if let Err(e) = result {
            warn!(error = %e, ?event, "failed to deliver rotation event");
        }
    }
}
