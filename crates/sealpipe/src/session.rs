//! A client's session on one data space.
//!
//! The session caches the space's active key id and value registry. A
//! completed rotation invalidates it; after that every operation fails
//! with [`SealpipeError::SessionInvalidated`] and the caller starts a new
//! session against the new key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sealpipe_channel::{ChannelEvent, InboxReport, SecretInbox, SecureChannel, Transport};
use sealpipe_core::{materialize, ContentId, KeyId, KeyStore, Sealed, SpaceHandle, UserId, ValueRegistry};
use sealpipe_store::{DataSpace, MetadataRecord, Store, StoreExt, TransformerNode};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SealpipeError};
use crate::rotation::{RotationCheckpoint, RotationCoordinator, RotationReport};

/// Cached view of the space.
#[derive(Debug, Clone)]
struct SessionState {
    space: DataSpace,
    registry: ValueRegistry,
}

/// Exclusive edit access to one transformer node.
pub type TransformerGuard = OwnedMutexGuard<()>;

/// A client's session on one data space.
pub struct Session<S: ?Sized, C: ?Sized, K: ?Sized> {
    pub(crate) store: Arc<S>,
    pub(crate) channel: Arc<C>,
    pub(crate) keys: Arc<K>,
    transport: Option<Arc<dyn Transport>>,
    config: SessionConfig,
    state: RwLock<Option<SessionState>>,
    pub(crate) rotation_lock: Mutex<()>,
    /// Held shared by local writes and exclusively by a running rotation.
    pub(crate) write_gate: RwLock<()>,
    edit_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S, C, K> Session<S, C, K>
where
    S: Store + ?Sized,
    C: SecureChannel + ?Sized,
    K: KeyStore + ?Sized,
{
    /// Open a session.
    ///
    /// Applies key shares that arrived while the user was offline before
    /// loading the space, so a rotation done elsewhere is picked up.
    pub async fn start(
        store: Arc<S>,
        channel: Arc<C>,
        keys: Arc<K>,
        config: SessionConfig,
    ) -> Result<Self> {
        if channel.local_user() != &config.user {
            return Err(SealpipeError::Config(format!(
                "channel belongs to {}, session configured for {}",
                channel.local_user(),
                config.user
            )));
        }

        let session = Self {
            store,
            channel,
            keys,
            transport: None,
            config,
            state: RwLock::new(None),
            rotation_lock: Mutex::new(()),
            write_gate: RwLock::new(()),
            edit_locks: Mutex::new(HashMap::new()),
        };

        session.apply_pending_secrets().await?;
        let state = session.load_state().await?;

        if !session.keys.has_key(&state.space.active_key_id) {
            warn!(
                space = %state.space.handle,
                key_id = %state.space.active_key_id,
                "active key not in local key store; sealed content will not open"
            );
        }
        info!(
            space = %state.space.handle,
            user = %session.config.user,
            key_id = %state.space.active_key_id,
            values = state.registry.len(),
            "session started"
        );

        *session.state.write().await = Some(state);
        Ok(session)
    }

    /// Attach a live event transport for rotation notifications.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn handle(&self) -> &SpaceHandle {
        &self.config.space
    }

    pub fn user(&self) -> &UserId {
        &self.config.user
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    pub fn keys(&self) -> &Arc<K> {
        &self.keys
    }

    pub(crate) fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn is_invalidated(&self) -> bool {
        self.state.read().await.is_none()
    }

    /// Drop cached state; later operations fail until a new session starts.
    pub async fn invalidate(&self) {
        if self.state.write().await.take().is_some() {
            info!(space = %self.handle(), "session invalidated");
        }
        self.edit_locks.lock().await.clear();
    }

    /// Close the session.
    pub async fn teardown(self) {
        self.invalidate().await;
        debug!(space = %self.handle(), user = %self.user(), "session closed");
    }

    pub(crate) async fn ensure_active(&self) -> Result<()> {
        if self.is_invalidated().await {
            return Err(SealpipeError::SessionInvalidated);
        }
        Ok(())
    }

    /// Admit one local write, or refuse it while this session rotates.
    async fn begin_write(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let guard = self
            .write_gate
            .try_read()
            .map_err(|_| SealpipeError::RotationInProgress)?;
        self.ensure_active().await?;
        Ok(guard)
    }

    async fn load_state(&self) -> Result<SessionState> {
        let handle = self.handle();
        let retry = &self.config.retry;
        let space = retry
            .run("get space", || self.store.get_space(handle))
            .await?;
        let registry = retry
            .run("load values", || self.store.value_registry(handle))
            .await?;
        Ok(SessionState { space, registry })
    }

    async fn current(&self) -> Result<SessionState> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(SealpipeError::SessionInvalidated)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Space state
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn active_key_id(&self) -> Result<KeyId> {
        Ok(self.current().await?.space.active_key_id)
    }

    /// Re-read the space and its value registry from the store.
    ///
    /// Invalidates the session if the active key moved underneath it.
    pub async fn refresh_space(&self) -> Result<DataSpace> {
        let cached = self.current().await?;
        let fresh = self.load_state().await?;

        if fresh.space.active_key_id != cached.space.active_key_id {
            warn!(
                space = %self.handle(),
                old = %cached.space.active_key_id,
                new = %fresh.space.active_key_id,
                "active key changed"
            );
            self.invalidate().await;
            return Err(SealpipeError::SessionInvalidated);
        }

        let space = fresh.space.clone();
        let mut state = self.state.write().await;
        if state.is_none() {
            return Err(SealpipeError::SessionInvalidated);
        }
        *state = Some(fresh);
        Ok(space)
    }

    pub async fn value_registry(&self) -> Result<ValueRegistry> {
        Ok(self.current().await?.registry)
    }

    /// Encrypt a literal under the active key and publish it to the
    /// value registry.
    ///
    /// Refused with [`SealpipeError::RotationInProgress`] while this session
    /// is rotating the space key.
    pub async fn seal_value(&self, plaintext: &str) -> Result<ContentId> {
        let _write = self.begin_write().await?;
        let key_id = self.active_key_id().await?;
        let sealed = self.keys.encrypt_metadata(&key_id, plaintext)?;
        let record = MetadataRecord {
            content_id: ContentId::generate(),
            sealed,
        };

        self.config
            .retry
            .run("put value", || self.store.put_metadata(self.handle(), &record))
            .await?;

        let mut state = self.state.write().await;
        let state = state.as_mut().ok_or(SealpipeError::SessionInvalidated)?;
        state
            .registry
            .insert(record.content_id.clone(), record.sealed);
        Ok(record.content_id)
    }

    /// Seal arbitrary bytes under the active key without publishing them.
    pub async fn seal_bytes(&self, plaintext: &[u8]) -> Result<Sealed> {
        let key_id = self.active_key_id().await?;
        Ok(self.keys.encrypt_bytes(&key_id, plaintext)?)
    }

    /// Open bytes sealed under the active key.
    pub async fn open_bytes(&self, sealed: &Sealed) -> Result<Vec<u8>> {
        let key_id = self.active_key_id().await?;
        Ok(self.keys.decrypt_bytes(&key_id, sealed)?)
    }

    /// Resolve a WAL template into an executable statement.
    pub async fn materialize(&self, template: &str, wal: &sealpipe_core::Wal) -> Result<String> {
        let state = self.current().await?;
        Ok(materialize(
            template,
            wal,
            &state.registry,
            &state.space.active_key_id,
            &*self.keys,
        )?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transformers
    // ─────────────────────────────────────────────────────────────────────────

    /// Take the edit lock for one transformer node.
    ///
    /// Edits to different nodes proceed concurrently.
    pub async fn lock_transformer(&self, id: &str) -> Result<TransformerGuard> {
        self.ensure_active().await?;
        let lock = self
            .edit_locks
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone();
        Ok(lock.lock_owned().await)
    }

    /// Load a node, or an empty one if it does not exist yet.
    pub async fn transformer(&self, id: &str) -> Result<TransformerNode> {
        self.ensure_active().await?;
        let node = self.store.get_transformer(self.handle(), id).await?;
        Ok(node.unwrap_or_else(|| TransformerNode::new(id)))
    }

    /// Persist a node, replacing its WAL in full.
    pub async fn commit_transformer(&self, node: &TransformerNode) -> Result<()> {
        let _write = self.begin_write().await?;
        self.persist_transformer(node).await
    }

    async fn persist_transformer(&self, node: &TransformerNode) -> Result<()> {
        self.config
            .retry
            .run("put transformer", || self.store.put_transformer(self.handle(), node))
            .await?;
        debug!(id = %node.id, transactions = node.wal.transactions.len(), "committed transformer");
        Ok(())
    }

    /// Load, edit and commit one node under its edit lock.
    pub async fn edit_transformer<F, T>(&self, id: &str, edit: F) -> Result<(TransformerNode, T)>
    where
        F: FnOnce(&mut TransformerNode) -> T,
    {
        let _write = self.begin_write().await?;
        let _guard = self.lock_transformer(id).await?;
        let mut node = self.transformer(id).await?;
        let out = edit(&mut node);
        self.persist_transformer(&node).await?;
        Ok((node, out))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply key shares persisted for this user.
    pub async fn apply_pending_secrets(&self) -> Result<InboxReport> {
        let inbox = SecretInbox::new(self.channel.clone(), self.keys.clone());
        Ok(inbox.drain_store(&*self.store, self.handle()).await?)
    }

    /// Wait for one live event and react to it.
    ///
    /// Shares are applied; a rotation of this space invalidates the
    /// session. Returns `None` on timeout or without a transport.
    pub async fn pump_events(&self, timeout: Duration) -> Result<Option<ChannelEvent>> {
        let Some(transport) = &self.transport else {
            return Ok(None);
        };

        let inbox = SecretInbox::new(self.channel.clone(), self.keys.clone());
        let event = inbox.pump(&**transport, timeout).await?;

        if let Some(ChannelEvent::KeyRotated { handle, key_id }) = &event {
            if handle == self.handle() {
                let current = self.state.read().await.as_ref().map(|s| s.space.active_key_id.clone());
                if current.as_ref() != Some(key_id) {
                    info!(space = %handle, %key_id, "space key rotated elsewhere");
                    self.invalidate().await;
                }
            }
        }
        Ok(event)
    }

    /// Rotate the space key. See [`crate::rotation`].
    pub async fn rotate_key(&self) -> Result<RotationReport> {
        RotationCoordinator::new(self).run().await
    }

    /// Continue an interrupted rotation.
    pub async fn resume_rotation(&self, checkpoint: RotationCheckpoint) -> Result<RotationReport> {
        RotationCoordinator::new(self).resume(checkpoint).await
    }
}
