//! Applying key shares addressed to the local user.
//!
//! Shares arrive two ways: live over the event stream, and from the store
//! when the user comes back online. Both paths funnel through
//! [`SecretInbox::apply`], and `add_key` is idempotent, so seeing a share
//! twice is harmless.

use std::sync::Arc;
use std::time::Duration;

use sealpipe_core::{KeyId, KeyStore, SpaceHandle, KEY_BITS};
use sealpipe_store::Store;
use tracing::{debug, info, warn};

use crate::channel::SecureChannel;
use crate::error::{ChannelError, Result};
use crate::messages::{ChannelEvent, SecretShare};
use crate::transport::Transport;

/// Outcome of draining persisted shares.
#[derive(Debug, Default)]
pub struct InboxReport {
    /// Keys added (or already present).
    pub applied: Vec<KeyId>,
    /// Shares that failed to open, with the reason.
    pub rejected: Vec<(KeyId, String)>,
}

/// Receives key shares for the channel's local user.
pub struct SecretInbox<C: ?Sized, K: ?Sized> {
    channel: Arc<C>,
    keys: Arc<K>,
}

impl<C, K> SecretInbox<C, K>
where
    C: SecureChannel + ?Sized,
    K: KeyStore + ?Sized,
{
    pub fn new(channel: Arc<C>, keys: Arc<K>) -> Self {
        Self { channel, keys }
    }

    /// Apply one share.
    ///
    /// Returns `None` if the share is addressed to someone else.
    pub async fn apply(&self, share: &SecretShare) -> Result<Option<KeyId>> {
        if &share.receiver != self.channel.local_user() {
            return Ok(None);
        }

        let raw = self.channel.decrypt(&share.owner, &share.ciphertext).await?;
        if raw.len() * 8 != KEY_BITS as usize {
            return Err(ChannelError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_BITS / 8,
                raw.len()
            )));
        }

        let key_id = self.keys.add_key(&share.key_id, &raw)?;
        info!(%key_id, owner = %share.owner, "applied key share");
        Ok(Some(key_id))
    }

    /// Pull and apply every persisted share for the local user.
    ///
    /// A share that fails to open is reported, not fatal; store errors are.
    pub async fn drain_store<S: Store + ?Sized>(
        &self,
        store: &S,
        handle: &SpaceHandle,
    ) -> Result<InboxReport> {
        let shares = store.secrets_for(handle, self.channel.local_user()).await?;
        let mut report = InboxReport::default();

        for share in &shares {
            match self.apply(share).await {
                Ok(Some(key_id)) => report.applied.push(key_id),
                Ok(None) => {}
                Err(e) => {
                    warn!(key_id = %share.key_id, owner = %share.owner, error = %e, "rejected key share");
                    report.rejected.push((share.key_id.clone(), e.to_string()));
                }
            }
        }

        debug!(
            applied = report.applied.len(),
            rejected = report.rejected.len(),
            "drained persisted key shares"
        );
        Ok(report)
    }

    /// Wait for one live event and apply it if it carries a share.
    ///
    /// Returns the event so the caller can react to rotations, or `None`
    /// on timeout.
    pub async fn pump<T: Transport + ?Sized>(
        &self,
        transport: &T,
        timeout: Duration,
    ) -> Result<Option<ChannelEvent>> {
        let Some((from, event)) = transport.recv_timeout(timeout).await? else {
            return Ok(None);
        };

        if let ChannelEvent::SecretShared(share) = &event {
            if share.owner != from {
                warn!(%from, owner = %share.owner, "share relayed by a different sender");
            }
            self.apply(share).await?;
        }
        Ok(Some(event))
    }
}
