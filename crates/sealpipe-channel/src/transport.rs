//! Transport abstraction for channel events.
//!
//! The transport layer delivers events reliably and in order per channel.
//! Implementations may use WebSockets, HTTP, or any other transport.

use async_trait::async_trait;
use sealpipe_core::UserId;

use crate::error::Result;
use crate::messages::ChannelEvent;

/// Transport trait for sending and receiving channel events.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an event to a specific user.
    async fn send(&self, peer: &UserId, event: ChannelEvent) -> Result<()>;

    /// Receive the next event from any peer.
    async fn recv(&self) -> Result<(UserId, ChannelEvent)>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before an event arrives.
    async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<(UserId, ChannelEvent)>>;

    /// Broadcast an event to all connected peers.
    async fn broadcast(&self, event: ChannelEvent) -> Result<()>;

    /// The local user.
    fn local_user(&self) -> &UserId;
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate event delivery between clients.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::error::ChannelError;

    #[derive(Debug, Clone)]
    struct Envelope {
        from: UserId,
        event: ChannelEvent,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<UserId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, user: UserId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(1000);
            self.senders.write().await.insert(user.clone(), tx);
            MemoryTransport {
                user,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Disconnect a user; later sends to them fail.
        pub async fn disconnect(&self, user: &UserId) {
            self.senders.write().await.remove(user);
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        user: UserId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &UserId, event: ChannelEvent) -> Result<()> {
            event.validate_limits()?;
            let sender = self
                .network
                .senders
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or_else(|| ChannelError::Transport(format!("peer {peer} not connected")))?;
            sender
                .send(Envelope {
                    from: self.user.clone(),
                    event,
                })
                .await
                .map_err(|_| ChannelError::Transport("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<(UserId, ChannelEvent)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Ok((envelope.from, envelope.event)),
                None => Err(ChannelError::Transport("channel closed".into())),
            }
        }

        async fn recv_timeout(
            &self,
            timeout: std::time::Duration,
        ) -> Result<Option<(UserId, ChannelEvent)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Ok(Some((envelope.from, envelope.event))),
                Ok(None) => Err(ChannelError::Transport("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        async fn broadcast(&self, event: ChannelEvent) -> Result<()> {
            event.validate_limits()?;
            let senders: Vec<_> = self
                .network
                .senders
                .read()
                .await
                .iter()
                .filter(|(user, _)| *user != &self.user)
                .map(|(_, tx)| tx.clone())
                .collect();
            for sender in senders {
                // Disconnected peers catch up from the store.
                let _ = sender
                    .send(Envelope {
                        from: self.user.clone(),
                        event: event.clone(),
                    })
                    .await;
            }
            Ok(())
        }

        fn local_user(&self) -> &UserId {
            &self.user
        }
    }
}
