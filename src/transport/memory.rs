//! In-process transport
//!
//! Routes calls straight into registered handlers. Used to run whole peer
//! groups inside one process, with fault injection for crashed peers.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::messages::{PeerMessage, PeerReply};
use crate::node::PeerId;
use crate::transport::traits::{PeerClient, PeerHandler};
use crate::{concurrency_error, protocol_error, transport_error};

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<PeerId, Weak<dyn PeerHandler>>,
    crashed: HashSet<PeerId>,
}

/// A network of in-process peers
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<RwLock<NetworkState>>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for InMemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peers = self
            .state
            .read()
            .map(|state| state.handlers.len())
            .unwrap_or_default();
        f.debug_struct("InMemoryNetwork")
            .field("peers", &peers)
            .field("latency", &self.latency)
            .finish()
    }
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every delivery by `latency` to widen interleavings
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Attach a handler; the network only keeps a weak reference
    pub fn register(&self, peer: PeerId, handler: Arc<dyn PeerHandler>) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| concurrency_error!("network lock poisoned: {}", e))?;
        state.crashed.remove(&peer);
        state.handlers.insert(peer, Arc::downgrade(&handler));
        Ok(())
    }

    /// Make every call to `peer` fail as if its process died
    pub fn crash(&self, peer: &PeerId) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| concurrency_error!("network lock poisoned: {}", e))?;
        state.crashed.insert(peer.clone());
        Ok(())
    }

    pub fn is_crashed(&self, peer: &PeerId) -> bool {
        self.state
            .read()
            .map(|state| state.crashed.contains(peer))
            .unwrap_or(false)
    }

    fn handler_for(&self, target: &PeerId) -> Result<Arc<dyn PeerHandler>> {
        let state = self
            .state
            .read()
            .map_err(|e| concurrency_error!("network lock poisoned: {}", e))?;
        if state.crashed.contains(target) {
            return Err(transport_error!("peer {} is unreachable", target));
        }
        state
            .handlers
            .get(target)
            .and_then(Weak::upgrade)
            .ok_or_else(|| transport_error!("peer {} is not registered", target))
    }

    async fn deliver(&self, target: &PeerId, message: PeerMessage) -> Result<Option<PeerReply>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let handler = self.handler_for(target)?;
        Ok(handler.handle(message))
    }
}

#[async_trait]
impl PeerClient for InMemoryNetwork {
    async fn call(&self, target: &PeerId, message: PeerMessage) -> Result<PeerReply> {
        let kind = message.kind();
        self.deliver(target, message)
            .await?
            .ok_or_else(|| protocol_error!("peer {} sent no reply to {}", target, kind))
    }

    async fn notify(&self, target: &PeerId, message: PeerMessage) -> Result<()> {
        self.deliver(target, message).await.map(|_| ())
    }
}
