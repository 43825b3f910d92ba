//! Peer directory
//!
//! Maps peer names to the address of their peer listener. The mutex engine
//! only talks to peers by name; the registry is the one place that knows how
//! to reach them.
use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::node::PeerId;
use crate::registry_error;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Every name currently registered, sorted
    async fn list_active_names(&self) -> Result<Vec<PeerId>>;

    /// Address of the peer listener behind `peer`
    async fn resolve(&self, peer: &PeerId) -> Result<SocketAddr>;

    /// Register or re-register `peer`'s address
    async fn register(&self, peer: PeerId, address: SocketAddr) -> Result<()>;

    async fn remove(&self, peer: &PeerId) -> Result<()>;
}

/// In-process registry seeded from the static topology
#[derive(Debug, Default)]
pub struct StaticRegistry {
    entries: RwLock<HashMap<PeerId, SocketAddr>>,
}

impl StaticRegistry {
    pub fn new(topology: HashMap<PeerId, SocketAddr>) -> Self {
        Self {
            entries: RwLock::new(topology),
        }
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn list_active_names(&self) -> Result<Vec<PeerId>> {
        let mut names: Vec<PeerId> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn resolve(&self, peer: &PeerId) -> Result<SocketAddr> {
        self.entries
            .read()
            .await
            .get(peer)
            .copied()
            .ok_or_else(|| registry_error!("unknown peer {}", peer))
    }

    async fn register(&self, peer: PeerId, address: SocketAddr) -> Result<()> {
        let previous = self.entries.write().await.insert(peer.clone(), address);
        if previous != Some(address) {
            debug!("registered {} at {}", peer, address);
        }
        Ok(())
    }

    async fn remove(&self, peer: &PeerId) -> Result<()> {
        self.entries.write().await.remove(peer);
        Ok(())
    }
}
