//! Peer client over the TCP transport
//!
//! Resolves peer names through the registry and speaks `PeerPacket`s.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::tcp_connection::TcpTransport;
use super::traits::PeerClient;
use crate::error::Result;
use crate::node::messages::{PeerMessage, PeerPacket, PeerReply};
use crate::node::PeerId;
use crate::registry::Registry;

#[derive(Clone)]
pub struct NetworkPeerClient {
    registry: Arc<dyn Registry>,
    transport: TcpTransport,
    rpc_timeout: Duration,
}

impl NetworkPeerClient {
    pub fn new(registry: Arc<dyn Registry>, transport: TcpTransport, rpc_timeout: Duration) -> Self {
        Self {
            registry,
            transport,
            rpc_timeout,
        }
    }
}

#[async_trait]
impl PeerClient for NetworkPeerClient {
    async fn call(&self, target: &PeerId, message: PeerMessage) -> Result<PeerReply> {
        let address = self.registry.resolve(target).await?;
        let packet = PeerPacket::new(message);
        debug!(
            "calling {} at {}: {} (packet {})",
            target,
            address,
            packet.message.kind(),
            packet.packet_id
        );

        let reply = self
            .transport
            .request(address, &packet.serialize()?, self.rpc_timeout)
            .await?;
        PeerReply::deserialize(&reply)
    }

    async fn notify(&self, target: &PeerId, message: PeerMessage) -> Result<()> {
        let address = self.registry.resolve(target).await?;
        let packet = PeerPacket::new(message);
        self.transport
            .send(address, &packet.serialize()?, self.rpc_timeout)
            .await
    }
}
