//! Peer listener
//!
//! Decodes frames handed over by the TCP receiver and dispatches them to the
//! mutex engine, one at a time.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::messages::{PeerMessage, PeerPacket};
use super::mutex::MutexEngine;
use crate::registry::Registry;
use crate::transport::{PeerHandler, TcpRequest};

pub struct PeerListener {
    engine: Arc<MutexEngine>,
    registry: Arc<dyn Registry>,
}

impl PeerListener {
    pub fn new(engine: Arc<MutexEngine>, registry: Arc<dyn Registry>) -> Self {
        Self { engine, registry }
    }

    /// Serve until the receiver side of the channel is closed
    pub async fn run(self, mut requests: mpsc::Receiver<TcpRequest>) {
        info!("[{}] peer listener started", self.engine.peer_id());
        while let Some(request) = requests.recv().await {
            let reply = self.dispatch(&request.data, request.peer_addr).await;
            if request.response_tx.send(reply).is_err() {
                debug!(
                    "[{}] connection from {} closed before the reply",
                    self.engine.peer_id(),
                    request.peer_addr
                );
            }
        }
        info!("[{}] peer listener channel closed, exiting", self.engine.peer_id());
    }

    /// Handle one frame; returns the encoded reply, if the operation has one
    pub async fn dispatch(&self, data: &[u8], from: SocketAddr) -> Option<Vec<u8>> {
        let packet = match PeerPacket::deserialize(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(
                    "[{}] dropping frame from {}: {}",
                    self.engine.peer_id(),
                    from,
                    e
                );
                return None;
            }
        };
        debug!(
            "[{}] {} from {} (packet {})",
            self.engine.peer_id(),
            packet.message.kind(),
            packet.message.sender(),
            packet.packet_id
        );

        match &packet.message {
            PeerMessage::Heartbeat { peer, address, .. } => {
                if let Err(e) = self.registry.register(peer.clone(), *address).await {
                    warn!("[{}] could not register {}: {}", self.engine.peer_id(), peer, e);
                }
            }
            PeerMessage::Leave { peer } => {
                if let Err(e) = self.registry.remove(peer).await {
                    warn!("[{}] could not unregister {}: {}", self.engine.peer_id(), peer, e);
                }
            }
            PeerMessage::Request { .. } | PeerMessage::Release { .. } => {}
        }

        let expects_reply = packet.message.expects_reply();
        let reply = self.engine.handle(packet.message)?;
        if !expects_reply {
            return None;
        }
        match reply.serialize() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("[{}] could not encode reply: {}", self.engine.peer_id(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::clock::{now_millis, Timestamp};
    use crate::node::messages::{PeerReply, PeerStatus};
    use crate::node::PeerId;
    use crate::registry::StaticRegistry;
    use crate::settings::TimingSettings;
    use crate::transport::InMemoryNetwork;

    fn listener() -> (PeerListener, Arc<MutexEngine>, Arc<StaticRegistry>) {
        let engine = Arc::new(MutexEngine::new(
            PeerId::from("me"),
            TimingSettings::default(),
            Arc::new(InMemoryNetwork::new()),
        ));
        let registry = Arc::new(StaticRegistry::new(HashMap::new()));
        (
            PeerListener::new(engine.clone(), registry.clone()),
            engine,
            registry,
        )
    }

    fn from() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_request_is_answered() {
        let (listener, _engine, _registry) = listener();
        let frame = PeerPacket::new(PeerMessage::Request {
            peer: PeerId::from("other"),
            timestamp: Timestamp::new(4),
        })
        .serialize()
        .unwrap();

        let reply = listener.dispatch(&frame, from()).await.unwrap();
        assert_eq!(
            PeerReply::deserialize(&reply).unwrap(),
            PeerReply::Granted(true)
        );
    }

    #[tokio::test]
    async fn test_heartbeat_registers_unknown_sender() {
        let (listener, engine, registry) = listener();
        let address: SocketAddr = "127.0.0.1:9321".parse().unwrap();
        let frame = PeerPacket::new(PeerMessage::Heartbeat {
            peer: PeerId::from("newcomer"),
            status: PeerStatus::Free,
            timestamp: now_millis(),
            address,
        })
        .serialize()
        .unwrap();

        assert!(listener.dispatch(&frame, from()).await.is_none());
        assert_eq!(
            registry.resolve(&PeerId::from("newcomer")).await.unwrap(),
            address
        );
        assert_eq!(engine.peer_ids().unwrap(), vec![PeerId::from("newcomer")]);
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let (listener, engine, _registry) = listener();
        assert!(listener.dispatch(&[0xde, 0xad], from()).await.is_none());
        assert_eq!(engine.membership_size().unwrap(), 1);
    }
}
