//! Transport traits for the peer control protocol
//!
//! `PeerClient` is the calling side (one implementation over TCP, one
//! in-memory for tests); `PeerHandler` is the receiving side, implemented by
//! the mutex engine.

use async_trait::async_trait;

use crate::error::Result;
use crate::node::messages::{PeerMessage, PeerReply};
use crate::node::PeerId;

/// Trait for invoking control operations on other peers
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Send a request and wait for the reply
    async fn call(&self, target: &PeerId, message: PeerMessage) -> Result<PeerReply>;

    /// Deliver a message without waiting for any reply
    async fn notify(&self, target: &PeerId, message: PeerMessage) -> Result<()>;
}

/// Trait for handling control operations sent to this peer.
///
/// Handlers are synchronous and never block on the network, so the listener
/// always answers within the caller's timeout.
pub trait PeerHandler: Send + Sync {
    /// Returns the reply for request/await-reply operations, `None` otherwise
    fn handle(&self, message: PeerMessage) -> Option<PeerReply>;
}
