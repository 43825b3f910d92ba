//! Peer Message Protocol
//!
//! Defines the closed set of control operations peers exchange. All of them
//! go over the peer transport as bincode; the status types also derive serde
//! for the HTTP control API.
//!
use std::net::SocketAddr;

use bincode::{Decode, Encode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::Result;
use crate::node::PeerId;
use crate::protocol_error;

/// Mutex status of a peer, as seen locally or reported in heartbeats
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeerStatus {
    #[default]
    Free,
    Wanting,
    Holding,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerStatus::Free => write!(f, "FREE"),
            PeerStatus::Wanting => write!(f, "WANTING"),
            PeerStatus::Holding => write!(f, "HOLDING"),
        }
    }
}

/// Control operations one peer invokes on another
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum PeerMessage {
    /// Ask for permission to enter; answered with `PeerReply::Granted`
    Request { peer: PeerId, timestamp: Timestamp },

    /// The sender left the resource; fire-and-forget
    Release { peer: PeerId },

    /// The sender is leaving the group for good; fire-and-forget
    Leave { peer: PeerId },

    /// Liveness beacon; fire-and-forget
    Heartbeat {
        peer: PeerId,
        status: PeerStatus,
        /// sender wall clock, milliseconds since epoch
        timestamp: i64,
        /// where the sender's peer listener can be reached
        address: SocketAddr,
    },
}

impl PeerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Request { .. } => "request",
            PeerMessage::Release { .. } => "release",
            PeerMessage::Leave { .. } => "leave",
            PeerMessage::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn sender(&self) -> &PeerId {
        match self {
            PeerMessage::Request { peer, .. }
            | PeerMessage::Release { peer }
            | PeerMessage::Leave { peer }
            | PeerMessage::Heartbeat { peer, .. } => peer,
        }
    }

    /// Whether the caller waits for a reply frame
    pub fn expects_reply(&self) -> bool {
        matches!(self, PeerMessage::Request { .. })
    }
}

/// Reply to a request/await-reply operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum PeerReply {
    Granted(bool),
}

/// PeerPacket wraps messages for network transmission
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PeerPacket {
    pub message: PeerMessage,
    pub packet_id: u64, // For log correlation
}

fn wire_config() -> impl bincode::config::Config {
    bincode::config::standard().with_big_endian()
}

impl PeerPacket {
    pub fn new(message: PeerMessage) -> Self {
        Self {
            message,
            packet_id: rand::random(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, wire_config())?)
    }

    /// Decode a packet, rejecting trailing garbage as a protocol violation
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let (packet, read) = bincode::decode_from_slice::<Self, _>(data, wire_config())?;
        if read != data.len() {
            return Err(protocol_error!(
                "{} trailing bytes after packet",
                data.len() - read
            ));
        }
        Ok(packet)
    }
}

impl PeerReply {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, wire_config())?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let (reply, _) = bincode::decode_from_slice::<Self, _>(data, wire_config())?;
        Ok(reply)
    }
}

/// One entry of the membership listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    pub status: PeerStatus,
    /// local receipt time of the latest heartbeat
    pub last_heartbeat: DateTime<Utc>,
    /// wall clock the peer itself reported, if it did
    pub reported_at: Option<DateTime<Utc>>,
}

/// Pending request as shown in the status API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequestView {
    pub requester: PeerId,
    pub timestamp: Timestamp,
}

/// Response for `GET /peers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peer_id: PeerId,
    pub holder: Option<PeerId>,
    pub peers: Vec<PeerRecord>,
}

/// Response for `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub peer_id: PeerId,
    pub status: PeerStatus,
    pub current_timestamp: Option<Timestamp>,
    pub held_since: Option<DateTime<Utc>>,
    pub queue: Vec<PendingRequestView>,
    pub awaiting: Vec<PeerId>,
    pub membership_size: usize,
    pub transport: Option<crate::transport::FrozenTransportStats>,
}

/// Response for resource control endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub peer_id: PeerId,
    pub status: PeerStatus,
    pub message: String,
}
