//! Peer transport
//!
//! Length-prefixed bincode frames over TCP, plus an in-process network for
//! running whole peer groups inside tests.

pub mod client;
pub mod memory;
pub mod stats;
pub mod tcp_connection;
pub mod tcp_receiver;
pub mod traits;

pub use client::NetworkPeerClient;
pub use memory::InMemoryNetwork;
pub use stats::{FrozenTransportStats, TransportStats};
pub use tcp_connection::TcpTransport;
pub use tcp_receiver::{TcpReceiver, TcpRequest};
pub use traits::{PeerClient, PeerHandler};
