//! TCP Receiver
//!
//! Accepts peer connections, reads one frame from each and hands it to the
//! listener over a channel. A reply frame is written back only when the
//! listener answers with one.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::stats::{FrozenTransportStats, TransportStats};
use super::tcp_connection::{read_frame, write_frame};
use crate::error::Result;
use crate::transport_error;

/// A request with a channel to send the optional reply back
pub struct TcpRequest {
    pub data: bytes::Bytes,
    pub peer_addr: SocketAddr,
    pub response_tx: oneshot::Sender<Option<Vec<u8>>>,
}

/// TCP message receiver
pub struct TcpReceiver {
    pub local_addr: SocketAddr,
    socket: Arc<TcpListener>,
    stats: Arc<TransportStats>,
    message_tx: mpsc::Sender<TcpRequest>,
    read_timeout: Duration,
}

impl TcpReceiver {
    pub async fn new(
        bind_addr: SocketAddr,
        message_tx: mpsc::Sender<TcpRequest>,
        stats: Arc<TransportStats>,
        read_timeout: Duration,
    ) -> Result<Self> {
        let socket = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| transport_error!("Socket creation failed on {}: {}", bind_addr, e))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| transport_error!("Socket creation failed: {}", e))?;

        Ok(Self {
            local_addr,
            socket: Arc::new(socket),
            stats,
            message_tx,
            read_timeout,
        })
    }

    /// Start the accept loop
    pub fn start(&self) -> JoinHandle<()> {
        let socket = self.socket.clone();
        let stats = self.stats.clone();
        let tx = self.message_tx.clone();
        let read_timeout = self.read_timeout;

        tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match socket.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("TCP accept failed: {}", e);
                        continue;
                    }
                };

                let tx = tx.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, tx, stats, read_timeout).await;
                });
            }
        })
    }

    pub fn get_stats(&self) -> FrozenTransportStats {
        self.stats.freeze()
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    tx: mpsc::Sender<TcpRequest>,
    stats: Arc<TransportStats>,
    read_timeout: Duration,
) {
    let data = match timeout(read_timeout, read_frame(&mut stream)).await {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => {
            TransportStats::incr(&stats.receive_errors);
            warn!("Failed to read frame from {}: {}", peer_addr, e);
            return;
        }
        Err(_) => {
            TransportStats::incr(&stats.receive_errors);
            warn!("Timed out reading frame from {}", peer_addr);
            return;
        }
    };
    TransportStats::incr(&stats.messages_received);

    let (response_tx, response_rx) = oneshot::channel();
    let request = TcpRequest {
        data: bytes::Bytes::from(data),
        peer_addr,
        response_tx,
    };

    if tx.send(request).await.is_err() {
        error!("Peer listener is gone, dropping frame from {}", peer_addr);
        return;
    }

    match response_rx.await {
        Ok(Some(reply)) => {
            if let Err(e) = write_frame(&mut stream, &reply).await {
                debug!("Failed to write reply to {}: {}", peer_addr, e);
            }
        }
        Ok(None) => {}
        Err(_) => debug!("Listener dropped reply channel for {}", peer_addr),
    }
}
