//! TCP Transport Implementation
//!
//! One connection per message: connect, write one length-prefixed frame and,
//! for requests, read one reply frame back. Every exchange is bounded by the
//! caller's deadline.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::stats::{FrozenTransportStats, TransportStats};
use crate::error::Result;
use crate::{protocol_error, transport_error};

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Write a 4-byte big-endian length prefix followed by `data`
pub async fn write_frame<W>(stream: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_LEN {
        return Err(protocol_error!("frame too large: {} bytes", data.len()));
    }
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame
pub async fn read_frame<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;

    let frame_len = u32::from_be_bytes(len_bytes) as usize;
    if frame_len > MAX_FRAME_LEN {
        return Err(protocol_error!("frame too large: {} bytes", frame_len));
    }

    let mut buf = vec![0u8; frame_len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

#[derive(Clone, Debug, Default)]
pub struct TcpTransport {
    stats: Arc<TransportStats>,
}

impl TcpTransport {
    pub fn new(stats: Arc<TransportStats>) -> Self {
        Self { stats }
    }

    /// Send `data` to `target` and wait for the reply frame
    pub async fn request(
        &self,
        target: SocketAddr,
        data: &[u8],
        deadline: Duration,
    ) -> Result<Vec<u8>> {
        TransportStats::incr(&self.stats.requests_sent);

        let exchange = async {
            let mut stream = TcpStream::connect(target).await?;
            write_frame(&mut stream, data).await?;
            read_frame(&mut stream).await
        };

        match timeout(deadline, exchange).await {
            Ok(Ok(reply)) => {
                TransportStats::incr(&self.stats.replies_received);
                Ok(reply)
            }
            Ok(Err(e)) => {
                TransportStats::incr(&self.stats.send_errors);
                debug!("request to {} failed: {}", target, e);
                Err(transport_error!("request to {} failed: {}", target, e))
            }
            Err(_) => {
                TransportStats::incr(&self.stats.timeout_errors);
                Err(transport_error!(
                    "request to {} timed out after {}ms",
                    target,
                    deadline.as_millis()
                ))
            }
        }
    }

    /// Send `data` to `target` without waiting for any reply
    pub async fn send(&self, target: SocketAddr, data: &[u8], deadline: Duration) -> Result<()> {
        let delivery = async {
            let mut stream = TcpStream::connect(target).await?;
            write_frame(&mut stream, data).await?;
            stream.shutdown().await?;
            Result::<()>::Ok(())
        };

        match timeout(deadline, delivery).await {
            Ok(Ok(())) => {
                TransportStats::incr(&self.stats.notifications_sent);
                Ok(())
            }
            Ok(Err(e)) => {
                TransportStats::incr(&self.stats.send_errors);
                Err(transport_error!("send to {} failed: {}", target, e))
            }
            Err(_) => {
                TransportStats::incr(&self.stats.timeout_errors);
                Err(transport_error!(
                    "send to {} timed out after {}ms",
                    target,
                    deadline.as_millis()
                ))
            }
        }
    }

    pub fn get_stats(&self) -> FrozenTransportStats {
        self.stats.freeze()
    }
}
