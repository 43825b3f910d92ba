//! Concurrent fan-out of control messages
//!
//! Every target is contacted in its own task with its own deadline, so one
//! slow or dead peer never delays the others.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::clock::Timestamp;
use crate::error::Result;
use crate::node::messages::{PeerMessage, PeerReply};
use crate::node::PeerId;
use crate::transport::PeerClient;

/// Result of one request round
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    pub granted: Vec<PeerId>,
    pub denied: Vec<PeerId>,
    /// failed or timed out
    pub unreachable: Vec<PeerId>,
}

impl RoundOutcome {
    /// Every reachable target granted
    pub fn succeeded(&self) -> bool {
        self.denied.is_empty()
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    peer_id: PeerId,
    client: Arc<dyn PeerClient>,
    rpc_timeout: Duration,
}

impl Broadcaster {
    pub fn new(peer_id: PeerId, client: Arc<dyn PeerClient>, rpc_timeout: Duration) -> Self {
        Self {
            peer_id,
            client,
            rpc_timeout,
        }
    }

    /// Ask every target for permission and collect the replies
    pub async fn request_round(&self, targets: Vec<PeerId>, timestamp: Timestamp) -> RoundOutcome {
        let message = PeerMessage::Request {
            peer: self.peer_id.clone(),
            timestamp,
        };

        let calls: Vec<(PeerId, JoinHandle<Result<PeerReply>>)> = targets
            .into_iter()
            .filter(|target| target != &self.peer_id)
            .map(|target| {
                let client = self.client.clone();
                let message = message.clone();
                let deadline = self.rpc_timeout;
                let peer = target.clone();
                let handle = tokio::spawn(async move {
                    timeout(deadline, client.call(&peer, message)).await?
                });
                (target, handle)
            })
            .collect();

        let mut outcome = RoundOutcome::default();
        for (target, handle) in calls {
            match handle.await {
                Ok(Ok(PeerReply::Granted(true))) => outcome.granted.push(target),
                Ok(Ok(PeerReply::Granted(false))) => outcome.denied.push(target),
                Ok(Err(e)) => {
                    debug!("[{}] request to {} failed: {}", self.peer_id, target, e);
                    outcome.unreachable.push(target);
                }
                Err(e) => {
                    // Without an answer the grant can not be assumed
                    warn!("[{}] request task for {} aborted: {}", self.peer_id, target, e);
                    outcome.denied.push(target);
                }
            }
        }
        outcome
    }

    /// Deliver `message` to every target; returns the ones that could not be reached
    pub async fn notify_all(&self, targets: Vec<PeerId>, message: PeerMessage) -> Vec<PeerId> {
        let sends: Vec<(PeerId, JoinHandle<Result<()>>)> = targets
            .into_iter()
            .filter(|target| target != &self.peer_id)
            .map(|target| {
                let client = self.client.clone();
                let message = message.clone();
                let deadline = self.rpc_timeout;
                let peer = target.clone();
                let handle = tokio::spawn(async move {
                    timeout(deadline, client.notify(&peer, message)).await?
                });
                (target, handle)
            })
            .collect();

        let mut unreachable = Vec::new();
        for (target, handle) in sends {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(
                        "[{}] {} to {} failed: {}",
                        self.peer_id,
                        message.kind(),
                        target,
                        e
                    );
                    unreachable.push(target);
                }
                Err(e) => {
                    warn!("[{}] send task for {} aborted: {}", self.peer_id, target, e);
                    unreachable.push(target);
                }
            }
        }
        unreachable
    }
}
