//! A peer taking part in the mutual-exclusion group.
//!
//! `PeerNode` wires the mutex engine to the outside world: the TCP peer
//! listener, the background heartbeat and cleanup loops, and the control
//! operations the HTTP API exposes.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod broadcast;
pub mod listener;
mod membership;
pub mod messages;
pub mod mutex;
pub mod node_id;
pub mod queue;
pub mod scheduler;
pub mod session;

use crate::concurrency_error;
use crate::error::{Result, StateError};
use crate::registry::Registry;
use crate::settings::Settings;
use crate::transport::{NetworkPeerClient, PeerClient, TcpReceiver, TcpTransport, TransportStats};
pub use listener::PeerListener;
pub use messages::{
    PeerMessage, PeerRecord, PeerReply, PeerStatus, PeersResponse, ResourceResponse,
    StatusResponse,
};
pub use mutex::{MutexEngine, SelfState};
pub use node_id::PeerId;
pub use session::SessionEnd;

pub struct PeerNode {
    settings: Settings,
    engine: Arc<MutexEngine>,
    registry: Arc<dyn Registry>,
    stats: Option<Arc<TransportStats>>,
    started_at: Instant,
    departed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PeerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerNode")
            .field("peer_id", &self.settings.peer_id)
            .field("advertise_address", &self.settings.advertise_address)
            .field("engine", &self.engine)
            .finish()
    }
}

impl PeerNode {
    /// Build a node on top of any peer client, without binding anything
    pub fn new(
        settings: Settings,
        registry: Arc<dyn Registry>,
        client: Arc<dyn PeerClient>,
        stats: Option<Arc<TransportStats>>,
    ) -> Self {
        let engine = Arc::new(MutexEngine::new(
            settings.peer_id.clone(),
            settings.timing.clone(),
            client,
        ));
        Self {
            settings,
            engine,
            registry,
            stats,
            started_at: Instant::now(),
            departed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start a node speaking TCP: bind the peer listener, register ourselves
    /// and launch the background loops.
    pub async fn start(settings: Settings, registry: Arc<dyn Registry>) -> Result<Arc<Self>> {
        settings.validate()?;
        let stats = Arc::new(TransportStats::default());
        let client = NetworkPeerClient::new(
            registry.clone(),
            TcpTransport::new(stats.clone()),
            settings.timing.rpc_timeout,
        );
        let node = Arc::new(Self::new(
            settings,
            registry,
            Arc::new(client),
            Some(stats.clone()),
        ));

        let (request_tx, request_rx) = mpsc::channel(1024);
        let receiver = TcpReceiver::new(
            node.settings.peer_listen_addr()?,
            request_tx,
            stats,
            node.settings.timing.rpc_timeout,
        )
        .await?;
        info!(
            "[{}] peer listener bound to {} (advertising {})",
            node.peer_id(),
            receiver.local_addr,
            node.settings.advertise_address
        );

        let listener = PeerListener::new(node.engine.clone(), node.registry.clone());
        let accept_task = receiver.start();
        let listen_task = tokio::spawn(listener.run(request_rx));
        node.track(accept_task)?;
        node.track(listen_task)?;

        node.spawn_background().await?;
        Ok(node)
    }

    /// Register ourselves and start the heartbeat and cleanup loops
    pub async fn spawn_background(&self) -> Result<()> {
        self.registry
            .register(self.peer_id().clone(), self.settings.advertise_address)
            .await?;
        self.track(scheduler::spawn_heartbeat_loop(
            self.engine.clone(),
            self.registry.clone(),
            self.settings.advertise_address,
        ))?;
        self.track(scheduler::spawn_cleanup_loop(
            self.engine.clone(),
            self.registry.clone(),
        ))?;
        Ok(())
    }

    // Finished sessions are dropped so the list only holds live tasks
    fn track(&self, task: JoinHandle<()>) -> Result<()> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|e| concurrency_error!("task list lock poisoned: {}", e))?;
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        Ok(())
    }

    pub fn peer_id(&self) -> &PeerId {
        self.engine.peer_id()
    }

    pub fn engine(&self) -> &Arc<MutexEngine> {
        &self.engine
    }

    pub fn advertise_address(&self) -> SocketAddr {
        self.settings.advertise_address
    }

    fn response(&self, message: impl Into<String>) -> ResourceResponse {
        ResourceResponse {
            peer_id: self.peer_id().clone(),
            status: self.engine.status(),
            message: message.into(),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.departed.load(Ordering::SeqCst) {
            return Err(StateError::Departed.into());
        }
        Ok(())
    }

    /// Kick off a request; the session runs in the background.
    ///
    /// Refused until the node has been up for two heartbeat intervals, so
    /// that it knows the group before asking it.
    pub fn acquire(&self) -> Result<ResourceResponse> {
        self.ensure_active()?;
        if self.started_at.elapsed() < self.settings.timing.heartbeat_interval * 2 {
            return Err(StateError::NotReady.into());
        }

        // Flip to WANTING here so a second call is refused right away
        let timestamp = self.engine.begin_request()?;
        info!(
            "[{}] requesting the resource with timestamp {}",
            self.peer_id(),
            timestamp
        );
        let engine = self.engine.clone();
        let task = tokio::spawn(async move {
            let outcome = async {
                let session = engine.wait_for_grant().await?;
                engine.hold(session).await
            }
            .await;
            if let Err(e) = outcome {
                error!("[{}] resource session failed: {}", engine.peer_id(), e);
            }
        });
        self.track(task)?;

        Ok(self.response(format!("request {} submitted", timestamp)))
    }

    pub async fn release(&self) -> Result<ResourceResponse> {
        self.engine.release().await?;
        Ok(self.response("resource released"))
    }

    /// Leave the group for good
    pub async fn leave(&self) -> Result<ResourceResponse> {
        if self.departed.swap(true, Ordering::SeqCst) {
            return Err(StateError::Departed.into());
        }
        self.engine.leave().await?;
        if let Err(e) = self.registry.remove(self.peer_id()).await {
            error!("[{}] could not unregister: {}", self.peer_id(), e);
        }
        self.shutdown_background()?;
        Ok(self.response("left the group"))
    }

    /// Stop every background task without telling the group
    pub fn shutdown_background(&self) -> Result<()> {
        let tasks = self
            .tasks
            .lock()
            .map_err(|e| concurrency_error!("task list lock poisoned: {}", e))?;
        for task in tasks.iter() {
            task.abort();
        }
        Ok(())
    }

    pub fn status(&self) -> Result<StatusResponse> {
        let state = self.engine.self_state();
        Ok(StatusResponse {
            peer_id: self.peer_id().clone(),
            status: state.status,
            current_timestamp: state.current_timestamp,
            held_since: state.held_since,
            queue: self.engine.queue_snapshot()?,
            awaiting: self.engine.awaiting_snapshot()?,
            membership_size: self.engine.membership_size()?,
            transport: self.stats.as_ref().map(|stats| stats.freeze()),
        })
    }

    pub fn peers(&self) -> Result<PeersResponse> {
        Ok(PeersResponse {
            peer_id: self.peer_id().clone(),
            holder: self.engine.current_holder()?,
            peers: self.engine.peers()?,
        })
    }
}

impl Drop for PeerNode {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
