//! Background loops: heartbeats out, stale peers out.
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::mutex::MutexEngine;
use crate::registry::Registry;

/// Send a heartbeat to every registered peer each interval.
///
/// Delivery failures are ignored; a silent peer is evicted by age.
pub fn spawn_heartbeat_loop(
    engine: Arc<MutexEngine>,
    registry: Arc<dyn Registry>,
    advertise: SocketAddr,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = engine.timing().heartbeat_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "[{}] heartbeat loop started with {}ms interval",
            engine.peer_id(),
            period.as_millis()
        );

        loop {
            ticker.tick().await;
            let targets: Vec<_> = match registry.list_active_names().await {
                Ok(names) => names
                    .into_iter()
                    .filter(|name| name != engine.peer_id())
                    .collect(),
                Err(e) => {
                    warn!("[{}] registry unavailable: {}", engine.peer_id(), e);
                    continue;
                }
            };
            let message = match engine.heartbeat_message(advertise) {
                Ok(message) => message,
                Err(e) => {
                    warn!("[{}] could not build heartbeat: {}", engine.peer_id(), e);
                    continue;
                }
            };

            let silent = engine.broadcaster().notify_all(targets, message).await;
            if !silent.is_empty() {
                debug!("[{}] heartbeat not delivered to {:?}", engine.peer_id(), silent);
            }
        }
    })
}

/// Evict peers whose heartbeat is too old, each cleanup interval.
///
/// Evicted peers are also dropped from the registry so heartbeats stop going
/// to dead addresses. A peer that comes back re-registers with its next
/// heartbeat.
pub fn spawn_cleanup_loop(
    engine: Arc<MutexEngine>,
    registry: Arc<dyn Registry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = engine.timing().cleanup_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let evicted = match engine.evict_stale(Utc::now()) {
                Ok(evicted) => evicted,
                Err(e) => {
                    warn!("[{}] cleanup failed: {}", engine.peer_id(), e);
                    continue;
                }
            };
            if evicted.is_empty() {
                continue;
            }
            debug!("[{}] cleanup evicted {:?}", engine.peer_id(), evicted);
            for peer in &evicted {
                if let Err(e) = registry.remove(peer).await {
                    warn!("[{}] could not unregister {}: {}", engine.peer_id(), peer, e);
                }
            }
        }
    })
}
