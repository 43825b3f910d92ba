use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::node::messages::{PeerRecord, PeerStatus};
use crate::node::PeerId;

/// Known peers and their last heartbeat, including this peer itself
#[derive(Debug, Default)]
pub struct MembershipTracker {
    records: HashMap<PeerId, PeerRecord>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the record of `peer`; returns true if the peer was new
    pub fn observe_heartbeat(
        &mut self,
        peer: PeerId,
        status: PeerStatus,
        observed_at: DateTime<Utc>,
        reported_at: Option<DateTime<Utc>>,
    ) -> bool {
        match self.records.get_mut(&peer) {
            Some(record) => {
                record.status = status;
                record.last_heartbeat = observed_at;
                record.reported_at = reported_at;
                false
            }
            None => {
                self.records.insert(
                    peer.clone(),
                    PeerRecord {
                        id: peer,
                        status,
                        last_heartbeat: observed_at,
                        reported_at,
                    },
                );
                true
            }
        }
    }

    /// Remove every record whose heartbeat is older than `timeout`.
    ///
    /// `keep` is never evicted (this peer refreshes its own record).
    pub fn evict_stale(
        &mut self,
        now: DateTime<Utc>,
        timeout: Duration,
        keep: &PeerId,
    ) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .records
            .values()
            .filter(|record| &record.id != keep)
            .filter(|record| {
                // Heartbeats from the future are fresh
                now.signed_duration_since(record.last_heartbeat)
                    .to_std()
                    .map(|age| age > timeout)
                    .unwrap_or(false)
            })
            .map(|record| record.id.clone())
            .collect();

        for peer in &stale {
            self.records.remove(peer);
        }
        stale
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<PeerRecord> {
        self.records.remove(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.records.contains_key(peer)
    }

    /// First peer reporting HOLDING, if any
    pub fn current_holder(&self) -> Option<PeerId> {
        self.records
            .values()
            .find(|record| record.status == PeerStatus::Holding)
            .map(|record| record.id.clone())
    }

    /// Snapshot of all records, sorted by id
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<PeerRecord> = self.records.values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Snapshot of the ids of every peer except `exclude`
    pub fn peer_ids_except(&self, exclude: &PeerId) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .records
            .keys()
            .filter(|id| *id != exclude)
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
