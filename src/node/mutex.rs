//! Mutual-exclusion engine
//!
//! Owns this peer's view of the group: membership, the deferred request
//! queue, the set of peers we are still waiting on, and our own
//! FREE/WANTING/HOLDING state.
//!
//! Lock order is always state, then queue, then awaiting, then membership.
//! A request is decided, stamped into the clock and (when denied) queued
//! while the state read guard is held, so it can never interleave with our
//! own transition to WANTING.
use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::broadcast::Broadcaster;
use super::membership::MembershipTracker;
use super::messages::{PeerMessage, PeerRecord, PeerReply, PeerStatus, PendingRequestView};
use super::queue::{PendingRequest, RequestQueue};
use super::session::{ResourceSession, SessionEnd};
use super::PeerId;
use crate::clock::{from_millis, now_millis, LamportClock, Timestamp};
use crate::concurrency_error;
use crate::error::{Result, StateError};
use crate::settings::TimingSettings;
use crate::transport::{PeerClient, PeerHandler};

/// This peer's own mutex state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelfState {
    pub status: PeerStatus,
    /// stamp of the outstanding request, only while WANTING
    pub current_timestamp: Option<Timestamp>,
    pub held_since: Option<DateTime<Utc>>,
    /// id of the current or most recent holding session
    pub session: u64,
}

fn locked<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|e| concurrency_error!("{} lock poisoned: {}", what, e))
}

pub struct MutexEngine {
    peer_id: PeerId,
    timing: TimingSettings,
    clock: LamportClock,
    membership: Mutex<MembershipTracker>,
    queue: Mutex<RequestQueue>,
    awaiting: Mutex<HashSet<PeerId>>,
    state: watch::Sender<SelfState>,
    // Woken when nothing is left to wait for
    proceed: Notify,
    // Session id an early release was asked for
    release: watch::Sender<u64>,
    broadcaster: Broadcaster,
}

impl std::fmt::Debug for MutexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexEngine")
            .field("peer_id", &self.peer_id)
            .field("state", &*self.state.borrow())
            .field("clock", &self.clock.current())
            .finish()
    }
}

impl MutexEngine {
    pub fn new(peer_id: PeerId, timing: TimingSettings, client: Arc<dyn PeerClient>) -> Self {
        let broadcaster = Broadcaster::new(peer_id.clone(), client, timing.rpc_timeout);

        let mut membership = MembershipTracker::new();
        let now = Utc::now();
        membership.observe_heartbeat(peer_id.clone(), PeerStatus::Free, now, Some(now));

        let (state, _) = watch::channel(SelfState::default());
        let (release, _) = watch::channel(0);

        Self {
            peer_id,
            timing,
            clock: LamportClock::new(),
            membership: Mutex::new(membership),
            queue: Mutex::new(RequestQueue::new()),
            awaiting: Mutex::new(HashSet::new()),
            state,
            proceed: Notify::new(),
            release,
            broadcaster,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn timing(&self) -> &TimingSettings {
        &self.timing
    }

    pub fn status(&self) -> PeerStatus {
        self.state.borrow().status
    }

    pub fn self_state(&self) -> SelfState {
        self.state.borrow().clone()
    }

    /// Watch every transition of our own state
    pub fn subscribe(&self) -> watch::Receiver<SelfState> {
        self.state.subscribe()
    }

    pub fn clock(&self) -> Timestamp {
        self.clock.current()
    }

    // ---- own request lifecycle ----

    /// FREE -> WANTING with a fresh stamp
    pub fn begin_request(&self) -> Result<Timestamp> {
        let mut stamp = None;
        let mut refused = PeerStatus::Free;
        self.state.send_if_modified(|state| {
            if state.status != PeerStatus::Free {
                refused = state.status;
                return false;
            }
            let timestamp = self.clock.tick();
            state.status = PeerStatus::Wanting;
            state.current_timestamp = Some(timestamp);
            state.held_since = None;
            stamp = Some(timestamp);
            true
        });

        let Some(timestamp) = stamp else {
            return Err(StateError::AlreadyActive(refused.to_string()).into());
        };

        locked(&self.queue, "queue")?.enqueue(self.peer_id.clone(), timestamp);
        locked(&self.awaiting, "awaiting")?.clear();
        self.refresh_self()?;
        Ok(timestamp)
    }

    /// Ask every known peer once.
    ///
    /// Returns the session id when all reachable peers granted, `None` when
    /// someone denied (those peers are now awaited).
    pub async fn request_round(&self) -> Result<Option<u64>> {
        let timestamp = {
            let state = self.state.borrow();
            match (state.status, state.current_timestamp) {
                (PeerStatus::Wanting, Some(timestamp)) => timestamp,
                _ => return Err(StateError::NotWanting.into()),
            }
        };

        locked(&self.awaiting, "awaiting")?.clear();
        let targets = locked(&self.membership, "membership")?.peer_ids_except(&self.peer_id);
        let outcome = self.broadcaster.request_round(targets, timestamp).await;

        for peer in &outcome.unreachable {
            self.evict(peer, "unreachable during request")?;
        }

        if outcome.succeeded() {
            return self.enter_holding();
        }

        // A denier evicted while the round was in flight was purged before it
        // could be awaited; waiting on it would only end at the retry timeout.
        let blocked = {
            let mut awaiting = locked(&self.awaiting, "awaiting")?;
            let membership = locked(&self.membership, "membership")?;
            awaiting.extend(
                outcome
                    .denied
                    .iter()
                    .filter(|peer| membership.contains(peer))
                    .cloned(),
            );
            !awaiting.is_empty()
        };
        debug!(
            "[{}] request {} granted by {:?}, denied by {:?}",
            self.peer_id, timestamp, outcome.granted, outcome.denied
        );
        if !blocked {
            debug!("[{}] every denier is gone, asking again", self.peer_id);
            self.proceed.notify_one();
        }
        Ok(None)
    }

    /// Request the resource and keep asking until every peer agrees.
    ///
    /// Returns the id of the holding session.
    pub async fn acquire(&self) -> Result<u64> {
        let timestamp = self.begin_request()?;
        info!(
            "[{}] requesting the resource with timestamp {}",
            self.peer_id, timestamp
        );
        self.wait_for_grant().await
    }

    /// Run request rounds for the outstanding request until it is granted
    pub async fn wait_for_grant(&self) -> Result<u64> {
        let mut round = 0u32;
        loop {
            round += 1;
            if let Some(session) = self.request_round().await? {
                return Ok(session);
            }

            info!(
                "[{}] still trying (round {}), waiting on {:?}",
                self.peer_id,
                round,
                self.awaiting_snapshot()?
            );
            if timeout(self.timing.retry_timeout, self.proceed.notified())
                .await
                .is_err()
            {
                debug!(
                    "[{}] no wakeup after {}ms, asking again",
                    self.peer_id,
                    self.timing.retry_timeout.as_millis()
                );
            }
        }
    }

    fn enter_holding(&self) -> Result<Option<u64>> {
        let mut session = None;
        self.state.send_if_modified(|state| {
            if state.status != PeerStatus::Wanting {
                return false;
            }
            state.status = PeerStatus::Holding;
            state.current_timestamp = None;
            state.held_since = Some(Utc::now());
            state.session += 1;
            session = Some(state.session);
            true
        });
        let Some(session) = session else {
            return Err(StateError::NotWanting.into());
        };

        {
            let mut queue = locked(&self.queue, "queue")?;
            if !queue.dequeue_if_head(&self.peer_id) {
                warn!("[{}] own request was not at the head of the queue", self.peer_id);
                queue.remove(&self.peer_id);
            }
        }
        locked(&self.awaiting, "awaiting")?.clear();
        self.refresh_self()?;
        info!("[{}] entered the resource (session {})", self.peer_id, session);
        Ok(Some(session))
    }

    /// Use the resource until the budget runs out or an early release arrives
    pub async fn hold(&self, session: u64) -> Result<SessionEnd> {
        let runner = ResourceSession::new(session, self.timing.tick, self.timing.max_hold_ticks);
        let end = runner.run(self.release.subscribe()).await;
        match end {
            SessionEnd::Expired { ticks } => {
                info!("[{}] session {} expired after {} ticks", self.peer_id, session, ticks)
            }
            SessionEnd::Released { ticks } => {
                info!("[{}] session {} released after {} ticks", self.peer_id, session, ticks)
            }
        }
        self.finish_hold().await?;
        Ok(end)
    }

    pub async fn acquire_and_hold(&self) -> Result<SessionEnd> {
        let session = self.acquire().await?;
        self.hold(session).await
    }

    /// HOLDING -> FREE and tell everyone. Only the first caller does anything.
    pub async fn finish_hold(&self) -> Result<bool> {
        let left = self.state.send_if_modified(|state| {
            if state.status != PeerStatus::Holding {
                return false;
            }
            state.status = PeerStatus::Free;
            state.held_since = None;
            true
        });
        if !left {
            debug!("[{}] resource already released", self.peer_id);
            return Ok(false);
        }
        self.refresh_self()?;

        let deferred = locked(&self.queue, "queue")?.drain_except(&self.peer_id);
        let mut targets: BTreeSet<PeerId> = locked(&self.membership, "membership")?
            .peer_ids_except(&self.peer_id)
            .into_iter()
            .collect();
        targets.extend(deferred.into_iter().map(|entry| entry.requester));

        info!(
            "[{}] released the resource, notifying {} peers",
            self.peer_id,
            targets.len()
        );
        let unreachable = self
            .broadcaster
            .notify_all(
                targets.into_iter().collect(),
                PeerMessage::Release {
                    peer: self.peer_id.clone(),
                },
            )
            .await;
        for peer in unreachable {
            self.evict(&peer, "unreachable during release")?;
        }
        Ok(true)
    }

    /// Ask the running session to end now and wait until we are FREE again
    pub async fn release(&self) -> Result<()> {
        let session = {
            let state = self.state.borrow();
            if state.status != PeerStatus::Holding {
                return Err(StateError::NotHolding.into());
            }
            state.session
        };
        self.release.send_replace(session);

        let mut changes = self.state.subscribe();
        let confirmed = timeout(self.timing.rpc_timeout, async move {
            changes
                .wait_for(|state| state.status != PeerStatus::Holding || state.session != session)
                .await
                .map(|_| ())
        })
        .await;

        match confirmed {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(concurrency_error!("state channel closed")),
            Err(_) => Err(concurrency_error!(
                "session {} did not end within {}ms",
                session,
                self.timing.rpc_timeout.as_millis()
            )),
        }
    }

    /// Give up an outstanding request; returns true if there was one
    pub fn cancel_request(&self) -> Result<bool> {
        let cancelled = self.state.send_if_modified(|state| {
            if state.status != PeerStatus::Wanting {
                return false;
            }
            state.status = PeerStatus::Free;
            state.current_timestamp = None;
            true
        });
        if cancelled {
            locked(&self.queue, "queue")?.remove(&self.peer_id);
            locked(&self.awaiting, "awaiting")?.clear();
            self.refresh_self()?;
            self.proceed.notify_one();
            info!("[{}] request cancelled", self.peer_id);
        }
        Ok(cancelled)
    }

    /// Leave the group: give the resource back, drop any request, announce it
    pub async fn leave(&self) -> Result<()> {
        let state = self.self_state();
        match state.status {
            PeerStatus::Holding => {
                self.release.send_replace(state.session);
                self.finish_hold().await?;
            }
            PeerStatus::Wanting => {
                self.cancel_request()?;
            }
            PeerStatus::Free => {}
        }

        // Deferred requesters learn about it too, whether or not we know them
        let deferred = locked(&self.queue, "queue")?.drain_except(&self.peer_id);
        let mut targets: BTreeSet<PeerId> = locked(&self.membership, "membership")?
            .peer_ids_except(&self.peer_id)
            .into_iter()
            .collect();
        targets.extend(deferred.into_iter().map(|entry| entry.requester));

        let unreachable = self
            .broadcaster
            .notify_all(
                targets.into_iter().collect(),
                PeerMessage::Leave {
                    peer: self.peer_id.clone(),
                },
            )
            .await;
        if !unreachable.is_empty() {
            debug!("[{}] could not say goodbye to {:?}", self.peer_id, unreachable);
        }
        info!("[{}] left the group", self.peer_id);
        Ok(())
    }

    // ---- inbound operations ----

    /// Decide a request from `from`; returns true for a grant
    pub fn on_request(&self, from: &PeerId, timestamp: Timestamp) -> Result<bool> {
        if from == &self.peer_id {
            warn!("[{}] ignoring request addressed to ourselves", self.peer_id);
            return Ok(true);
        }

        let granted = {
            let state = self.state.borrow();
            self.clock.observe(timestamp);
            let deny = match state.status {
                PeerStatus::Holding => true,
                PeerStatus::Wanting => state
                    .current_timestamp
                    .map(|mine| {
                        PendingRequest::new(self.peer_id.clone(), mine).precedes(timestamp, from)
                    })
                    .unwrap_or(false),
                PeerStatus::Free => false,
            };
            if deny {
                locked(&self.queue, "queue")?.enqueue(from.clone(), timestamp);
            }
            !deny
        };

        debug!(
            "[{}] {} request {} from {}",
            self.peer_id,
            if granted { "granted" } else { "deferred" },
            timestamp,
            from
        );
        Ok(granted)
    }

    pub fn on_release(&self, from: &PeerId) -> Result<()> {
        let status = self.state.borrow().status;
        let head_is_self = {
            let mut queue = locked(&self.queue, "queue")?;
            queue.remove(from);
            queue.peek_head() == Some(&self.peer_id)
        };
        let nothing_awaited = {
            let mut awaiting = locked(&self.awaiting, "awaiting")?;
            awaiting.remove(from);
            awaiting.is_empty()
        };

        debug!("[{}] {} released the resource", self.peer_id, from);
        if status == PeerStatus::Wanting && nothing_awaited && head_is_self {
            self.proceed.notify_one();
        }
        Ok(())
    }

    pub fn on_heartbeat(&self, from: &PeerId, status: PeerStatus, reported_ms: i64) -> Result<()> {
        if from == &self.peer_id {
            return Ok(());
        }
        let joined = locked(&self.membership, "membership")?.observe_heartbeat(
            from.clone(),
            status,
            Utc::now(),
            from_millis(reported_ms),
        );
        if joined {
            info!("[{}] peer {} joined ({})", self.peer_id, from, status);
        }
        Ok(())
    }

    /// Forget `peer` entirely; returns true if it was a member
    pub fn evict(&self, peer: &PeerId, reason: &str) -> Result<bool> {
        if peer == &self.peer_id {
            return Ok(false);
        }
        let known = locked(&self.membership, "membership")?.remove(peer).is_some();
        if known {
            info!("[{}] evicting {}: {}", self.peer_id, peer, reason);
        }
        self.purge(peer)?;
        Ok(known)
    }

    /// Evict every peer whose heartbeat is older than the eviction timeout
    pub fn evict_stale(&self, now: DateTime<Utc>) -> Result<Vec<PeerId>> {
        let stale = locked(&self.membership, "membership")?.evict_stale(
            now,
            self.timing.eviction_timeout,
            &self.peer_id,
        );
        for peer in &stale {
            info!(
                "[{}] evicting {}: no heartbeat for {}ms",
                self.peer_id,
                peer,
                self.timing.eviction_timeout.as_millis()
            );
            self.purge(peer)?;
        }
        Ok(stale)
    }

    // Drop a departed peer's request and stop waiting on it
    fn purge(&self, peer: &PeerId) -> Result<()> {
        let status = self.state.borrow().status;
        locked(&self.queue, "queue")?.remove(peer);
        let unblocked = {
            let mut awaiting = locked(&self.awaiting, "awaiting")?;
            awaiting.remove(peer) && awaiting.is_empty()
        };
        if status == PeerStatus::Wanting && unblocked {
            debug!("[{}] no longer waiting on {}", self.peer_id, peer);
            self.proceed.notify_one();
        }
        Ok(())
    }

    // Our own membership record is refreshed locally, never over the network
    fn refresh_self(&self) -> Result<()> {
        let status = self.status();
        let now = Utc::now();
        locked(&self.membership, "membership")?.observe_heartbeat(
            self.peer_id.clone(),
            status,
            now,
            Some(now),
        );
        Ok(())
    }

    /// Build the next heartbeat, refreshing our own record on the way
    pub fn heartbeat_message(&self, address: SocketAddr) -> Result<PeerMessage> {
        self.refresh_self()?;
        Ok(PeerMessage::Heartbeat {
            peer: self.peer_id.clone(),
            status: self.status(),
            timestamp: now_millis(),
            address,
        })
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    // ---- snapshots ----

    pub fn peers(&self) -> Result<Vec<PeerRecord>> {
        Ok(locked(&self.membership, "membership")?.list_peers())
    }

    /// Peers we would ask for permission right now
    pub fn peer_ids(&self) -> Result<Vec<PeerId>> {
        Ok(locked(&self.membership, "membership")?.peer_ids_except(&self.peer_id))
    }

    pub fn membership_size(&self) -> Result<usize> {
        Ok(locked(&self.membership, "membership")?.len())
    }

    pub fn current_holder(&self) -> Result<Option<PeerId>> {
        if self.status() == PeerStatus::Holding {
            return Ok(Some(self.peer_id.clone()));
        }
        Ok(locked(&self.membership, "membership")?.current_holder())
    }

    pub fn queue_snapshot(&self) -> Result<Vec<PendingRequestView>> {
        Ok(locked(&self.queue, "queue")?.snapshot())
    }

    pub fn awaiting_snapshot(&self) -> Result<Vec<PeerId>> {
        let mut awaiting: Vec<PeerId> = locked(&self.awaiting, "awaiting")?
            .iter()
            .cloned()
            .collect();
        awaiting.sort();
        Ok(awaiting)
    }
}

impl PeerHandler for MutexEngine {
    fn handle(&self, message: PeerMessage) -> Option<PeerReply> {
        let kind = message.kind();
        let result = match message {
            PeerMessage::Request { peer, timestamp } => {
                match self.on_request(&peer, timestamp) {
                    Ok(granted) => return Some(PeerReply::Granted(granted)),
                    Err(e) => {
                        // Never grant on a failure
                        error!("[{}] failed to decide request from {}: {}", self.peer_id, peer, e);
                        return Some(PeerReply::Granted(false));
                    }
                }
            }
            PeerMessage::Release { peer } => self.on_release(&peer),
            PeerMessage::Leave { peer } => self.evict(&peer, "left the group").map(|_| ()),
            PeerMessage::Heartbeat {
                peer,
                status,
                timestamp,
                ..
            } => self.on_heartbeat(&peer, status, timestamp),
        };
        if let Err(e) = result {
            error!("[{}] failed to handle {}: {}", self.peer_id, kind, e);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::InMemoryNetwork;

    fn timing() -> TimingSettings {
        TimingSettings {
            heartbeat_interval: Duration::from_millis(50),
            cleanup_interval: Duration::from_millis(100),
            eviction_timeout: Duration::from_millis(300),
            rpc_timeout: Duration::from_millis(500),
            max_hold_ticks: 3,
            tick: Duration::from_millis(20),
            retry_timeout: Duration::from_millis(200),
        }
    }

    fn engine(name: &str, network: &InMemoryNetwork) -> Arc<MutexEngine> {
        let engine = Arc::new(MutexEngine::new(
            PeerId::from(name),
            timing(),
            Arc::new(network.clone()),
        ));
        network
            .register(PeerId::from(name), engine.clone())
            .unwrap();
        engine
    }

    fn introduce(engines: &[&Arc<MutexEngine>]) {
        for a in engines {
            for b in engines {
                if a.peer_id() != b.peer_id() {
                    a.on_heartbeat(b.peer_id(), PeerStatus::Free, now_millis())
                        .unwrap();
                }
            }
        }
    }

    #[test]
    fn test_free_peer_grants_and_observes_clock() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);

        assert!(a.on_request(&PeerId::from("b"), Timestamp::new(10)).unwrap());
        assert!(a.queue_snapshot().unwrap().is_empty());
        // Our next request must be stamped after the one we just granted
        assert!(a.begin_request().unwrap() > Timestamp::new(10));
    }

    #[test]
    fn test_wanting_peer_applies_tie_break() {
        let network = InMemoryNetwork::new();
        let b = engine("b", &network);
        let mine = b.begin_request().unwrap();

        // Older request wins
        assert!(b.on_request(&PeerId::from("z"), Timestamp::new(0)).unwrap());
        // Same stamp: the smaller id wins
        assert!(b.on_request(&PeerId::from("a"), mine).unwrap());
        assert!(!b.on_request(&PeerId::from("c"), mine).unwrap());

        let queue = b.queue_snapshot().unwrap();
        let queued: Vec<&str> = queue.iter().map(|v| v.requester.as_str()).collect();
        assert_eq!(queued, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_holding_peer_defers_everyone() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        a.acquire().await.unwrap();
        assert_eq!(a.status(), PeerStatus::Holding);

        assert!(!a.on_request(&PeerId::from("b"), Timestamp::new(1)).unwrap());
        assert_eq!(a.queue_snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_second_request_is_refused() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        a.begin_request().unwrap();

        assert!(matches!(
            a.begin_request(),
            Err(crate::error::PeerlockError::State(StateError::AlreadyActive(_)))
        ));
    }

    #[tokio::test]
    async fn test_release_without_holding_is_refused() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        assert!(matches!(
            a.release().await,
            Err(crate::error::PeerlockError::State(StateError::NotHolding))
        ));
    }

    #[tokio::test]
    async fn test_finish_hold_runs_once_and_releases_deferred() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        let b = engine("b", &network);
        introduce(&[&a, &b]);

        a.acquire().await.unwrap();
        let b_stamp = b.begin_request().unwrap();
        assert!(!a.on_request(b.peer_id(), b_stamp).unwrap());

        assert!(a.finish_hold().await.unwrap());
        assert!(!a.finish_hold().await.unwrap());
        assert_eq!(a.status(), PeerStatus::Free);
        assert!(a.queue_snapshot().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_early_release_ends_the_session() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        let session = a.acquire().await.unwrap();

        let holder = {
            let a = a.clone();
            tokio::spawn(async move { a.hold(session).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        a.release().await.unwrap();

        assert_eq!(a.status(), PeerStatus::Free);
        assert!(matches!(
            holder.await.unwrap().unwrap(),
            SessionEnd::Released { .. }
        ));
    }

    #[tokio::test]
    async fn test_eviction_unblocks_a_waiting_request() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        let b = engine("b", &network);
        introduce(&[&a, &b]);

        // b holds, a is denied and waits on b
        b.acquire().await.unwrap();
        let waiter = {
            let a = a.clone();
            tokio::spawn(async move { a.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.status(), PeerStatus::Wanting);
        assert_eq!(a.awaiting_snapshot().unwrap(), vec![PeerId::from("b")]);

        // b crashes and is evicted: a must get in without any release
        network.crash(b.peer_id()).unwrap();
        assert!(a.evict(b.peer_id(), "test").unwrap());

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(a.status(), PeerStatus::Holding);
    }

    /// Gets evicted by the requester while answering, then denies
    struct VanishingDenier {
        requester: std::sync::OnceLock<std::sync::Weak<MutexEngine>>,
    }

    impl PeerHandler for VanishingDenier {
        fn handle(&self, message: PeerMessage) -> Option<PeerReply> {
            if let Some(engine) = self.requester.get().and_then(std::sync::Weak::upgrade) {
                engine.evict(&PeerId::from("p"), "test").unwrap();
            }
            message.expects_reply().then_some(PeerReply::Granted(false))
        }
    }

    #[tokio::test]
    async fn test_denier_evicted_mid_round_is_not_awaited() {
        let network = InMemoryNetwork::new();
        let a = Arc::new(MutexEngine::new(
            PeerId::from("a"),
            TimingSettings {
                retry_timeout: Duration::from_secs(30),
                ..timing()
            },
            Arc::new(network.clone()),
        ));
        let denier = Arc::new(VanishingDenier {
            requester: std::sync::OnceLock::new(),
        });
        denier.requester.set(Arc::downgrade(&a)).unwrap();
        network.register(PeerId::from("p"), denier.clone()).unwrap();
        a.on_heartbeat(&PeerId::from("p"), PeerStatus::Free, now_millis())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), a.acquire())
            .await
            .expect("acquire should not wait out the retry timeout")
            .unwrap();

        assert_eq!(a.status(), PeerStatus::Holding);
        assert!(a.awaiting_snapshot().unwrap().is_empty());
        assert!(a.peer_ids().unwrap().is_empty());
    }

    #[test]
    fn test_evict_stale_never_evicts_self() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        a.on_heartbeat(&PeerId::from("b"), PeerStatus::Free, now_millis())
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(60);
        let evicted = a.evict_stale(later).unwrap();

        assert_eq!(evicted, vec![PeerId::from("b")]);
        assert_eq!(a.membership_size().unwrap(), 1);
        assert_eq!(a.peers().unwrap()[0].id, PeerId::from("a"));
    }

    #[tokio::test]
    async fn test_cancelled_request_stops_acquire() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);
        let b = engine("b", &network);
        introduce(&[&a, &b]);

        b.acquire().await.unwrap();
        let waiter = {
            let a = a.clone();
            tokio::spawn(async move { a.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a.cancel_request().unwrap());

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(crate::error::PeerlockError::State(StateError::NotWanting))
        ));
        assert_eq!(a.status(), PeerStatus::Free);
    }

    #[tokio::test]
    async fn test_handler_replies_only_to_requests() {
        let network = InMemoryNetwork::new();
        let a = engine("a", &network);

        let reply = a.handle(PeerMessage::Request {
            peer: PeerId::from("b"),
            timestamp: Timestamp::new(1),
        });
        assert_eq!(reply, Some(PeerReply::Granted(true)));

        let reply = a.handle(PeerMessage::Heartbeat {
            peer: PeerId::from("b"),
            status: PeerStatus::Wanting,
            timestamp: now_millis(),
            address: "127.0.0.1:9000".parse().unwrap(),
        });
        assert_eq!(reply, None);
        assert_eq!(a.peer_ids().unwrap(), vec![PeerId::from("b")]);

        a.handle(PeerMessage::Leave {
            peer: PeerId::from("b"),
        });
        assert!(a.peer_ids().unwrap().is_empty());
    }
}
