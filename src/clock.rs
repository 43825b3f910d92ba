//! Request timestamps and wall-clock helpers.
//!
//! Request priority uses a Lamport clock: every stamp handed out is larger
//! than any stamp this peer has observed from others, so a peer that has
//! already answered a request can never later produce an older one.
//! Liveness (heartbeat age) uses the wall clock.
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use bincode::{Decode, Encode};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::node::PeerId;

/// Logical timestamp attached to a resource request
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    PartialOrd,
    Ord,
    Eq,
    Hash,
    Encode,
    Decode,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lamport clock shared by the request path and the request handler
#[derive(Debug, Default)]
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a new local event
    pub fn tick(&self) -> Timestamp {
        Timestamp(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Merge a timestamp received from another peer
    pub fn observe(&self, remote: Timestamp) {
        self.counter.fetch_max(remote.0, Ordering::SeqCst);
    }

    pub fn current(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::SeqCst))
    }
}

/// The tie-break rule: older timestamp first, then the smaller peer id.
///
/// Every peer must order requests with exactly this function.
pub fn request_order(
    left: (Timestamp, &PeerId),
    right: (Timestamp, &PeerId),
) -> CmpOrdering {
    left.0.cmp(&right.0).then_with(|| left.1.cmp(right.1))
}

/// Wall-clock time in milliseconds since the UNIX epoch, as sent in heartbeats
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert heartbeat milliseconds back to a `DateTime`
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
