use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by the TCP sender and receiver
#[derive(Debug, Default)]
pub struct TransportStats {
    pub requests_sent: AtomicU64,
    pub replies_received: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub send_errors: AtomicU64,
    pub timeout_errors: AtomicU64,
    pub messages_received: AtomicU64,
    pub receive_errors: AtomicU64,
}

/// Point-in-time copy of `TransportStats`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrozenTransportStats {
    pub requests_sent: u64,
    pub replies_received: u64,
    pub notifications_sent: u64,
    pub send_errors: u64,
    pub timeout_errors: u64,
    pub messages_received: u64,
    pub receive_errors: u64,
}

impl TransportStats {
    pub fn freeze(&self) -> FrozenTransportStats {
        FrozenTransportStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            replies_received: self.replies_received.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            timeout_errors: self.timeout_errors.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
