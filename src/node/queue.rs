//! Ordered backlog of pending resource requests.
//!
//! The lowest `(timestamp, requester)` pair is always served next, which is
//! the whole fairness guarantee of the protocol.
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::clock::{request_order, Timestamp};
use crate::node::messages::PendingRequestView;
use crate::node::PeerId;

/// One queued request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub requester: PeerId,
    pub timestamp: Timestamp,
}

impl PendingRequest {
    pub fn new(requester: PeerId, timestamp: Timestamp) -> Self {
        Self {
            requester,
            timestamp,
        }
    }

    /// True when `self` must be served before a request `(timestamp, requester)`
    pub fn precedes(&self, timestamp: Timestamp, requester: &PeerId) -> bool {
        request_order((self.timestamp, &self.requester), (timestamp, requester)) == Ordering::Less
    }
}

impl Ord for PendingRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        request_order(
            (self.timestamp, &self.requester),
            (other.timestamp, &other.requester),
        )
    }
}

impl PartialOrd for PendingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Request queue, unique per requester
#[derive(Debug, Default)]
pub struct RequestQueue {
    ordered: BTreeSet<PendingRequest>,
    by_peer: HashMap<PeerId, Timestamp>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request; a peer already queued keeps its original entry.
    ///
    /// Returns true if the request was inserted.
    pub fn enqueue(&mut self, requester: PeerId, timestamp: Timestamp) -> bool {
        if self.by_peer.contains_key(&requester) {
            return false;
        }
        self.by_peer.insert(requester.clone(), timestamp);
        self.ordered.insert(PendingRequest::new(requester, timestamp));
        true
    }

    /// Pop the head if it belongs to `requester`; leave the queue alone otherwise.
    pub fn dequeue_if_head(&mut self, requester: &PeerId) -> bool {
        match self.ordered.first() {
            Some(head) if &head.requester == requester => {
                if let Some(head) = self.ordered.pop_first() {
                    self.by_peer.remove(&head.requester);
                }
                true
            }
            _ => false,
        }
    }

    /// Unconditionally drop `requester`'s entry
    pub fn remove(&mut self, requester: &PeerId) -> Option<PendingRequest> {
        let timestamp = self.by_peer.remove(requester)?;
        let entry = PendingRequest::new(requester.clone(), timestamp);
        self.ordered.remove(&entry);
        Some(entry)
    }

    pub fn peek_head(&self) -> Option<&PeerId> {
        self.ordered.first().map(|entry| &entry.requester)
    }

    pub fn contains(&self, requester: &PeerId) -> bool {
        self.by_peer.contains_key(requester)
    }

    pub fn timestamp_of(&self, requester: &PeerId) -> Option<Timestamp> {
        self.by_peer.get(requester).copied()
    }

    /// Remove and return every entry except `keep`, in service order
    pub fn drain_except(&mut self, keep: &PeerId) -> Vec<PendingRequest> {
        let drained: Vec<PendingRequest> = self
            .ordered
            .iter()
            .filter(|entry| &entry.requester != keep)
            .cloned()
            .collect();
        for entry in &drained {
            self.remove(&entry.requester);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn snapshot(&self) -> Vec<PendingRequestView> {
        self.ordered
            .iter()
            .map(|entry| PendingRequestView {
                requester: entry.requester.clone(),
                timestamp: entry.timestamp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::from(name)
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut queue = RequestQueue::new();
        assert!(queue.enqueue(peer("b"), Timestamp::new(3)));
        assert!(!queue.enqueue(peer("b"), Timestamp::new(3)));
        // A retransmission with another stamp keeps the original entry
        assert!(!queue.enqueue(peer("b"), Timestamp::new(9)));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.timestamp_of(&peer("b")), Some(Timestamp::new(3)));
    }

    #[test]
    fn test_order_by_timestamp_then_id() {
        let mut queue = RequestQueue::new();
        queue.enqueue(peer("c"), Timestamp::new(2));
        queue.enqueue(peer("b"), Timestamp::new(1));
        queue.enqueue(peer("a"), Timestamp::new(2));

        let order: Vec<String> = queue
            .snapshot()
            .into_iter()
            .map(|v| v.requester.to_string())
            .collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(queue.peek_head(), Some(&peer("b")));
    }

    #[test]
    fn test_dequeue_if_head() {
        let mut queue = RequestQueue::new();
        queue.enqueue(peer("a"), Timestamp::new(1));
        queue.enqueue(peer("b"), Timestamp::new(2));

        assert!(!queue.dequeue_if_head(&peer("b")));
        assert_eq!(queue.len(), 2);

        assert!(queue.dequeue_if_head(&peer("a")));
        assert_eq!(queue.peek_head(), Some(&peer("b")));
        assert!(!queue.contains(&peer("a")));
    }

    #[test]
    fn test_remove_and_drain() {
        let mut queue = RequestQueue::new();
        queue.enqueue(peer("me"), Timestamp::new(1));
        queue.enqueue(peer("x"), Timestamp::new(5));
        queue.enqueue(peer("y"), Timestamp::new(4));

        assert!(queue.remove(&peer("nobody")).is_none());
        assert_eq!(
            queue.remove(&peer("x")),
            Some(PendingRequest::new(peer("x"), Timestamp::new(5)))
        );

        queue.enqueue(peer("x"), Timestamp::new(6));
        let drained = queue.drain_except(&peer("me"));
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].requester, peer("y"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_head(), Some(&peer("me")));
    }

    #[test]
    fn test_precedes() {
        let entry = PendingRequest::new(peer("a"), Timestamp::new(4));
        assert!(entry.precedes(Timestamp::new(4), &peer("b")));
        assert!(!entry.precedes(Timestamp::new(4), &peer("a")));
        assert!(!entry.precedes(Timestamp::new(3), &peer("z")));
    }
}
