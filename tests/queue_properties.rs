use std::collections::HashSet;

use peerlock::clock::{request_order, LamportClock, Timestamp};
use peerlock::node::queue::RequestQueue;
use peerlock::node::PeerId;
use proptest::prelude::*;

fn requests() -> impl Strategy<Value = Vec<(String, u64)>> {
    prop::collection::vec(("[a-e]{1,2}", 0u64..20), 0..40)
}

proptest! {
    #[test]
    fn test_snapshot_is_sorted_and_unique(entries in requests()) {
        let mut queue = RequestQueue::new();
        for (name, ts) in &entries {
            queue.enqueue(PeerId::from(name.as_str()), Timestamp::new(*ts));
        }

        let snapshot = queue.snapshot();
        let distinct: HashSet<&String> = entries.iter().map(|(name, _)| name).collect();
        prop_assert_eq!(snapshot.len(), distinct.len());
        prop_assert_eq!(queue.len(), distinct.len());

        for pair in snapshot.windows(2) {
            prop_assert_eq!(
                request_order(
                    (pair[0].timestamp, &pair[0].requester),
                    (pair[1].timestamp, &pair[1].requester),
                ),
                std::cmp::Ordering::Less
            );
        }
        if let Some(first) = snapshot.first() {
            prop_assert_eq!(queue.peek_head(), Some(&first.requester));
        }
    }

    #[test]
    fn test_first_request_per_peer_wins(entries in requests()) {
        let mut queue = RequestQueue::new();
        let mut first_seen = std::collections::HashMap::new();
        for (name, ts) in &entries {
            queue.enqueue(PeerId::from(name.as_str()), Timestamp::new(*ts));
            first_seen.entry(name.clone()).or_insert(*ts);
        }

        for (name, ts) in first_seen {
            prop_assert_eq!(
                queue.timestamp_of(&PeerId::from(name.as_str())),
                Some(Timestamp::new(ts))
            );
        }
    }

    #[test]
    fn test_request_order_is_total(
        a in ("[a-c]", 0u64..5),
        b in ("[a-c]", 0u64..5),
    ) {
        let (left, right) = (PeerId::from(a.0.as_str()), PeerId::from(b.0.as_str()));
        let forward = request_order((Timestamp::new(a.1), &left), (Timestamp::new(b.1), &right));
        let backward = request_order((Timestamp::new(b.1), &right), (Timestamp::new(a.1), &left));
        prop_assert_eq!(forward, backward.reverse());
        if forward == std::cmp::Ordering::Equal {
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn test_drain_keeps_only_the_survivor(entries in requests(), keep in "[a-e]{1,2}") {
        let mut queue = RequestQueue::new();
        for (name, ts) in &entries {
            queue.enqueue(PeerId::from(name.as_str()), Timestamp::new(*ts));
        }
        let keep = PeerId::from(keep.as_str());
        let was_queued = queue.contains(&keep);
        let before = queue.len();

        let drained = queue.drain_except(&keep);
        prop_assert!(drained.iter().all(|entry| entry.requester != keep));
        prop_assert!(drained.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert_eq!(queue.len(), usize::from(was_queued));
        prop_assert_eq!(drained.len() + queue.len(), before);
    }

    #[test]
    fn test_clock_never_goes_backwards(remotes in prop::collection::vec(0u64..1000, 1..30)) {
        let clock = LamportClock::new();
        let mut last = clock.current();
        for remote in remotes {
            clock.observe(Timestamp::new(remote));
            let stamped = clock.tick();
            prop_assert!(stamped > last);
            prop_assert!(stamped.value() > remote);
            last = stamped;
        }
    }
}
