//! Bounded use of the resource
//!
//! A session runs for at most `budget` ticks and ends early when a release
//! is requested for its own session id. Requests carrying another id belong
//! to an earlier session and are ignored.
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// How a session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The whole budget was used
    Expired { ticks: u32 },
    /// An early release arrived after `ticks` completed ticks
    Released { ticks: u32 },
}

#[derive(Clone, Debug)]
pub struct ResourceSession {
    id: u64,
    tick: Duration,
    budget: u32,
}

impl ResourceSession {
    pub fn new(id: u64, tick: Duration, budget: u32) -> Self {
        Self { id, tick, budget }
    }

    /// Run until the budget expires or `release` names this session
    pub async fn run(&self, mut release: watch::Receiver<u64>) -> SessionEnd {
        for tick in 0..self.budget {
            if *release.borrow_and_update() == self.id {
                return SessionEnd::Released { ticks: tick };
            }

            let deadline = Instant::now() + self.tick;
            loop {
                tokio::select! {
                    _ = sleep_until(deadline) => break,
                    changed = release.changed() => {
                        if changed.is_err() {
                            // Nobody can release us any more; use the whole tick
                            sleep_until(deadline).await;
                            break;
                        }
                        if *release.borrow_and_update() == self.id {
                            return SessionEnd::Released { ticks: tick };
                        }
                    }
                }
            }
            debug!("session {} tick {}/{}", self.id, tick + 1, self.budget);
        }
        SessionEnd::Expired { ticks: self.budget }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_budget() {
        let (_tx, rx) = watch::channel(0u64);
        let session = ResourceSession::new(1, Duration::from_millis(100), 3);

        let started = Instant::now();
        let end = session.run(rx).await;

        assert_eq!(end, SessionEnd::Expired { ticks: 3 });
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_for_this_session_ends_early() {
        let (tx, rx) = watch::channel(0u64);
        let session = ResourceSession::new(7, Duration::from_millis(100), 30);

        let runner = tokio::spawn(async move { session.run(rx).await });
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(7).unwrap();

        assert_eq!(runner.await.unwrap(), SessionEnd::Released { ticks: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_release_is_ignored() {
        let (tx, rx) = watch::channel(0u64);
        // A release left over from session 4 must not end session 5
        tx.send(4).unwrap();
        let session = ResourceSession::new(5, Duration::from_millis(10), 2);

        assert_eq!(session.run(rx).await, SessionEnd::Expired { ticks: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_before_start_is_honoured() {
        let (tx, rx) = watch::channel(0u64);
        tx.send(9).unwrap();
        let session = ResourceSession::new(9, Duration::from_secs(1), 30);

        assert_eq!(session.run(rx).await, SessionEnd::Released { ticks: 0 });
    }
}
