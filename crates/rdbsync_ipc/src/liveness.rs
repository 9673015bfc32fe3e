//! Peer liveness events.
//!
//! The transport never calls into business logic when a peer dies. It emits
//! a [`PeerEvent`] into the channel of every linked [`DeathWatcher`]; the
//! owner of the receiving end decides what cleanup to run.

use tokio::sync::mpsc;

/// A liveness event about a peer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// The peer process went away.
    Died {
        /// Process id the watcher was linked for.
        pid: i32,
    },
    /// The receiving side is shutting down; no more events follow.
    Closed,
}

/// Sending half of a peer event channel.
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Receiving half of a peer event channel.
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Creates a peer event channel.
pub fn peer_event_channel() -> (PeerEventSender, PeerEventReceiver) {
    mpsc::unbounded_channel()
}

/// Registration linking a remote object's death to a pid.
#[derive(Debug, Clone)]
pub struct DeathWatcher {
    pid: i32,
    sender: PeerEventSender,
}

impl DeathWatcher {
    /// Creates a watcher that reports deaths as `pid`.
    pub fn new(pid: i32, sender: PeerEventSender) -> Self {
        Self { pid, sender }
    }

    /// The pid reported on death.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Emits [`PeerEvent::Died`]. Returns false if the receiver is gone.
    pub fn notify_died(&self) -> bool {
        self.sender.send(PeerEvent::Died { pid: self.pid }).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_emits_death() {
        let (tx, mut rx) = peer_event_channel();
        let watcher = DeathWatcher::new(42, tx);
        assert!(watcher.notify_died());
        assert_eq!(rx.try_recv().unwrap(), PeerEvent::Died { pid: 42 });
    }

    #[test]
    fn closed_receiver() {
        let (tx, rx) = peer_event_channel();
        drop(rx);
        assert!(!DeathWatcher::new(1, tx).notify_died());
    }
}
