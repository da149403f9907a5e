//! Room transition gate
//!
//! A visitor's reader stops consuming input while a room transition is in
//! flight. [`arm`] creates a fresh gate per transition: the reader keeps the
//! [`PendingTransition`] and waits on it, the [`TransitionGate`] travels with
//! the request and is fired exactly once by whoever completes the
//! transition (a room after an enter, or the directory on destroy).

use tokio::sync::oneshot;

use crate::room::Placement;

/// Firing side of a transition gate
#[derive(Debug)]
pub struct TransitionGate(oneshot::Sender<Option<Placement>>);

/// Waiting side of a transition gate
#[derive(Debug)]
pub struct PendingTransition(oneshot::Receiver<Option<Placement>>);

/// Arm a new gate
pub fn arm() -> (TransitionGate, PendingTransition) {
    let (tx, rx) = oneshot::channel();
    (TransitionGate(tx), PendingTransition(rx))
}

impl TransitionGate {
    /// Complete the transition with the visitor's resulting placement.
    ///
    /// Consumes the gate, so it can only fire once.
    pub fn fire(self, placement: Option<Placement>) {
        // waiter may already be gone (visitor torn down)
        let _ = self.0.send(placement);
    }
}

impl PendingTransition {
    /// Wait for the transition to complete.
    ///
    /// A gate dropped without firing counts as "no room".
    pub async fn wait(self) -> Option<Placement> {
        self.0.await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pending_until_fired() {
        let (gate, pending) = arm();
        let waiter = tokio::spawn(pending.wait());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.fire(None);
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_gate_releases_waiter() {
        let (gate, pending) = arm();
        drop(gate);
        assert!(pending.wait().await.is_none());
    }

    #[tokio::test]
    async fn test_fire_without_waiter_is_harmless() {
        let (gate, pending) = arm();
        drop(pending);
        gate.fire(None);
    }
}
