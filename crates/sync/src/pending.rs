//! One-shot pending-request bookkeeping.
//!
//! The engine keeps at most one outstanding header request per mode (by nonce,
//! by hash). Arming a new request implicitly invalidates the previous one of
//! the same mode: the old completion signal is dropped and can never be
//! satisfied. Delivery callbacks complete a request only when the delivered
//! key matches the armed one; a completion for an already-cleared request is
//! a no-op.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// At most one outstanding request, keyed by `K`, with a one-shot completion
/// signal allocated freshly per request.
pub(crate) struct PendingRequest<K> {
    slot: Mutex<Option<(K, oneshot::Sender<()>)>>,
}

impl<K: PartialEq> PendingRequest<K> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Arm a request for `key`, replacing any previous request of this mode.
    ///
    /// Returns the receiver the waiter blocks on. The previous request's
    /// sender (if any) is dropped, which wakes an abandoned waiter with a
    /// receive error rather than leaving it hanging.
    pub(crate) fn arm(&self, key: K) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock() = Some((key, tx));
        rx
    }

    /// Clear the outstanding request without signalling it.
    pub(crate) fn disarm(&self) {
        *self.slot.lock() = None;
    }

    /// Complete the outstanding request if it matches `key`.
    ///
    /// Returns true when a matching request was cleared and signalled. A send
    /// into an already-dropped receiver is ignored: the waiter timed out and
    /// its result no longer matters, but the deliverer must never stall.
    pub(crate) fn complete_if_matches(&self, key: &K) -> bool {
        let mut slot = self.slot.lock();
        match slot.take() {
            Some((armed, signal)) if armed == *key => {
                let _ = signal.send(());
                true
            }
            other => {
                *slot = other;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_matching_completion_signals_waiter() {
        let pending = PendingRequest::new();
        let rx = pending.arm(7u64);

        assert!(pending.complete_if_matches(&7));
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_mismatched_completion_leaves_request_armed() {
        let pending = PendingRequest::new();
        let rx = pending.arm(7u64);

        assert!(!pending.complete_if_matches(&8));
        assert!(pending.complete_if_matches(&7));
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_noop() {
        let pending = PendingRequest::new();
        let rx = pending.arm(7u64);

        assert!(pending.complete_if_matches(&7));
        assert!(!pending.complete_if_matches(&7));
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_arming_replaces_previous_request() {
        let pending = PendingRequest::new();
        let old_rx = pending.arm(7u64);
        let new_rx = pending.arm(8u64);

        // The old waiter is woken with an error, never a spurious success.
        assert!(old_rx.await.is_err());

        assert!(!pending.complete_if_matches(&7));
        assert!(pending.complete_if_matches(&8));
        assert!(new_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_completion_after_waiter_dropped_does_not_stall() {
        let pending = PendingRequest::new();
        let rx = pending.arm(7u64);
        drop(rx);

        // The slot is still armed; completing it must not error or block.
        assert!(pending.complete_if_matches(&7));
    }

    #[tokio::test]
    async fn test_disarm_clears_without_signalling() {
        let pending = PendingRequest::new();
        let rx = pending.arm(7u64);
        pending.disarm();

        assert!(!pending.complete_if_matches(&7));
        assert!(rx.await.is_err());
    }
}
