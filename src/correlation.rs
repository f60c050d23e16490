//! Query correlation table.
//!
//! Maps outstanding query frame ids to the one-shot channels their callers
//! are blocked on. Entries live for a single request/response round trip:
//! registered immediately before the query frame is written, removed by the
//! same caller on completion or timeout.
//!
//! One lock guards both the caller's removal-on-timeout and the reader's
//! lookup, so a reply cannot race a timeout into a half-removed waiter.

use crate::error::FramingError;
use crate::payload::InboundPayload;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Thread-safe registry of in-flight queries keyed by frame id.
pub(crate) struct PendingQueries {
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<InboundPayload>>>,
}

impl PendingQueries {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter under `id` and returns the receiving end.
    ///
    /// Must be called before the query frame is written, so a fast reply
    /// cannot arrive ahead of its waiter.
    pub(crate) fn register(&self, id: Uuid) -> oneshot::Receiver<InboundPayload> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        rx
    }

    /// Removes the waiter for `id`. Returns whether one was present.
    pub(crate) fn remove(&self, id: Uuid) -> bool {
        self.waiters.lock().remove(&id).is_some()
    }

    /// Routes a reply payload to the waiter registered under `id`.
    ///
    /// Fails with [`FramingError::UnmatchedReply`] when no waiter matches,
    /// which happens when the caller already timed out and removed itself.
    pub(crate) fn complete(&self, id: Uuid, payload: InboundPayload) -> Result<(), FramingError> {
        let tx = self
            .waiters
            .lock()
            .remove(&id)
            .ok_or(FramingError::UnmatchedReply(id))?;
        // A send error means the receiver was dropped between removal and
        // delivery; the caller is gone either way.
        tx.send(payload).map_err(|_| FramingError::UnmatchedReply(id))
    }

    /// Drops all waiters, waking their callers empty-handed.
    pub(crate) fn clear(&self) {
        self.waiters.lock().clear();
    }

    /// Number of queries currently awaiting replies.
    pub(crate) fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn payload(text: &str) -> InboundPayload {
        InboundPayload::new("test.reply", Box::new(Bytes::from(text.as_bytes().to_vec())))
    }

    #[tokio::test]
    async fn test_complete_routes_to_waiter() {
        let pending = PendingQueries::new();
        let id = Uuid::new_v4();
        let rx = pending.register(id);

        pending.complete(id, payload("hello")).unwrap();

        let received = rx.await.unwrap();
        assert_eq!(
            received.downcast_ref::<Bytes>().unwrap().as_ref(),
            b"hello"
        );
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_reverse_order_completion() {
        let pending = PendingQueries::new();
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let rx1 = pending.register(id1);
        let rx2 = pending.register(id2);

        // Replies arrive in reverse order of issuance.
        pending.complete(id2, payload("two")).unwrap();
        pending.complete(id1, payload("one")).unwrap();

        let r1 = rx1.await.unwrap();
        let r2 = rx2.await.unwrap();
        assert_eq!(r1.downcast_ref::<Bytes>().unwrap().as_ref(), b"one");
        assert_eq!(r2.downcast_ref::<Bytes>().unwrap().as_ref(), b"two");
    }

    #[test]
    fn test_unmatched_reply() {
        let pending = PendingQueries::new();
        let id = Uuid::new_v4();
        let result = pending.complete(id, payload("nobody home"));
        assert!(matches!(result, Err(FramingError::UnmatchedReply(got)) if got == id));
    }

    #[test]
    fn test_remove_prevents_late_completion() {
        let pending = PendingQueries::new();
        let id = Uuid::new_v4();
        let _rx = pending.register(id);

        assert!(pending.remove(id));
        assert!(!pending.remove(id));
        assert_eq!(pending.len(), 0);

        // A late reply finds no waiter.
        assert!(pending.complete(id, payload("late")).is_err());
    }

    #[tokio::test]
    async fn test_clear_wakes_waiters_empty_handed() {
        let pending = PendingQueries::new();
        let rx = pending.register(Uuid::new_v4());
        pending.clear();
        assert!(rx.await.is_err());
    }
}
