//! RPC call registry.

use crate::error::ClientError;
use std::collections::HashMap;
use teletable_protocol::EntryValue;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Correlates outgoing procedure calls with their responses.
///
/// Calls are keyed by `(definition id, unique id)`. The registry lives
/// inside the connection runtime; a session drop cancels everything it
/// still holds.
#[derive(Default)]
pub(crate) struct RpcRegistry {
    pending: HashMap<(u16, u16), PendingCall>,
    next_unique: HashMap<u16, u16>,
}

struct PendingCall {
    reply: oneshot::Sender<Result<Vec<EntryValue>, ClientError>>,
    deadline: Instant,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Allocates the next unique id for a definition: monotonic modulo
    /// 2^16, skipping ids still pending for that definition.
    pub fn allocate_unique_id(&mut self, definition_id: u16) -> u16 {
        let counter = self.next_unique.entry(definition_id).or_insert(0);
        loop {
            *counter = counter.wrapping_add(1);
            if !self.pending.contains_key(&(definition_id, *counter)) {
                return *counter;
            }
        }
    }

    /// Records a call awaiting its response.
    pub fn register(
        &mut self,
        definition_id: u16,
        unique_id: u16,
        reply: oneshot::Sender<Result<Vec<EntryValue>, ClientError>>,
        deadline: Instant,
    ) {
        self.pending
            .insert((definition_id, unique_id), PendingCall { reply, deadline });
    }

    /// Completes the matching call with its results; returns `false` for
    /// a response nothing is waiting on.
    pub fn complete(
        &mut self,
        definition_id: u16,
        unique_id: u16,
        results: Vec<EntryValue>,
    ) -> bool {
        match self.pending.remove(&(definition_id, unique_id)) {
            Some(call) => {
                let _ = call.reply.send(Ok(results));
                true
            }
            None => false,
        }
    }

    /// Fails every call whose deadline has passed. A response arriving
    /// later finds no slot and is discarded by the caller.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, call)| call.deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            if let Some(call) = self.pending.remove(key) {
                let _ = call.reply.send(Err(ClientError::TimedOut));
            }
        }
        expired.len()
    }

    /// Fails every pending call; used when the session drops.
    pub fn cancel_all(&mut self) {
        for (_, call) in self.pending.drain() {
            let _ = call.reply.send(Err(ClientError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn slot() -> (
        oneshot::Sender<Result<Vec<EntryValue>, ClientError>>,
        oneshot::Receiver<Result<Vec<EntryValue>, ClientError>>,
    ) {
        oneshot::channel()
    }

    #[tokio::test]
    async fn test_unique_ids_are_monotonic_per_definition() {
        let mut registry = RpcRegistry::new();
        assert_eq!(registry.allocate_unique_id(1), 1);
        assert_eq!(registry.allocate_unique_id(1), 2);
        assert_eq!(registry.allocate_unique_id(2), 1);
    }

    #[tokio::test]
    async fn test_unique_id_skips_pending() {
        let mut registry = RpcRegistry::new();
        let far = Instant::now() + Duration::from_secs(60);

        let id = registry.allocate_unique_id(1);
        let (tx, _rx) = slot();
        registry.register(1, id, tx, far);

        // Force the counter to collide with the pending id.
        registry.next_unique.insert(1, id.wrapping_sub(1));
        let next = registry.allocate_unique_id(1);
        assert_ne!(next, id);
    }

    #[tokio::test]
    async fn test_complete_matches_by_both_ids() {
        let mut registry = RpcRegistry::new();
        let far = Instant::now() + Duration::from_secs(60);
        let (tx, mut rx) = slot();
        registry.register(4, 7, tx, far);

        assert!(!registry.complete(4, 8, vec![]));
        assert!(!registry.complete(5, 7, vec![]));
        assert!(registry.complete(4, 7, vec![EntryValue::Boolean(true)]));
        assert_eq!(registry.len(), 0);
        assert_eq!(
            rx.try_recv().unwrap().unwrap(),
            vec![EntryValue::Boolean(true)]
        );
    }

    #[tokio::test]
    async fn test_expire_fails_overdue_calls() {
        let mut registry = RpcRegistry::new();
        let now = Instant::now();
        let (overdue_tx, mut overdue_rx) = slot();
        let (fresh_tx, mut fresh_rx) = slot();
        registry.register(1, 1, overdue_tx, now - Duration::from_millis(1));
        registry.register(1, 2, fresh_tx, now + Duration::from_secs(60));

        assert_eq!(registry.expire(now), 1);
        assert!(matches!(
            overdue_rx.try_recv().unwrap(),
            Err(ClientError::TimedOut)
        ));
        assert!(fresh_rx.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_on_session_drop() {
        let mut registry = RpcRegistry::new();
        let far = Instant::now() + Duration::from_secs(60);
        let (tx_a, mut rx_a) = slot();
        let (tx_b, mut rx_b) = slot();
        registry.register(1, 1, tx_a, far);
        registry.register(2, 1, tx_b, far);

        registry.cancel_all();
        assert_eq!(registry.len(), 0);
        assert!(matches!(
            rx_a.try_recv().unwrap(),
            Err(ClientError::Cancelled)
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            Err(ClientError::Cancelled)
        ));
    }
}
