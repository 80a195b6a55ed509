use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use super::stats::ConnectionStats;
use super::types::{ConnectionId, PushHandle, TerminationReason};
use crate::sse::ChannelFrame;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Connection registry is shutting down")]
    ShuttingDown,
}

/// Registry of all open live connections.
///
/// A handle is present here iff its connection is open. Request handlers,
/// the notification publisher and the background sweeps all mutate it
/// concurrently; every operation is safe under arbitrary interleaving.
pub struct ConnectionRegistry {
    /// connection_id -> PushHandle
    connections: DashMap<ConnectionId, Arc<PushHandle>>,
    /// subscriber_id -> Set<connection_id> (multi-device fan-out)
    subscriber_index: DashMap<i64, HashSet<ConnectionId>>,
    accepting: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            subscriber_index: DashMap::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Register a handle under `id`.
    ///
    /// Last write wins on collision; the displaced handle is completed and
    /// returned.
    pub fn register(
        &self,
        id: ConnectionId,
        handle: Arc<PushHandle>,
    ) -> Result<Option<Arc<PushHandle>>, RegistryError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(RegistryError::ShuttingDown);
        }

        let previous = self.connections.insert(id, handle);

        self.subscriber_index
            .entry(id.subscriber_id)
            .or_default()
            .insert(id);

        // shutdown() may have drained between the check and the insert
        if !self.accepting.load(Ordering::Acquire) {
            self.unregister(&id);
            return Err(RegistryError::ShuttingDown);
        }

        if let Some(ref displaced) = previous {
            tracing::warn!(connection_id = %id, "Connection id collision, replacing handle");
            displaced.terminate_with(Some(ChannelFrame::Complete));
        }

        tracing::info!(
            connection_id = %id,
            subscriber_id = id.subscriber_id,
            "Connection registered"
        );

        Ok(previous)
    }

    /// Remove a connection. Idempotent.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<PushHandle>> {
        let (_, handle) = self.connections.remove(id)?;
        self.remove_from_index(id);

        tracing::info!(
            connection_id = %id,
            subscriber_id = id.subscriber_id,
            "Connection unregistered"
        );

        Some(handle)
    }

    /// Remove `handle` only if it is still the registered one for its id.
    ///
    /// Used on send failure so a stale reference can never evict a newer
    /// connection. Returns whether anything was removed.
    pub fn unregister_handle(&self, handle: &Arc<PushHandle>) -> bool {
        let removed = self
            .connections
            .remove_if(&handle.id, |_, current| Arc::ptr_eq(current, handle))
            .is_some();

        if removed {
            self.remove_from_index(&handle.id);
            tracing::info!(
                connection_id = %handle.id,
                subscriber_id = handle.id.subscriber_id,
                "Connection unregistered"
            );
        }

        removed
    }

    /// Run the terminal transition for a handle exactly once.
    ///
    /// Timeouts complete the stream explicitly and errors emit an error frame
    /// before the handle is removed. Returns `false` if the handle was already
    /// terminated.
    pub fn terminate(&self, handle: &Arc<PushHandle>, reason: TerminationReason) -> bool {
        let frame = match reason {
            TerminationReason::TimedOut
            | TerminationReason::Reaped
            | TerminationReason::Evicted
            | TerminationReason::Shutdown => Some(ChannelFrame::Complete),
            TerminationReason::Errored => Some(ChannelFrame::Fail("delivery failed".to_string())),
            TerminationReason::Disconnected => None,
        };

        if !handle.terminate_with(frame) {
            self.unregister_handle(handle);
            return false;
        }

        self.unregister_handle(handle);

        tracing::debug!(
            connection_id = %handle.id,
            reason = reason.as_str(),
            "Connection terminated"
        );

        true
    }

    fn remove_from_index(&self, id: &ConnectionId) {
        if let Some(mut ids) = self.subscriber_index.get_mut(&id.subscriber_id) {
            ids.remove(id);
        }
        // Re-checked under the shard lock so a concurrent register is not lost
        self.subscriber_index
            .remove_if(&id.subscriber_id, |_, ids| ids.is_empty());
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<PushHandle>> {
        self.connections.get(id).map(|h| h.clone())
    }

    /// All open handles of one subscriber
    pub fn all_for_subscriber(&self, subscriber_id: i64) -> Vec<Arc<PushHandle>> {
        let ids: Vec<ConnectionId> = self
            .subscriber_index
            .get(&subscriber_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
            .collect()
    }

    /// Snapshot of every open handle
    pub fn all_connections(&self) -> Vec<Arc<PushHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Handles whose connect epoch is older than `threshold` or unreadable
    pub fn find_stale_connections(&self, threshold: Duration) -> Vec<Arc<PushHandle>> {
        let now = Utc::now();
        self.connections
            .iter()
            .filter(|entry| entry.key().is_stale(now, threshold))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        let max_per_subscriber = self
            .subscriber_index
            .iter()
            .map(|entry| entry.value().len())
            .max()
            .unwrap_or(0);

        ConnectionStats {
            total_connections: self.connections.len(),
            unique_subscribers: self.subscriber_index.len(),
            max_connections_per_subscriber: max_per_subscriber,
        }
    }

    /// Stop accepting registrations and close every open connection.
    ///
    /// Returns the number of connections closed.
    pub fn shutdown(&self) -> usize {
        self.accepting.store(false, Ordering::Release);

        let handles = self.all_connections();
        let mut closed = 0;
        for handle in &handles {
            if self.terminate(handle, TerminationReason::Shutdown) {
                closed += 1;
            }
        }

        tracing::info!(closed = closed, "Connection registry shut down");
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::ChannelFrame;
    use tokio::sync::mpsc;

    fn handle_for(subscriber_id: i64) -> (Arc<PushHandle>, mpsc::Receiver<ChannelFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(PushHandle::new(ConnectionId::new(subscriber_id), tx)), rx)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = handle_for(1);
        let (b, _rx_b) = handle_for(1);
        let (c, _rx_c) = handle_for(2);

        registry.register(a.id, a.clone()).unwrap();
        registry.register(b.id, b.clone()).unwrap();
        registry.register(c.id, c.clone()).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.all_for_subscriber(1).len(), 2);
        assert_eq!(registry.all_for_subscriber(2).len(), 1);
        assert!(registry.all_for_subscriber(3).is_empty());

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.unique_subscribers, 2);
        assert_eq!(stats.max_connections_per_subscriber, 2);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = handle_for(1);
        registry.register(a.id, a.clone()).unwrap();

        assert!(registry.unregister(&a.id).is_some());
        assert!(registry.unregister(&a.id).is_none());
        assert!(registry.all_for_subscriber(1).is_empty());
        assert_eq!(registry.stats().unique_subscribers, 0);
    }

    #[test]
    fn test_register_collision_last_write_wins() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        let id = ConnectionId::new(1);
        let first = Arc::new(PushHandle::new(id, tx1));
        let second = Arc::new(PushHandle::new(id, tx2));

        registry.register(id, first.clone()).unwrap();
        let displaced = registry.register(id, second.clone()).unwrap();

        assert!(Arc::ptr_eq(&displaced.unwrap(), &first));
        assert!(Arc::ptr_eq(&registry.get(&id).unwrap(), &second));
        assert_eq!(rx1.try_recv().unwrap(), ChannelFrame::Complete);

        // The stale handle cannot evict its replacement
        assert!(!registry.unregister_handle(&first));
        assert!(registry.get(&id).is_some());
    }

    #[test]
    fn test_terminate_exactly_once() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = handle_for(1);
        registry.register(a.id, a.clone()).unwrap();

        assert!(registry.terminate(&a, TerminationReason::TimedOut));
        assert!(!registry.terminate(&a, TerminationReason::Errored));
        assert!(registry.is_empty());

        assert_eq!(rx.try_recv().unwrap(), ChannelFrame::Complete);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_errored_frame_visible_once_terminated() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, mut rx) = handle_for(1);
        registry.register(a.id, a.clone()).unwrap();

        let waiter = {
            let a = a.clone();
            tokio::spawn(async move {
                a.terminated().await;
                rx.try_recv().ok()
            })
        };

        assert!(registry.terminate(&a, TerminationReason::Errored));
        assert_eq!(
            waiter.await.unwrap(),
            Some(ChannelFrame::Fail("delivery failed".to_string()))
        );
    }

    #[test]
    fn test_shutdown_closes_and_rejects() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = handle_for(1);
        registry.register(a.id, a.clone()).unwrap();

        assert_eq!(registry.shutdown(), 1);
        assert!(registry.is_empty());
        assert_eq!(rx.try_recv().unwrap(), ChannelFrame::Complete);

        let (b, _rx_b) = handle_for(2);
        assert!(matches!(
            registry.register(b.id, b),
            Err(RegistryError::ShuttingDown)
        ));
        assert!(!registry.is_accepting());
    }

    #[test]
    fn test_find_stale_connections() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let old_id = ConnectionId::with_epoch(1, Utc::now().timestamp_millis() - 10_000);
        let old = Arc::new(PushHandle::new(old_id, tx));
        let (fresh, _rx_fresh) = handle_for(2);
        registry.register(old.id, old.clone()).unwrap();
        registry.register(fresh.id, fresh.clone()).unwrap();

        let stale = registry.find_stale_connections(Duration::from_secs(5));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old_id);
    }
}
