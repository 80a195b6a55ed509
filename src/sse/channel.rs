//! Live notification channel: connect handshake and reconnect replay.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::config::LiveChannelConfig;
use crate::connection_manager::{
    ConnectionId, ConnectionRegistry, PushHandle, PushOutcome, RegistryError, TerminationReason,
};
use crate::metrics::{LiveChannelMetrics, NotificationMetrics};
use crate::polling::WorkerPool;
use crate::storage::NotificationStore;

use super::message::ChannelFrame;

/// Name of the replay worker pool
pub const REPLAY_POOL_NAME: &str = "notification-replay";

/// A freshly registered connection and the receiving end of its buffer
pub struct LiveConnection {
    pub handle: Arc<PushHandle>,
    pub frames: mpsc::Receiver<ChannelFrame>,
}

/// How a reconnect replay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayReport {
    /// Every missed notification was sent, plus `flushed` buffered live ones
    Completed { replayed: usize, flushed: usize },
    /// Storage or send failure; the connection was dropped
    Aborted { replayed: usize },
}

/// Connects subscribers to the live channel.
///
/// Replays run on their own worker pool, sized independently from the
/// long-poll pool.
pub struct LiveChannelService {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn NotificationStore>,
    replay_pool: WorkerPool,
    config: LiveChannelConfig,
}

impl LiveChannelService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn NotificationStore>,
        config: LiveChannelConfig,
    ) -> Self {
        let replay_pool = WorkerPool::new(REPLAY_POOL_NAME, config.replay_pool_size);
        Self {
            registry,
            store,
            replay_pool,
            config,
        }
    }

    pub fn config(&self) -> &LiveChannelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Register a new connection for `subscriber_id`.
    ///
    /// The first frame is always a keepalive. With a `last_seen_id` the
    /// missed notifications are replayed in the background before live
    /// pushes are released.
    #[tracing::instrument(name = "live.connect", skip(self))]
    pub fn connect(
        &self,
        subscriber_id: i64,
        last_seen_id: Option<i64>,
    ) -> Result<LiveConnection, RegistryError> {
        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        let id = ConnectionId::new(subscriber_id);

        let handle = Arc::new(match last_seen_id {
            Some(_) => PushHandle::replaying(id, tx),
            None => PushHandle::new(id, tx),
        });

        self.registry.register(id, handle.clone())?;
        LiveChannelMetrics::record_opened();
        LiveChannelMetrics::update_gauges(&self.registry.stats());

        // Buffer is empty here, so this cannot be Full
        if let Err(e) = handle.keepalive() {
            tracing::warn!(connection_id = %id, error = %e, "Initial keepalive failed");
            self.registry.terminate(&handle, TerminationReason::Errored);
        } else if let Some(last_seen) = last_seen_id {
            self.start_replay(handle.clone(), last_seen);
        }

        Ok(LiveConnection { handle, frames: rx })
    }

    fn start_replay(&self, handle: Arc<PushHandle>, last_seen_id: i64) {
        let registry = self.registry.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let worker_handle = handle.clone();

        let spawned = self.replay_pool.try_spawn(async move {
            replay(registry, store, config, worker_handle, last_seen_id).await
        });

        if let Err(e) = spawned {
            tracing::warn!(
                connection_id = %handle.id,
                last_seen_id = last_seen_id,
                error = %e,
                "Replay skipped, going live"
            );
            NotificationMetrics::record_replay_failed("pool_exhausted");
            if let Err(e) = handle.abort_replay() {
                tracing::warn!(connection_id = %handle.id, error = %e, "Flush of buffered notifications failed");
                self.registry.terminate(&handle, TerminationReason::Errored);
            }
        }
    }

    /// Stop accepting replays
    pub fn shutdown(&self) {
        self.replay_pool.close();
    }
}

/// Send every notification after `last_seen_id` in pages of `max_replay`,
/// then flush what arrived live in the meantime. Never retried.
async fn replay(
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn NotificationStore>,
    config: LiveChannelConfig,
    handle: Arc<PushHandle>,
    last_seen_id: i64,
) -> ReplayReport {
    let started = Instant::now();
    let subscriber_id = handle.subscriber_id();
    let page_size = config.max_replay.max(1);

    let mut cursor = last_seen_id;
    let mut replayed = 0;
    loop {
        let page = match store
            .notifications_after(subscriber_id, cursor, page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(
                    connection_id = %handle.id,
                    after_id = cursor,
                    error = %e,
                    "Replay query failed, dropping connection"
                );
                NotificationMetrics::record_replayed(replayed as u64);
                NotificationMetrics::record_replay_failed("storage");
                registry.terminate(&handle, TerminationReason::Errored);
                return ReplayReport::Aborted { replayed };
            }
        };

        for notification in &page {
            if handle.is_terminated() {
                NotificationMetrics::record_replayed(replayed as u64);
                return ReplayReport::Aborted { replayed };
            }
            match handle
                .replay_notification(notification, config.send_timeout())
                .await
            {
                Ok(PushOutcome::Sent) => replayed += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        connection_id = %handle.id,
                        notification_id = notification.id,
                        error = %e,
                        "Replay send failed, skipping the rest"
                    );
                    NotificationMetrics::record_replayed(replayed as u64);
                    NotificationMetrics::record_replay_failed("send");
                    registry.terminate(&handle, TerminationReason::Errored);
                    return ReplayReport::Aborted { replayed };
                }
            }
        }

        match page.last() {
            Some(last) if page.len() == page_size => cursor = last.id,
            _ => break,
        }
    }
    NotificationMetrics::record_replayed(replayed as u64);

    match handle.finish_replay(config.send_timeout()).await {
        Ok(flushed) => {
            tracing::info!(
                connection_id = %handle.id,
                replayed = replayed,
                flushed = flushed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Replay finished, connection live"
            );
            ReplayReport::Completed { replayed, flushed }
        }
        Err(e) => {
            tracing::warn!(connection_id = %handle.id, error = %e, "Flush after replay failed");
            NotificationMetrics::record_replay_failed("send");
            registry.terminate(&handle, TerminationReason::Errored);
            ReplayReport::Aborted { replayed }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::LiveEvent;
    use crate::storage::{MemoryNotificationStore, NewNotification, NotificationKind};
    use std::time::Duration;

    fn config() -> LiveChannelConfig {
        LiveChannelConfig {
            buffer_size: 16,
            replay_pool_size: 2,
            max_replay: 100,
            send_timeout_ms: 200,
            ..LiveChannelConfig::default()
        }
    }

    fn new_notification(recipient_id: i64) -> NewNotification {
        NewNotification {
            recipient_id,
            kind: NotificationKind::CommentCreated,
            content: "new comment".to_string(),
            redirect_target: None,
        }
    }

    async fn next_event(frames: &mut mpsc::Receiver<ChannelFrame>) -> LiveEvent {
        match tokio::time::timeout(Duration::from_secs(1), frames.recv()).await {
            Ok(Some(ChannelFrame::Event(event))) => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_sends_keepalive_first() {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryNotificationStore::new());
        let service = LiveChannelService::new(registry.clone(), store, config());

        let mut conn = service.connect(7, None).unwrap();
        assert_eq!(next_event(&mut conn.frames).await.name.as_str(), "keepalive");
        assert_eq!(registry.all_for_subscriber(7).len(), 1);
        assert!(!conn.handle.is_replaying());
    }

    #[tokio::test]
    async fn test_reconnect_replays_missed_in_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryNotificationStore::starting_at(10));
        let service = LiveChannelService::new(registry.clone(), store.clone(), config());

        store.insert(new_notification(1)).await.unwrap();
        store.insert(new_notification(1)).await.unwrap();
        store.insert(new_notification(2)).await.unwrap();

        let mut conn = service.connect(1, Some(9)).unwrap();
        assert_eq!(next_event(&mut conn.frames).await.name.as_str(), "keepalive");
        assert_eq!(next_event(&mut conn.frames).await.notification_id(), Some(10));
        assert_eq!(next_event(&mut conn.frames).await.notification_id(), Some(11));

        tokio::time::timeout(Duration::from_secs(1), async {
            while conn.handle.is_replaying() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_replay_pages_past_max_replay() {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryNotificationStore::starting_at(10));
        let config = LiveChannelConfig {
            max_replay: 2,
            ..config()
        };
        let service = LiveChannelService::new(registry.clone(), store.clone(), config);

        for _ in 0..3 {
            store.insert(new_notification(1)).await.unwrap();
        }

        let mut conn = service.connect(1, Some(9)).unwrap();
        let live = store.insert(new_notification(1)).await.unwrap();
        conn.handle.push_notification(&live).unwrap();

        assert_eq!(next_event(&mut conn.frames).await.name.as_str(), "keepalive");
        for expected in [10, 11, 12, 13] {
            assert_eq!(
                next_event(&mut conn.frames).await.notification_id(),
                Some(expected)
            );
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while conn.handle.is_replaying() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(conn.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replay_skipped_when_pool_closed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryNotificationStore::new());
        store.insert(new_notification(1)).await.unwrap();
        let service = LiveChannelService::new(registry, store, config());
        service.shutdown();

        let mut conn = service.connect(1, Some(0)).unwrap();
        assert!(!conn.handle.is_replaying());
        assert_eq!(next_event(&mut conn.frames).await.name.as_str(), "keepalive");
        assert!(conn.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replay_send_failure_drops_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryNotificationStore::new());
        store.insert(new_notification(1)).await.unwrap();
        store.insert(new_notification(1)).await.unwrap();

        let (tx, rx) = mpsc::channel(4);
        let handle = Arc::new(PushHandle::replaying(ConnectionId::new(1), tx));
        registry.register(handle.id, handle.clone()).unwrap();
        drop(rx);

        let report = replay(registry.clone(), store, config(), handle.clone(), 0).await;

        assert_eq!(report, ReplayReport::Aborted { replayed: 0 });
        assert!(handle.is_terminated());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_replay_flushes_buffered_live_pushes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryNotificationStore::new());
        let first = store.insert(new_notification(1)).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let handle = Arc::new(PushHandle::replaying(ConnectionId::new(1), tx));
        registry.register(handle.id, handle.clone()).unwrap();

        // Created and pushed live before the replay query runs
        let second = store.insert(new_notification(1)).await.unwrap();
        handle.push_notification(&second).unwrap();

        let report = replay(registry, store, config(), handle.clone(), 0).await;
        assert_eq!(
            report,
            ReplayReport::Completed {
                replayed: 2,
                flushed: 0
            }
        );

        assert_eq!(next_event(&mut rx).await.notification_id(), Some(first.id));
        assert_eq!(next_event(&mut rx).await.notification_id(), Some(second.id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_rejected_after_registry_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.shutdown();
        let service =
            LiveChannelService::new(registry, Arc::new(MemoryNotificationStore::new()), config());

        assert!(matches!(
            service.connect(1, None),
            Err(RegistryError::ShuttingDown)
        ));
    }
}
