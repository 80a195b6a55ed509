use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::LiveChannelConfig;
use crate::connection_manager::{ConnectionRegistry, TerminationReason};
use crate::metrics::{LiveChannelMetrics, SweepMetrics};

/// Removes connections whose connect epoch is older than the stale
/// threshold. Ids with an unreadable epoch are always removed.
pub struct ReaperTask {
    config: LiveChannelConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl ReaperTask {
    pub fn new(
        config: LiveChannelConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.config.reap_interval());

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            reap_interval_secs = self.config.reap_interval_seconds,
            stale_threshold_secs = self.config.stale_threshold_seconds,
            "Reaper task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Reaper task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep();
                }
            }
        }

        tracing::info!("Reaper task stopped");
    }

    /// One pass over the registry. Returns the number of connections removed.
    pub fn sweep(&self) -> usize {
        let stale = self
            .registry
            .find_stale_connections(self.config.stale_threshold());

        let removed = stale
            .iter()
            .filter(|handle| self.registry.terminate(handle, TerminationReason::Reaped))
            .count();

        if removed > 0 {
            SweepMetrics::record_reaped(removed as u64);
            LiveChannelMetrics::update_gauges(&self.registry.stats());
            tracing::info!(
                removed = removed,
                stale_threshold_secs = self.config.stale_threshold_seconds,
                "Reaped stale connections"
            );
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::{ConnectionId, PushHandle};
    use crate::sse::ChannelFrame;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> LiveChannelConfig {
        LiveChannelConfig {
            reap_interval_seconds: 1,
            stale_threshold_seconds: 60,
            ..LiveChannelConfig::default()
        }
    }

    fn register_with_epoch(
        registry: &ConnectionRegistry,
        epoch_millis: i64,
    ) -> (Arc<PushHandle>, mpsc::Receiver<ChannelFrame>) {
        let (tx, rx) = mpsc::channel(4);
        let handle = Arc::new(PushHandle::new(ConnectionId::with_epoch(1, epoch_millis), tx));
        registry.register(handle.id, handle.clone()).unwrap();
        (handle, rx)
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_and_malformed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_tx, shutdown_rx) = broadcast::channel(1);
        let now = Utc::now().timestamp_millis();

        let (old, mut old_rx) = register_with_epoch(&registry, now - 120_000);
        let (malformed, _malformed_rx) = register_with_epoch(&registry, i64::MAX);
        let (fresh, _fresh_rx) = register_with_epoch(&registry, now - 1_000);

        let reaper = ReaperTask::new(config(), registry.clone(), shutdown_rx);
        assert_eq!(reaper.sweep(), 2);

        assert!(registry.get(&old.id).is_none());
        assert!(registry.get(&malformed.id).is_none());
        assert!(registry.get(&fresh.id).is_some());
        assert_eq!(old_rx.try_recv().unwrap(), ChannelFrame::Complete);

        // Nothing left to reap
        assert_eq!(reaper.sweep(), 0);
    }

    #[tokio::test]
    async fn test_reaper_runs_on_interval_and_stops() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (_old, _rx) = register_with_epoch(&registry, Utc::now().timestamp_millis() - 120_000);

        let task = tokio::spawn(ReaperTask::new(config(), registry.clone(), shutdown_rx).run());

        tokio::time::timeout(Duration::from_secs(3), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("stale connection should be reaped");

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }
}
