use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::broadcast;

use crate::config::LiveChannelConfig;
use crate::connection_manager::{ConnectionRegistry, TerminationReason};
use crate::metrics::{LiveChannelMetrics, SweepMetrics};

/// Maximum concurrent keepalive sends per batch
const MAX_CONCURRENT_PINGS: usize = 1000;

/// Outcome of one health-check round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCheckReport {
    pub checked: usize,
    pub failed: usize,
}

impl HealthCheckReport {
    pub fn all_healthy(&self) -> bool {
        self.failed == 0
    }
}

/// Periodically sends a keepalive on every live connection and drops the
/// ones that cannot take it (half-open sockets, stuck clients).
pub struct HealthCheckTask {
    config: LiveChannelConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HealthCheckTask {
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
        let mut timer = tokio::time::interval(self.config.health_check_interval());

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.health_check_interval_seconds,
            send_timeout_ms = self.config.send_timeout_ms,
            "Health check task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Health check task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.check().await;
                }
            }
        }

        tracing::info!("Health check task stopped");
    }

    /// Ping every registered handle in bounded parallel batches
    pub async fn check(&self) -> HealthCheckReport {
        let handles = self.registry.all_connections();
        if handles.is_empty() {
            return HealthCheckReport::default();
        }

        let start = Instant::now();
        let send_timeout = self.config.send_timeout();
        let failed = Arc::new(AtomicUsize::new(0));

        for batch in handles.chunks(MAX_CONCURRENT_PINGS) {
            let pings: Vec<_> = batch
                .iter()
                .map(|handle| {
                    let failed = failed.clone();
                    let registry = self.registry.clone();
                    let handle = handle.clone();

                    async move {
                        if let Err(e) = handle.keepalive_within(send_timeout).await {
                            failed.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(
                                connection_id = %handle.id,
                                error = %e,
                                "Keepalive failed, dropping connection"
                            );
                            if registry.terminate(&handle, TerminationReason::Errored) {
                                LiveChannelMetrics::record_terminated(TerminationReason::Errored);
                            }
                        }
                    }
                })
                .collect();

            join_all(pings).await;
        }

        let elapsed = start.elapsed();
        let report = HealthCheckReport {
            checked: handles.len(),
            failed: failed.load(Ordering::Relaxed),
        };

        SweepMetrics::record_health_check(elapsed, report.failed as u64);
        LiveChannelMetrics::update_gauges(&self.registry.stats());

        tracing::debug!(
            checked = report.checked,
            failed = report.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Health check round completed"
        );

        if elapsed > self.config.health_check_interval() / 2 {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = self.config.health_check_interval().as_millis() as u64,
                connections = report.checked,
                "Health check round took more than 50% of interval"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::{ConnectionId, PushHandle};
    use crate::sse::ChannelFrame;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> LiveChannelConfig {
        LiveChannelConfig {
            health_check_interval_seconds: 1,
            send_timeout_ms: 50,
            ..LiveChannelConfig::default()
        }
    }

    fn register(
        registry: &ConnectionRegistry,
        capacity: usize,
    ) -> (Arc<PushHandle>, mpsc::Receiver<ChannelFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Arc::new(PushHandle::new(ConnectionId::new(1), tx));
        registry.register(handle.id, handle.clone()).unwrap();
        (handle, rx)
    }

    #[tokio::test]
    async fn test_health_check_task_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = HealthCheckTask::new(config(), registry, shutdown_rx);
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_health_check_sends_keepalive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (_handle, mut rx) = register(&registry, 4);

        let task = HealthCheckTask::new(config(), registry, shutdown_rx);
        let task_handle = tokio::spawn(task.run());

        let frame = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("Should receive keepalive")
            .expect("Channel should not be closed");
        assert!(matches!(frame, ChannelFrame::Event(ref e) if e.name.as_str() == "keepalive"));

        shutdown_tx.send(()).unwrap();
        let _ = task_handle.await;
    }

    #[tokio::test]
    async fn test_health_check_drops_dead_and_stuck_connections() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let (dead, dead_rx) = register(&registry, 4);
        drop(dead_rx);
        let (stuck, _stuck_rx) = register(&registry, 1);
        stuck.keepalive().unwrap();
        let (healthy, _healthy_rx) = register(&registry, 4);

        let task = HealthCheckTask::new(config(), registry.clone(), shutdown_rx);
        let report = task.check().await;

        assert_eq!(report, HealthCheckReport { checked: 3, failed: 2 });
        assert!(!report.all_healthy());
        assert!(registry.get(&dead.id).is_none());
        assert!(registry.get(&stuck.id).is_none());
        assert!(registry.get(&healthy.id).is_some());
    }
}
