//! Graceful shutdown handling for the delivery service.
//!
//! Order matters: background sweeps stop first, then in-flight long polls are
//! interrupted, then every live stream is completed so the HTTP server can
//! drain its open responses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::connection_manager::ConnectionRegistry;
use crate::polling::LongPollEngine;
use crate::sse::LiveChannelService;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for interrupted polls to hand back their workers
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Live connections completed by the registry
    pub connections_closed: usize,
    /// Whether every poll worker finished within the drain timeout
    pub polls_drained: bool,
    pub duration: Duration,
}

/// Coordinates shutdown of the delivery subsystem
pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    poll_engine: Arc<LongPollEngine>,
    live_channel: Arc<LiveChannelService>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        poll_engine: Arc<LongPollEngine>,
        live_channel: Arc<LiveChannelService>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self::with_config(
            registry,
            poll_engine,
            live_channel,
            shutdown_tx,
            ShutdownConfig::default(),
        )
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        poll_engine: Arc<LongPollEngine>,
        live_channel: Arc<LiveChannelService>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            poll_engine,
            live_channel,
            shutdown_tx,
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(
            live_connections = self.registry.len(),
            polls_in_flight = self.poll_engine.in_flight()
        )
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Interrupting long polls and replays");
        self.poll_engine.shutdown();
        self.live_channel.shutdown();

        tracing::info!("Phase 3: Closing live connections");
        result.connections_closed = self.registry.shutdown();

        tracing::info!("Phase 4: Waiting for poll workers");
        result.polls_drained = self.wait_for_polls().await;

        result.duration = start.elapsed();

        tracing::info!(
            connections_closed = result.connections_closed,
            polls_drained = result.polls_drained,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    async fn wait_for_polls(&self) -> bool {
        let drain = async {
            while self.poll_engine.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        match timeout(self.config.drain_timeout, drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.poll_engine.in_flight(),
                    "Poll workers did not finish before the drain timeout"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LiveChannelConfig, PollingConfig};
    use crate::polling::{PollOutcome, PollRequest};
    use crate::sse::ChannelFrame;
    use crate::storage::Stores;

    fn components() -> (
        Arc<ConnectionRegistry>,
        Arc<LongPollEngine>,
        Arc<LiveChannelService>,
    ) {
        let stores = Stores::in_memory();
        let registry = Arc::new(ConnectionRegistry::new());
        let engine = Arc::new(LongPollEngine::new(
            stores.comments.clone(),
            PollingConfig::default(),
        ));
        let live = Arc::new(LiveChannelService::new(
            registry.clone(),
            stores.notifications,
            LiveChannelConfig::default(),
        ));
        (registry, engine, live)
    }

    #[tokio::test]
    async fn test_shutdown_no_connections() {
        let (registry, engine, live) = components();
        let (tx, _) = broadcast::channel(1);
        let shutdown = GracefulShutdown::new(registry, engine, live, tx);

        let result = shutdown.execute("test shutdown").await;

        assert_eq!(result.connections_closed, 0);
        assert!(result.polls_drained);
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams_and_interrupts_polls() {
        let (registry, engine, live) = components();
        let (tx, mut task_rx) = broadcast::channel(1);

        let mut conn = live.connect(1, None).unwrap();
        let polling = engine.clone();
        let pending = tokio::spawn(async move {
            polling
                .poll(PollRequest {
                    subscriber_id: 1,
                    target_id: 1,
                    cursor: None,
                    limit: None,
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let shutdown = GracefulShutdown::new(registry.clone(), engine.clone(), live, tx);
        let result = shutdown.execute("test shutdown").await;

        assert_eq!(result.connections_closed, 1);
        assert!(result.polls_drained);
        assert!(registry.is_empty());
        assert!(task_rx.try_recv().is_ok());
        assert!(matches!(pending.await.unwrap(), PollOutcome::Interrupted(_)));

        // keepalive from connect, then the close frame
        assert!(matches!(conn.frames.recv().await, Some(ChannelFrame::Event(_))));
        assert_eq!(conn.frames.recv().await, Some(ChannelFrame::Complete));
    }

    #[test]
    fn test_shutdown_config_defaults() {
        assert_eq!(ShutdownConfig::default().drain_timeout, Duration::from_secs(10));
    }
}
