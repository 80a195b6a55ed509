//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::{ConnectionStats, PushOutcome, TerminationReason};

use super::{
    HEALTH_CHECK_DURATION_MS, HEALTH_CHECK_FAILURES_TOTAL, LIVE_CONNECTIONS,
    LIVE_CONNECTIONS_CLOSED, LIVE_CONNECTIONS_OPENED, LIVE_CONNECTIONS_TERMINATED,
    LIVE_CONNECTION_DURATION, LIVE_SUBSCRIBERS, NOTIFICATIONS_DELIVERED_TOTAL,
    NOTIFICATIONS_FAILED_TOTAL, NOTIFICATIONS_PUBLISHED_TOTAL, NOTIFICATIONS_REPLAYED_TOTAL,
    POLL_DURATION, POLL_OUTCOMES_TOTAL, REAPED_TOTAL, REPLAY_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Long-poll metrics
pub struct PollMetrics;

impl PollMetrics {
    pub fn record(outcome: &str, elapsed: Duration) {
        POLL_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
        POLL_DURATION
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }
}

/// Live channel lifecycle metrics
pub struct LiveChannelMetrics;

impl LiveChannelMetrics {
    pub fn record_opened() {
        LIVE_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(duration: Duration) {
        LIVE_CONNECTIONS_CLOSED.inc();
        LIVE_CONNECTION_DURATION.observe(duration.as_secs_f64());
    }

    pub fn record_terminated(reason: TerminationReason) {
        LIVE_CONNECTIONS_TERMINATED
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Refresh the gauges from a registry snapshot
    pub fn update_gauges(stats: &ConnectionStats) {
        LIVE_CONNECTIONS.set(stats.total_connections as i64);
        LIVE_SUBSCRIBERS.set(stats.unique_subscribers as i64);
    }
}

/// Notification publish and replay metrics
pub struct NotificationMetrics;

impl NotificationMetrics {
    pub fn record_published(count: u64) {
        NOTIFICATIONS_PUBLISHED_TOTAL.inc_by(count);
    }

    pub fn record_pushed(outcome: PushOutcome) {
        let label = match outcome {
            PushOutcome::Sent => "sent",
            PushOutcome::Buffered => "buffered",
            PushOutcome::Skipped => "skipped",
        };
        NOTIFICATIONS_DELIVERED_TOTAL.with_label_values(&[label]).inc();
    }

    pub fn record_failed(count: u64) {
        NOTIFICATIONS_FAILED_TOTAL.inc_by(count);
    }

    pub fn record_replayed(count: u64) {
        NOTIFICATIONS_REPLAYED_TOTAL.inc_by(count);
    }

    /// `reason` is one of `pool_exhausted`, `storage`, `send`
    pub fn record_replay_failed(reason: &str) {
        REPLAY_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Reaper and health-check metrics
pub struct SweepMetrics;

impl SweepMetrics {
    pub fn record_reaped(count: u64) {
        REAPED_TOTAL.inc_by(count);
        LIVE_CONNECTIONS_TERMINATED
            .with_label_values(&[TerminationReason::Reaped.as_str()])
            .inc_by(count);
    }

    pub fn record_health_check(duration: Duration, failures: u64) {
        HEALTH_CHECK_DURATION_MS.observe(duration.as_millis() as f64);
        HEALTH_CHECK_FAILURES_TOTAL.inc_by(failures);
    }
}
