//! Prometheus metrics for the delivery service.
//!
//! - Live channel metrics (open connections, subscribers, lifecycle)
//! - Long-poll metrics (outcomes, duration)
//! - Notification metrics (published, delivered, failed, replayed)
//! - Background sweep metrics (reaper, health check)

mod helpers;

pub use helpers::{encode_metrics, LiveChannelMetrics, NotificationMetrics, PollMetrics, SweepMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara";

lazy_static! {
    // ============================================================================
    // Live Channel Metrics
    // ============================================================================

    /// Currently registered live connections
    pub static ref LIVE_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_live_connections", METRIC_PREFIX),
        "Number of registered live notification connections"
    ).unwrap();

    /// Subscribers with at least one live connection
    pub static ref LIVE_SUBSCRIBERS: IntGauge = register_int_gauge!(
        format!("{}_live_subscribers", METRIC_PREFIX),
        "Number of subscribers with at least one live connection"
    ).unwrap();

    pub static ref LIVE_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_live_connections_opened_total", METRIC_PREFIX),
        "Total live connections opened"
    ).unwrap();

    pub static ref LIVE_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_live_connections_closed_total", METRIC_PREFIX),
        "Total live connections closed"
    ).unwrap();

    /// Terminal transitions by reason
    pub static ref LIVE_CONNECTIONS_TERMINATED: IntCounterVec = register_int_counter_vec!(
        format!("{}_live_connections_terminated_total", METRIC_PREFIX),
        "Total live connections terminated by the server",
        &["reason"]
    ).unwrap();

    pub static ref LIVE_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_live_connection_duration_seconds", METRIC_PREFIX),
        "Live connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Long-Poll Metrics
    // ============================================================================

    /// Poll terminal states
    pub static ref POLL_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_poll_outcomes_total", METRIC_PREFIX),
        "Total long polls by terminal outcome",
        &["outcome"]
    ).unwrap();

    pub static ref POLL_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_poll_duration_seconds", METRIC_PREFIX),
        "Long poll duration in seconds",
        &["outcome"],
        vec![0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]
    ).unwrap();

    // ============================================================================
    // Notification Metrics
    // ============================================================================

    /// Notifications persisted by the publisher
    pub static ref NOTIFICATIONS_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_published_total", METRIC_PREFIX),
        "Total notifications persisted by the publisher"
    ).unwrap();

    /// Live pushes accepted by a handle, by outcome (sent, buffered, skipped)
    pub static ref NOTIFICATIONS_DELIVERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_delivered_total", METRIC_PREFIX),
        "Total live notification pushes accepted by a connection",
        &["outcome"]
    ).unwrap();

    /// Live pushes that failed and dropped the connection
    pub static ref NOTIFICATIONS_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_failed_total", METRIC_PREFIX),
        "Total live notification pushes that failed"
    ).unwrap();

    /// Notifications sent during reconnect replay
    pub static ref NOTIFICATIONS_REPLAYED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_replayed_total", METRIC_PREFIX),
        "Total notifications replayed on reconnect"
    ).unwrap();

    /// Replays that were cut short, by reason
    pub static ref REPLAY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_replay_failures_total", METRIC_PREFIX),
        "Total replays abandoned",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Sweep Metrics
    // ============================================================================

    pub static ref REAPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reaped_connections_total", METRIC_PREFIX),
        "Total stale connections removed by the reaper"
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_health_check_failures_total", METRIC_PREFIX),
        "Total connections dropped by the health check"
    ).unwrap();

    /// Health check round duration in milliseconds
    pub static ref HEALTH_CHECK_DURATION_MS: Histogram = register_histogram!(
        format!("{}_health_check_duration_ms", METRIC_PREFIX),
        "Health check round duration in milliseconds",
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // lazy_static registers on first access
        LIVE_CONNECTIONS.set(1);

        let output = encode_metrics().unwrap();
        assert!(output.contains("ara_live_connections"));
    }

    #[test]
    fn test_poll_outcome_labels() {
        POLL_OUTCOMES_TOTAL.with_label_values(&["timed_out"]).inc();
        assert!(POLL_OUTCOMES_TOTAL.with_label_values(&["timed_out"]).get() >= 1);
    }
}
