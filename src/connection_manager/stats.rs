//! Registry statistics

use serde::Serialize;

/// Snapshot of the connection registry
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_subscribers: usize,
    pub max_connections_per_subscriber: usize,
}
