//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionStats;
use crate::notification::PublisherStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub storage: StorageHealthResponse,
    pub connections: ConnectionHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct StorageHealthResponse {
    pub comments: String,
    pub notifications: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub total: usize,
    pub unique_subscribers: usize,
    pub accepting: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub polling: PollingStats,
    pub notifications: PublisherStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct PollingStats {
    pub in_flight: usize,
    pub worker_pool_size: usize,
    pub timeout_ms: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let conn_stats = state.registry.stats();
    let accepting = state.registry.is_accepting();

    let status = if accepting { "healthy" } else { "shutting_down" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        storage: StorageHealthResponse {
            comments: state.stores.comments.backend_name().to_string(),
            notifications: state.stores.notifications.backend_name().to_string(),
        },
        connections: ConnectionHealthResponse {
            total: conn_stats.total_connections,
            unique_subscribers: conn_stats.unique_subscribers,
            accepting,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let polling = state.poll_engine.config();

    Json(StatsResponse {
        connections: state.registry.stats(),
        polling: PollingStats {
            in_flight: state.poll_engine.in_flight(),
            worker_pool_size: polling.worker_pool_size,
            timeout_ms: polling.timeout_ms,
        },
        notifications: state.publisher.stats(),
    })
}
