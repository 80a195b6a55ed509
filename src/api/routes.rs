use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::server::AppState;
use crate::sse::notification_stream;

use super::comments::{list_comments, poll_comments};
use super::health::{health, stats};
use super::internal::{close_connection, create_comment, publish_notification};
use super::metrics::prometheus_metrics;
use super::notifications::{list_notifications, mark_read};

/// Public routes. Subscriber endpoints authenticate per handler.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Comment feed
                .route("/targets/{target_id}/comments", get(list_comments))
                .route("/targets/{target_id}/comments/poll", get(poll_comments))
                // Notifications
                .route("/notifications", get(list_notifications))
                .route("/notifications/stream", get(notification_stream))
                .route("/notifications/{id}/read", post(mark_read)),
        )
}

/// Producer routes, nested under `/internal/v1` behind the API key
pub fn internal_routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(publish_notification))
        .route("/comments", post(create_comment))
        .route("/connections/{connection_id}", delete(close_connection))
}
