//! Producer endpoints, mounted under `/internal/v1` behind the API key.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::connection_manager::{ConnectionId, ParseConnectionIdError, TerminationReason};
use crate::error::AppError;
use crate::metrics::LiveChannelMetrics;
use crate::notification::{NotificationRequest, PublishResult};
use crate::server::AppState;
use crate::storage::{Comment, NewComment};

/// Longest comment body accepted from producers
const MAX_COMMENT_LENGTH: usize = 10_000;

/// POST /internal/v1/notifications
#[tracing::instrument(
    name = "api.publish",
    skip(state, request),
    fields(recipients = request.recipients.len(), kind = %request.kind)
)]
pub async fn publish_notification(
    State(state): State<AppState>,
    Json(request): Json<NotificationRequest>,
) -> Result<Json<PublishResult>, AppError> {
    request.validate()?;
    let result = state.publisher.publish(request).await?;
    Ok(Json(result))
}

/// POST /internal/v1/comments
pub async fn create_comment(
    State(state): State<AppState>,
    Json(comment): Json<NewComment>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    if comment.content.trim().is_empty() {
        return Err(AppError::Validation("content must not be empty".into()));
    }
    if comment.content.len() > MAX_COMMENT_LENGTH {
        return Err(AppError::Validation(format!(
            "content exceeds {} bytes",
            MAX_COMMENT_LENGTH
        )));
    }

    let created = state.stores.comments.insert_comment(comment).await?;
    tracing::debug!(
        comment_id = created.id,
        target_id = created.target_id,
        "Comment created"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// DELETE /internal/v1/connections/{connection_id}
pub async fn close_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id: ConnectionId = connection_id
        .parse()
        .map_err(|e: ParseConnectionIdError| AppError::Validation(e.to_string()))?;

    let handle = state
        .registry
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Connection {} not found", id)))?;

    if state.registry.terminate(&handle, TerminationReason::Evicted) {
        LiveChannelMetrics::record_terminated(TerminationReason::Evicted);
        tracing::info!(connection_id = %id, "Connection evicted by producer");
    }

    Ok(StatusCode::NO_CONTENT)
}
