//! Notification inbox endpoints for the authenticated subscriber.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

use crate::cursor::CursorPage;
use crate::error::AppError;
use crate::server::{AppState, AuthenticatedSubscriber};
use crate::storage::Notification;

use super::PageQuery;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub id: i64,
    pub is_read: bool,
}

/// GET /api/v1/notifications - newest first
pub async fn list_notifications(
    State(state): State<AppState>,
    AuthenticatedSubscriber(subscriber_id): AuthenticatedSubscriber,
    Query(query): Query<PageQuery>,
) -> Result<Json<CursorPage<Notification>>, AppError> {
    let cursor = query.cursor_key()?;
    let limit = query.page_size()?;

    let rows = state
        .stores
        .notifications
        .list_notifications(subscriber_id, cursor, limit + 1)
        .await?;

    Ok(Json(CursorPage::from_overfetch(rows, limit, cursor)))
}

/// POST /api/v1/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    AuthenticatedSubscriber(subscriber_id): AuthenticatedSubscriber,
    Path(notification_id): Path<i64>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let updated = state
        .stores
        .notifications
        .mark_read(subscriber_id, notification_id)
        .await?;

    if !updated {
        return Err(AppError::NotFound(format!(
            "Notification {} not found",
            notification_id
        )));
    }

    tracing::debug!(subscriber_id, notification_id, "Notification marked read");
    Ok(Json(MarkReadResponse {
        id: notification_id,
        is_read: true,
    }))
}
