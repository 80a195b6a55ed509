//! Comment feed endpoints: keyset list and long poll.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::cursor::{CursorPage, Direction};
use crate::error::AppError;
use crate::polling::{PollError, PollOutcome, PollRequest};
use crate::server::{AppState, AuthenticatedSubscriber};
use crate::storage::Comment;

use super::PageQuery;

/// GET /api/v1/targets/{target_id}/comments
pub async fn list_comments(
    State(state): State<AppState>,
    _subscriber: AuthenticatedSubscriber,
    Path(target_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<CursorPage<Comment>>, AppError> {
    let cursor = query.cursor_key()?;
    let limit = query.page_size()?;

    let rows = match query.direction {
        Direction::Asc => {
            state
                .stores
                .comments
                .comments_after(target_id, cursor, limit + 1)
                .await?
        }
        Direction::Desc => {
            state
                .stores
                .comments
                .comments_before(target_id, cursor, limit + 1)
                .await?
        }
    };

    Ok(Json(CursorPage::from_overfetch(rows, limit, cursor)))
}

/// GET /api/v1/targets/{target_id}/comments/poll
///
/// Holds the request until new comments arrive after `cursor` or the poll
/// times out. A timeout is a normal 200 with no items and the cursor echoed
/// back.
pub async fn poll_comments(
    State(state): State<AppState>,
    AuthenticatedSubscriber(subscriber_id): AuthenticatedSubscriber,
    Path(target_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<CursorPage<Comment>>, AppError> {
    let cursor = query.cursor_key()?;
    if query.limit == Some(0) {
        return Err(AppError::Validation("limit must be at least 1".into()));
    }

    let outcome = state
        .poll_engine
        .poll(PollRequest {
            subscriber_id,
            target_id,
            cursor,
            limit: query.limit,
        })
        .await;

    match outcome {
        PollOutcome::ItemsFound(page)
        | PollOutcome::TimedOut(page)
        | PollOutcome::Interrupted(page) => Ok(Json(page)),
        PollOutcome::PoolExhausted => Err(AppError::ResourceExhausted {
            message: "Too many concurrent polls".into(),
            retry_after: state.settings.polling.retry_after_seconds,
        }),
        PollOutcome::Failed(PollError::Storage(e)) => Err(AppError::Storage(e)),
        PollOutcome::Failed(e) => Err(AppError::Internal(e.to_string())),
    }
}
