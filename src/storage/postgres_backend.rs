//! PostgreSQL storage backends.
//!
//! Tables:
//! - `comments` - feed items, keyset-indexed on `(target_id, created_at, id)`
//! - `notifications` - per-recipient rows, indexed on `(recipient_id, id)`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::cursor::CursorKey;

use super::backend::{CommentStore, NotificationStore, StorageError};
use super::models::{now_millis, Comment, NewComment, NewNotification, Notification};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS comments (
    id          BIGSERIAL PRIMARY KEY,
    target_id   BIGINT      NOT NULL,
    author_id   BIGINT      NOT NULL,
    content     TEXT        NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_keyset ON comments (target_id, created_at, id);

CREATE TABLE IF NOT EXISTS notifications (
    id              BIGSERIAL PRIMARY KEY,
    recipient_id    BIGINT      NOT NULL,
    kind            TEXT        NOT NULL,
    content         TEXT        NOT NULL,
    redirect_target TEXT,
    is_read         BOOLEAN     NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications (recipient_id, id);
CREATE INDEX IF NOT EXISTS idx_notifications_keyset ON notifications (recipient_id, created_at, id);
"#;

/// Connect a pool and make sure the tables exist.
pub async fn connect(config: &DatabaseConfig, url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .connect(url)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;

    tracing::info!(pool_size = config.pool_size, "PostgreSQL connection pool created");

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    target_id: i64,
    author_id: i64,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            target_id: row.target_id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    recipient_id: i64,
    kind: String,
    content: String,
    redirect_target: Option<String>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StorageError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            recipient_id: row.recipient_id,
            kind: row.kind.parse().map_err(StorageError::Corrupt)?,
            content: row.content,
            redirect_target: row.redirect_target,
            is_read: row.is_read,
            created_at: row.created_at,
        })
    }
}

fn into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>, StorageError> {
    rows.into_iter().map(Notification::try_from).collect()
}

pub struct PostgresCommentStore {
    pool: PgPool,
}

impl PostgresCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommentStore for PostgresCommentStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StorageError> {
        let row: CommentRow = sqlx::query_as(
            r#"
            INSERT INTO comments (target_id, author_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, target_id, author_id, content, created_at
            "#,
        )
        .bind(comment.target_id)
        .bind(comment.author_id)
        .bind(&comment.content)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn comments_after(
        &self,
        target_id: i64,
        after: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Comment>, StorageError> {
        let rows: Vec<CommentRow> = match after {
            Some(key) => {
                sqlx::query_as(
                    r#"
                    SELECT id, target_id, author_id, content, created_at
                    FROM comments
                    WHERE target_id = $1 AND (created_at, id) > ($2, $3)
                    ORDER BY created_at ASC, id ASC
                    LIMIT $4
                    "#,
                )
                .bind(target_id)
                .bind(key.timestamp)
                .bind(key.id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, target_id, author_id, content, created_at
                    FROM comments
                    WHERE target_id = $1
                    ORDER BY created_at ASC, id ASC
                    LIMIT $2
                    "#,
                )
                .bind(target_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Comment::from).collect())
    }

    async fn comments_before(
        &self,
        target_id: i64,
        before: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Comment>, StorageError> {
        let rows: Vec<CommentRow> = match before {
            Some(key) => {
                sqlx::query_as(
                    r#"
                    SELECT id, target_id, author_id, content, created_at
                    FROM comments
                    WHERE target_id = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#,
                )
                .bind(target_id)
                .bind(key.timestamp)
                .bind(key.id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, target_id, author_id, content, created_at
                    FROM comments
                    WHERE target_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(target_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Comment::from).collect())
    }
}

pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, notification: NewNotification) -> Result<Notification, StorageError> {
        let row: NotificationRow = sqlx::query_as(
            r#"
            INSERT INTO notifications (recipient_id, kind, content, redirect_target, is_read, created_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            RETURNING id, recipient_id, kind, content, redirect_target, is_read, created_at
            "#,
        )
        .bind(notification.recipient_id)
        .bind(notification.kind.as_str())
        .bind(&notification.content)
        .bind(&notification.redirect_target)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn notifications_after(
        &self,
        recipient_id: i64,
        last_seen_id: i64,
        limit: usize,
    ) -> Result<Vec<Notification>, StorageError> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, recipient_id, kind, content, redirect_target, is_read, created_at
            FROM notifications
            WHERE recipient_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(recipient_id)
        .bind(last_seen_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        into_notifications(rows)
    }

    async fn list_notifications(
        &self,
        recipient_id: i64,
        before: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Notification>, StorageError> {
        let rows: Vec<NotificationRow> = match before {
            Some(key) => {
                sqlx::query_as(
                    r#"
                    SELECT id, recipient_id, kind, content, redirect_target, is_read, created_at
                    FROM notifications
                    WHERE recipient_id = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#,
                )
                .bind(recipient_id)
                .bind(key.timestamp)
                .bind(key.id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT id, recipient_id, kind, content, redirect_target, is_read, created_at
                    FROM notifications
                    WHERE recipient_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#,
                )
                .bind(recipient_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        into_notifications(rows)
    }

    async fn mark_read(
        &self,
        recipient_id: i64,
        notification_id: i64,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND recipient_id = $2",
        )
        .bind(notification_id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
