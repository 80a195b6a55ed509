//! Storage traits consumed by the delivery subsystem.
//!
//! Both traits are narrow on purpose: the feed and the live channel only read
//! "items after a position", and the publisher only appends notifications.

use async_trait::async_trait;
use thiserror::Error;

use crate::cursor::CursorKey;

use super::models::{Comment, NewComment, NewNotification, Notification};

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a model
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Backend is temporarily unavailable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Comment feed storage.
///
/// # Ordering
///
/// All reads order by `(created_at, id)`, the same key the cursor encodes.
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Backend name for logs and stats
    fn backend_name(&self) -> &'static str;

    /// Persist a new comment and return it with its assigned id
    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StorageError>;

    /// Comments on `target_id` with key strictly greater than `after`,
    /// ascending, at most `limit` rows. `None` starts from the beginning.
    async fn comments_after(
        &self,
        target_id: i64,
        after: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Comment>, StorageError>;

    /// Comments on `target_id` with key strictly less than `before`,
    /// descending, at most `limit` rows. `None` starts from the newest.
    async fn comments_before(
        &self,
        target_id: i64,
        before: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Comment>, StorageError>;
}

/// Notification storage.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Backend name for logs and stats
    fn backend_name(&self) -> &'static str;

    /// Persist a notification (unread) and return it with its assigned id.
    ///
    /// Ids are strictly increasing in insertion order.
    async fn insert(&self, notification: NewNotification) -> Result<Notification, StorageError>;

    /// Notifications for `recipient_id` with id greater than `last_seen_id`,
    /// ascending by id, at most `limit` rows.
    async fn notifications_after(
        &self,
        recipient_id: i64,
        last_seen_id: i64,
        limit: usize,
    ) -> Result<Vec<Notification>, StorageError>;

    /// Newest-first keyset list: key strictly less than `before`.
    async fn list_notifications(
        &self,
        recipient_id: i64,
        before: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Notification>, StorageError>;

    /// Mark one notification as read. Returns `false` when it does not exist
    /// or belongs to someone else.
    async fn mark_read(&self, recipient_id: i64, notification_id: i64)
        -> Result<bool, StorageError>;
}
