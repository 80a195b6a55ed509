//! In-memory storage backends.
//!
//! Used when no database is configured and throughout the tests. Data is lost
//! on restart.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::cursor::{CursorKey, Keyed};

use super::backend::{CommentStore, NotificationStore, StorageError};
use super::models::{now_millis, Comment, NewComment, NewNotification, Notification};

/// Comments keyed by `(target_id, created_at, id)` so keyset reads are range scans.
pub struct MemoryCommentStore {
    comments: RwLock<BTreeMap<(i64, CursorKey), Comment>>,
    next_id: AtomicI64,
}

impl MemoryCommentStore {
    pub fn new() -> Self {
        Self {
            comments: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Insert with an explicit timestamp (seeding and tests)
    pub async fn insert_at(&self, comment: NewComment, created_at: DateTime<Utc>) -> Comment {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = Comment {
            id,
            target_id: comment.target_id,
            author_id: comment.author_id,
            content: comment.content,
            created_at,
        };
        self.comments
            .write()
            .await
            .insert((stored.target_id, stored.cursor_key()), stored.clone());
        stored
    }

    pub async fn len(&self) -> usize {
        self.comments.read().await.len()
    }
}

impl Default for MemoryCommentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn target_lower(target_id: i64) -> (i64, CursorKey) {
    (target_id, CursorKey::new(DateTime::<Utc>::MIN_UTC, i64::MIN))
}

fn target_upper(target_id: i64) -> (i64, CursorKey) {
    (target_id, CursorKey::new(DateTime::<Utc>::MAX_UTC, i64::MAX))
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StorageError> {
        Ok(self.insert_at(comment, now_millis()).await)
    }

    async fn comments_after(
        &self,
        target_id: i64,
        after: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Comment>, StorageError> {
        let lower = match after {
            Some(key) => Bound::Excluded((target_id, key)),
            None => Bound::Included(target_lower(target_id)),
        };
        let upper = Bound::Included(target_upper(target_id));

        let comments = self.comments.read().await;
        Ok(comments
            .range((lower, upper))
            .take(limit)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn comments_before(
        &self,
        target_id: i64,
        before: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Comment>, StorageError> {
        let lower = Bound::Included(target_lower(target_id));
        let upper = match before {
            Some(key) => Bound::Excluded((target_id, key)),
            None => Bound::Included(target_upper(target_id)),
        };

        let comments = self.comments.read().await;
        Ok(comments
            .range((lower, upper))
            .rev()
            .take(limit)
            .map(|(_, c)| c.clone())
            .collect())
    }
}

/// Notifications keyed by `(recipient_id, id)`.
pub struct MemoryNotificationStore {
    notifications: RwLock<BTreeMap<(i64, i64), Notification>>,
    next_id: AtomicI64,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            notifications: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Start id assignment at `next_id` (tests that need specific ids)
    pub fn starting_at(next_id: i64) -> Self {
        Self {
            notifications: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(next_id),
        }
    }

    pub async fn len(&self) -> usize {
        self.notifications.read().await.len()
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, notification: NewNotification) -> Result<Notification, StorageError> {
        // Id assignment and insertion happen under the write lock so readers
        // never observe id N+1 without id N.
        let mut notifications = self.notifications.write().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = Notification {
            id,
            recipient_id: notification.recipient_id,
            kind: notification.kind,
            content: notification.content,
            redirect_target: notification.redirect_target,
            is_read: false,
            created_at: now_millis(),
        };
        notifications.insert((stored.recipient_id, id), stored.clone());
        Ok(stored)
    }

    async fn notifications_after(
        &self,
        recipient_id: i64,
        last_seen_id: i64,
        limit: usize,
    ) -> Result<Vec<Notification>, StorageError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .range((
                Bound::Excluded((recipient_id, last_seen_id)),
                Bound::Included((recipient_id, i64::MAX)),
            ))
            .take(limit)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn list_notifications(
        &self,
        recipient_id: i64,
        before: Option<CursorKey>,
        limit: usize,
    ) -> Result<Vec<Notification>, StorageError> {
        let notifications = self.notifications.read().await;
        let mut items: Vec<Notification> = notifications
            .range((recipient_id, i64::MIN)..=(recipient_id, i64::MAX))
            .map(|(_, n)| n)
            .filter(|n| before.map_or(true, |key| n.cursor_key() < key))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.cursor_key().cmp(&a.cursor_key()));
        items.truncate(limit);
        Ok(items)
    }

    async fn mark_read(
        &self,
        recipient_id: i64,
        notification_id: i64,
    ) -> Result<bool, StorageError> {
        let mut notifications = self.notifications.write().await;
        match notifications.get_mut(&(recipient_id, notification_id)) {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
