//! Read-model projections served by the feed and the live channel.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::{CursorKey, Keyed};

/// Current time truncated to milliseconds.
///
/// Cursors carry millisecond timestamps, so stored `created_at` values must
/// not be finer than that or an item would compare greater than its own cursor.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub target_id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Comment {
    fn cursor_key(&self) -> CursorKey {
        CursorKey::new(self.created_at, self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub target_id: i64,
    pub author_id: i64,
    pub content: String,
}

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    CommentCreated,
    CommentReplied,
    VoteStatusChanged,
    GroupInvited,
    GroupDeleted,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommentCreated => "COMMENT_CREATED",
            Self::CommentReplied => "COMMENT_REPLIED",
            Self::VoteStatusChanged => "VOTE_STATUS_CHANGED",
            Self::GroupInvited => "GROUP_INVITED",
            Self::GroupDeleted => "GROUP_DELETED",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMMENT_CREATED" => Ok(Self::CommentCreated),
            "COMMENT_REPLIED" => Ok(Self::CommentReplied),
            "VOTE_STATUS_CHANGED" => Ok(Self::VoteStatusChanged),
            "GROUP_INVITED" => Ok(Self::GroupInvited),
            "GROUP_DELETED" => Ok(Self::GroupDeleted),
            "SYSTEM" => Ok(Self::System),
            other => Err(format!("unknown notification kind: {}", other)),
        }
    }
}

/// A persisted notification; the same shape is used for list items and
/// live-channel payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i64,
    pub kind: NotificationKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Notification {
    fn cursor_key(&self) -> CursorKey {
        CursorKey::new(self.created_at, self.id)
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub kind: NotificationKind,
    pub content: String,
    pub redirect_target: Option<String>,
}
