use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::{NewNotification, NotificationKind};

/// Upper bound on recipients in one publish call
pub const MAX_RECIPIENTS: usize = 1000;

/// A notification-worthy event, addressed to one or more subscribers
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub recipients: Vec<i64>,
    pub kind: NotificationKind,
    pub content: String,
    #[serde(default)]
    pub redirect_target: Option<String>,
}

impl NotificationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.recipients.is_empty() {
            return Err(AppError::Validation("recipients must not be empty".into()));
        }
        if self.recipients.len() > MAX_RECIPIENTS {
            return Err(AppError::Validation(format!(
                "at most {} recipients per request",
                MAX_RECIPIENTS
            )));
        }
        if self.content.trim().is_empty() {
            return Err(AppError::Validation("content must not be empty".into()));
        }
        Ok(())
    }

    /// One row per distinct recipient, in request order
    pub fn rows(&self) -> Vec<NewNotification> {
        let mut seen = std::collections::HashSet::new();
        self.recipients
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|&recipient_id| NewNotification {
                recipient_id,
                kind: self.kind,
                content: self.content.clone(),
                redirect_target: self.redirect_target.clone(),
            })
            .collect()
    }
}

/// Result of one publish call
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    /// Ids of the persisted notifications
    pub notification_ids: Vec<i64>,
    /// Handles that accepted the push immediately
    pub delivered: usize,
    /// Handles that held the push until their replay finished
    pub buffered: usize,
    /// Handles dropped because the push failed
    pub failed: usize,
}

/// Statistics for the notification publisher
#[derive(Debug, Default)]
pub struct PublisherStats {
    pub total_published: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_buffered: AtomicU64,
    pub total_failed: AtomicU64,
}

impl PublisherStats {
    pub fn snapshot(&self) -> PublisherStatsSnapshot {
        PublisherStatsSnapshot {
            total_published: self.total_published.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_buffered: self.total_buffered.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of publisher statistics
#[derive(Debug, Clone, Serialize)]
pub struct PublisherStatsSnapshot {
    pub total_published: u64,
    pub total_delivered: u64,
    pub total_buffered: u64,
    pub total_failed: u64,
}
