use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::connection_manager::{ConnectionRegistry, PushOutcome, TerminationReason};
use crate::metrics::{LiveChannelMetrics, NotificationMetrics};
use crate::storage::{Notification, NotificationStore, StorageError};

use super::types::{NotificationRequest, PublishResult, PublisherStats, PublisherStatsSnapshot};

/// Persists notifications and pushes them to every live handle of each
/// recipient.
///
/// Storage is the source of truth: a push that fails only drops that one
/// connection, and the client picks the row up on its next replay.
pub struct NotificationPublisher {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn NotificationStore>,
    stats: PublisherStats,
}

impl NotificationPublisher {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn NotificationStore>) -> Self {
        Self {
            registry,
            store,
            stats: PublisherStats::default(),
        }
    }

    /// Persist one notification per recipient, then push each live.
    ///
    /// Fails only if persisting fails; rows already written stay written.
    #[tracing::instrument(
        name = "notification.publish",
        skip(self, request),
        fields(kind = %request.kind, recipients = request.recipients.len())
    )]
    pub async fn publish(&self, request: NotificationRequest) -> Result<PublishResult, StorageError> {
        let mut result = PublishResult::default();

        for row in request.rows() {
            let notification = self.store.insert(row).await?;
            self.stats.total_published.fetch_add(1, Ordering::Relaxed);
            NotificationMetrics::record_published(1);
            result.notification_ids.push(notification.id);

            self.push(&notification, &mut result);
        }

        tracing::info!(
            notifications = result.notification_ids.len(),
            delivered = result.delivered,
            buffered = result.buffered,
            failed = result.failed,
            "Notifications published"
        );

        Ok(result)
    }

    /// Push an already persisted notification to its recipient's handles
    fn push(&self, notification: &Notification, result: &mut PublishResult) {
        let handles = self.registry.all_for_subscriber(notification.recipient_id);

        for handle in handles {
            match handle.push_notification(notification) {
                Ok(outcome) => {
                    NotificationMetrics::record_pushed(outcome);
                    match outcome {
                        PushOutcome::Sent => {
                            result.delivered += 1;
                            self.stats.total_delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        PushOutcome::Buffered => {
                            result.buffered += 1;
                            self.stats.total_buffered.fetch_add(1, Ordering::Relaxed);
                        }
                        PushOutcome::Skipped => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %handle.id,
                        notification_id = notification.id,
                        error = %e,
                        "Push failed, dropping connection"
                    );
                    result.failed += 1;
                    self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
                    NotificationMetrics::record_failed(1);
                    if self.registry.terminate(&handle, TerminationReason::Errored) {
                        LiveChannelMetrics::record_terminated(TerminationReason::Errored);
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> PublisherStatsSnapshot {
        self.stats.snapshot()
    }
}
