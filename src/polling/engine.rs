use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PollingConfig;
use crate::cursor::{Cursor, CursorKey, CursorPage, Keyed};
use crate::metrics::PollMetrics;
use crate::storage::{Comment, CommentStore, StorageError};

use super::pool::WorkerPool;

/// Name of the long-poll worker pool
pub const POLL_POOL_NAME: &str = "comment-poll";

/// One long-poll call
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub subscriber_id: i64,
    pub target_id: i64,
    /// Exclusive lower bound; `None` polls from the start of the feed
    pub cursor: Option<CursorKey>,
    /// Requested batch size, capped at `max_batch_size`
    pub limit: Option<usize>,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("poll worker stopped without a result")]
    WorkerLost,
}

/// Terminal state of a long poll. Exactly one is produced per call.
#[derive(Debug)]
pub enum PollOutcome {
    /// New items; `next_cursor` points at the last one
    ItemsFound(CursorPage<Comment>),
    /// Nothing new before the deadline; cursor unchanged
    TimedOut(CursorPage<Comment>),
    /// No worker slot was free
    PoolExhausted,
    /// Cancelled by disconnect or shutdown; cursor unchanged
    Interrupted(CursorPage<Comment>),
    /// Storage failed for this request only
    Failed(PollError),
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ItemsFound(_) => "items_found",
            Self::TimedOut(_) => "timed_out",
            Self::PoolExhausted => "pool_exhausted",
            Self::Interrupted(_) => "interrupted",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PollTiming {
    timeout: Duration,
    interval: Duration,
}

/// Long-polling engine for the comment feed.
///
/// Each poll runs on the dedicated worker pool and re-queries storage every
/// `interval` until items appear or `timeout` elapses. The caller waits on a
/// oneshot guarded by an outer wall-clock timeout that is strictly longer
/// than the inner one.
pub struct LongPollEngine {
    store: Arc<dyn CommentStore>,
    pool: WorkerPool,
    config: PollingConfig,
    shutdown: CancellationToken,
}

impl LongPollEngine {
    pub fn new(store: Arc<dyn CommentStore>, config: PollingConfig) -> Self {
        let pool = WorkerPool::new(POLL_POOL_NAME, config.worker_pool_size);
        Self {
            store,
            pool,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    fn batch_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.max_batch_size)
            .clamp(1, self.config.max_batch_size)
    }

    /// Poll for comments newer than the request cursor.
    ///
    /// Dropping the returned future (client went away) cancels the worker.
    #[tracing::instrument(
        name = "poll.comments",
        skip(self, request),
        fields(subscriber_id = request.subscriber_id, target_id = request.target_id)
    )]
    pub async fn poll(&self, request: PollRequest) -> PollOutcome {
        let started = Instant::now();
        let token = self.shutdown.child_token();
        let _cancel_on_drop = token.clone().drop_guard();

        let cursor = request.cursor;
        let limit = self.batch_size(request.limit);
        let timing = PollTiming {
            timeout: self.config.timeout(),
            interval: self.config.interval(),
        };

        let (tx, rx) = oneshot::channel();
        let store = self.store.clone();
        let worker_token = token.clone();
        let spawned = self.pool.try_spawn(async move {
            let outcome =
                poll_loop(store, request.target_id, cursor, limit, timing, worker_token).await;
            let _ = tx.send(outcome);
        });

        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Rejecting long poll");
            PollMetrics::record(PollOutcome::PoolExhausted.label(), started.elapsed());
            return PollOutcome::PoolExhausted;
        }

        let outcome = match tokio::time::timeout(self.config.outer_timeout(), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => PollOutcome::Failed(PollError::WorkerLost),
            Err(_) => {
                token.cancel();
                tracing::warn!(
                    outer_timeout_ms = self.config.outer_timeout().as_millis() as u64,
                    "Long poll hit the outer safety timeout"
                );
                PollOutcome::TimedOut(CursorPage::empty(cursor))
            }
        };

        PollMetrics::record(outcome.label(), started.elapsed());
        tracing::debug!(
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Long poll resolved"
        );

        outcome
    }

    /// Interrupt every in-flight poll and reject new ones
    pub fn shutdown(&self) {
        self.pool.close();
        self.shutdown.cancel();
        tracing::info!("Long-poll engine stopped");
    }
}

async fn poll_loop(
    store: Arc<dyn CommentStore>,
    target_id: i64,
    cursor: Option<CursorKey>,
    limit: usize,
    timing: PollTiming,
    token: CancellationToken,
) -> PollOutcome {
    let started = Instant::now();

    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Interrupted(CursorPage::empty(cursor)),
            result = store.comments_after(target_id, cursor, limit) => result,
        };

        match result {
            Err(e) => {
                tracing::error!(error = %e, target_id = target_id, "Long poll query failed");
                return PollOutcome::Failed(e.into());
            }
            Ok(items) if !items.is_empty() => {
                // A poll response is never paginated further
                let next_cursor = items.last().map(|c| Cursor::from_key(&c.cursor_key()));
                return PollOutcome::ItemsFound(CursorPage {
                    items,
                    next_cursor,
                    has_more: false,
                });
            }
            Ok(_) => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= timing.timeout {
            return PollOutcome::TimedOut(CursorPage::empty(cursor));
        }

        let nap = timing.interval.min(timing.timeout - elapsed);
        tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Interrupted(CursorPage::empty(cursor)),
            _ = tokio::time::sleep(nap) => {}
        }
    }
}
