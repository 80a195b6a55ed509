//! Connection ids and push handles

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sse::{ChannelFrame, LiveEvent};
use crate::storage::Notification;

/// Process-wide sequence so two connections never share an id
static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identifies one live push handle: `(subscriber, epoch, seq)`.
///
/// `epoch_millis` is the connect time and drives stale-connection reaping.
/// The textual form is `"{subscriber_id}:{epoch_millis}:{seq}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    pub subscriber_id: i64,
    pub epoch_millis: i64,
    pub seq: u64,
}

impl ConnectionId {
    pub fn new(subscriber_id: i64) -> Self {
        Self::with_epoch(subscriber_id, Utc::now().timestamp_millis())
    }

    pub fn with_epoch(subscriber_id: i64, epoch_millis: i64) -> Self {
        Self {
            subscriber_id,
            epoch_millis,
            seq: CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Connect instant, `None` if the epoch is not a representable timestamp
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.epoch_millis)
    }

    /// Whether this connection should be reaped at `now`.
    ///
    /// An epoch that cannot be read as a timestamp always counts as stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let Some(connected_at) = self.connected_at() else {
            return true;
        };
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return false;
        };
        now.signed_duration_since(connected_at) > threshold
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.subscriber_id, self.epoch_millis, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed connection id: {0}")]
pub struct ParseConnectionIdError(pub String);

impl FromStr for ConnectionId {
    type Err = ParseConnectionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [subscriber, epoch, seq] = parts.as_slice() else {
            return Err(ParseConnectionIdError(s.to_string()));
        };
        let err = || ParseConnectionIdError(s.to_string());
        Ok(Self {
            subscriber_id: subscriber.parse().map_err(|_| err())?,
            epoch_millis: epoch.parse().map_err(|_| err())?,
            seq: seq.parse().map_err(|_| err())?,
        })
    }
}

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Client went away
    Disconnected,
    /// Stream lifetime elapsed
    TimedOut,
    /// Transport or delivery failure
    Errored,
    /// Removed by the stale-connection reaper
    Reaped,
    /// Closed by an operator
    Evicted,
    /// Service is stopping
    Shutdown,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::TimedOut => "timed_out",
            Self::Errored => "errored",
            Self::Reaped => "reaped",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Delivery failures on a single handle; always recovered by deregistering
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("connection closed")]
    Closed,
    #[error("outbound buffer full")]
    Full,
    #[error("send timed out")]
    TimedOut,
}

impl<T> From<mpsc::error::TrySendError<T>> for PushError {
    fn from(e: mpsc::error::TrySendError<T>) -> Self {
        match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        }
    }
}

/// Result of handing a notification to a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    /// Held until the replay in progress finishes
    Buffered,
    /// Already delivered by replay
    Skipped,
}

enum DeliveryState {
    /// Replay in progress; live notifications wait here
    Replaying {
        buffered: Vec<Notification>,
        replayed: HashSet<i64>,
    },
    /// Live push; `replayed` holds the ids the replay already sent
    Live { replayed: HashSet<i64> },
}

impl DeliveryState {
    fn replayed(&self) -> &HashSet<i64> {
        match self {
            Self::Replaying { replayed, .. } | Self::Live { replayed } => replayed,
        }
    }
}

/// Outbound side of one live connection.
///
/// Frames go through a bounded channel drained by the response stream. While
/// a replay is running, live notifications are buffered so the client sees
/// every notification exactly once. Only ids the replay actually sent are
/// suppressed on the live path, so a row committed out of id order is still
/// delivered.
pub struct PushHandle {
    pub id: ConnectionId,
    sender: mpsc::Sender<ChannelFrame>,
    pub connected_at: DateTime<Utc>,
    delivery: Mutex<DeliveryState>,
    terminated: AtomicBool,
    /// Cancelled on the terminal transition, after the final frame is queued
    closed: CancellationToken,
}

impl PushHandle {
    /// Handle that delivers live notifications immediately
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ChannelFrame>) -> Self {
        Self::with_state(
            id,
            sender,
            DeliveryState::Live {
                replayed: HashSet::new(),
            },
        )
    }

    /// Handle that buffers live notifications until `finish_replay`
    pub fn replaying(id: ConnectionId, sender: mpsc::Sender<ChannelFrame>) -> Self {
        Self::with_state(
            id,
            sender,
            DeliveryState::Replaying {
                buffered: Vec::new(),
                replayed: HashSet::new(),
            },
        )
    }

    fn with_state(id: ConnectionId, sender: mpsc::Sender<ChannelFrame>, state: DeliveryState) -> Self {
        Self {
            id,
            sender,
            connected_at: Utc::now(),
            delivery: Mutex::new(state),
            terminated: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    pub fn subscriber_id(&self) -> i64 {
        self.id.subscriber_id
    }

    /// Non-blocking keepalive
    pub fn keepalive(&self) -> Result<(), PushError> {
        self.sender
            .try_send(ChannelFrame::Event(LiveEvent::keepalive()))
            .map_err(PushError::from)
    }

    /// Keepalive that waits up to `timeout` for buffer space
    pub async fn keepalive_within(&self, timeout: Duration) -> Result<(), PushError> {
        self.send_within(ChannelFrame::Event(LiveEvent::keepalive()), timeout)
            .await
    }

    async fn send_within(&self, frame: ChannelFrame, timeout: Duration) -> Result<(), PushError> {
        match tokio::time::timeout(timeout, self.sender.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PushError::Closed),
            Err(_) => Err(PushError::TimedOut),
        }
    }

    /// Live push of a newly created notification
    pub fn push_notification(&self, notification: &Notification) -> Result<PushOutcome, PushError> {
        let mut state = self.lock_delivery();
        if state.replayed().contains(&notification.id) {
            return Ok(PushOutcome::Skipped);
        }

        match &mut *state {
            DeliveryState::Replaying { buffered, .. } => {
                buffered.push(notification.clone());
                Ok(PushOutcome::Buffered)
            }
            DeliveryState::Live { .. } => {
                self.sender
                    .try_send(ChannelFrame::Event(LiveEvent::notification(notification)))?;
                Ok(PushOutcome::Sent)
            }
        }
    }

    /// Send one missed notification during replay.
    ///
    /// Waits up to `timeout` for buffer space. Ids this handle already
    /// replayed are skipped.
    pub async fn replay_notification(
        &self,
        notification: &Notification,
        timeout: Duration,
    ) -> Result<PushOutcome, PushError> {
        if self.lock_delivery().replayed().contains(&notification.id) {
            return Ok(PushOutcome::Skipped);
        }

        self.send_within(
            ChannelFrame::Event(LiveEvent::notification(notification)),
            timeout,
        )
        .await?;

        match &mut *self.lock_delivery() {
            DeliveryState::Replaying { replayed, .. } | DeliveryState::Live { replayed } => {
                replayed.insert(notification.id);
            }
        }
        Ok(PushOutcome::Sent)
    }

    /// Flush notifications buffered during replay and switch to live mode.
    ///
    /// Returns how many buffered notifications were delivered.
    pub async fn finish_replay(&self, timeout: Duration) -> Result<usize, PushError> {
        let mut flushed = 0;
        loop {
            let mut batch = {
                let mut state = self.lock_delivery();
                match &mut *state {
                    DeliveryState::Replaying { buffered, replayed } => {
                        if buffered.is_empty() {
                            let replayed = std::mem::take(replayed);
                            *state = DeliveryState::Live { replayed };
                            return Ok(flushed);
                        }
                        std::mem::take(buffered)
                    }
                    DeliveryState::Live { .. } => return Ok(flushed),
                }
            };

            batch.sort_by_key(|n| n.id);
            batch.dedup_by_key(|n| n.id);
            for notification in &batch {
                if self.replay_notification(notification, timeout).await? == PushOutcome::Sent {
                    flushed += 1;
                }
            }
        }
    }

    /// Abandon the replay and go live, sending whatever was buffered so far.
    ///
    /// Returns how many buffered notifications were sent.
    pub fn abort_replay(&self) -> Result<usize, PushError> {
        let mut state = self.lock_delivery();
        let DeliveryState::Replaying { buffered, replayed } = &mut *state else {
            return Ok(0);
        };

        let mut batch = std::mem::take(buffered);
        let replayed = std::mem::take(replayed);
        *state = DeliveryState::Live { replayed };

        batch.sort_by_key(|n| n.id);
        batch.dedup_by_key(|n| n.id);
        for notification in &batch {
            self.sender
                .try_send(ChannelFrame::Event(LiveEvent::notification(notification)))?;
        }
        Ok(batch.len())
    }

    pub fn is_replaying(&self) -> bool {
        matches!(&*self.lock_delivery(), DeliveryState::Replaying { .. })
    }

    fn lock_delivery(&self) -> std::sync::MutexGuard<'_, DeliveryState> {
        // The state is plain data, a panic mid-update cannot leave it torn
        self.delivery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latch the terminal transition. Only the first caller gets `true`.
    ///
    /// `frame` is queued before `terminated()` resolves, so a stream woken by
    /// the termination still finds it in the buffer.
    pub fn terminate_with(&self, frame: Option<ChannelFrame>) -> bool {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(frame) = frame {
            let _ = self.sender.try_send(frame);
        }
        self.closed.cancel();
        true
    }

    /// Resolves once the handle has been terminated
    pub async fn terminated(&self) {
        self.closed.cancelled().await
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// The receiving stream has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
