//! SSE handler for the live notification channel.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::connection_manager::{ConnectionRegistry, PushHandle, TerminationReason};
use crate::error::AppError;
use crate::metrics::LiveChannelMetrics;
use crate::server::AppState;

use super::channel::LiveConnection;
use super::message::{ChannelFrame, LiveEvent};

/// Standard SSE reconnect header
const LAST_EVENT_ID: &str = "last-event-id";

/// Query parameters for the stream endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub token: Option<String>,
    pub last_event_id: Option<i64>,
}

/// `GET /api/v1/notifications/stream`
#[tracing::instrument(
    name = "sse.connect",
    skip(state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn notification_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = extract_token(&query, &headers)
        .ok_or_else(|| AppError::Auth("Missing authentication token".into()))?;
    let subscriber_id = state.jwt_validator.subscriber_id(&token)?;
    let last_seen_id = last_event_id(&query, &headers)?;

    let LiveConnection { handle, frames } = state
        .live_channel
        .connect(subscriber_id, last_seen_id)
        .map_err(|e| AppError::ResourceExhausted {
            message: e.to_string(),
            retry_after: state.settings.polling.retry_after_seconds,
        })?;

    tracing::info!(
        connection_id = %handle.id,
        subscriber_id = subscriber_id,
        last_seen_id = ?last_seen_id,
        "Live channel opened"
    );

    let stream = frame_stream(
        handle,
        frames,
        state.registry.clone(),
        state.live_channel.config().channel_timeout(),
    );

    Ok(Sse::new(stream).into_response())
}

/// Token from the `token` query parameter, else the bearer header
fn extract_token(query: &StreamQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Last seen notification id from the query, else the `Last-Event-ID` header
fn last_event_id(query: &StreamQuery, headers: &HeaderMap) -> Result<Option<i64>, AppError> {
    if query.last_event_id.is_some() {
        return Ok(query.last_event_id);
    }

    let Some(value) = headers.get(LAST_EVENT_ID) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| AppError::Validation("Last-Event-ID is not valid text".into()))?
        .trim();
    if value.is_empty() {
        return Ok(None);
    }

    value
        .parse()
        .map(Some)
        .map_err(|_| AppError::Validation(format!("Last-Event-ID is not a notification id: {}", value)))
}

fn to_sse_event(event: &LiveEvent) -> Event {
    let sse = Event::default()
        .event(event.name.as_str())
        .data(event.payload.to_string());
    match event.id {
        Some(id) => sse.id(id.to_string()),
        None => sse,
    }
}

/// Drain a connection's buffer into SSE events until a terminal frame, the
/// handle's termination, or the lifetime deadline.
fn frame_stream(
    handle: Arc<PushHandle>,
    mut frames: mpsc::Receiver<ChannelFrame>,
    registry: Arc<ConnectionRegistry>,
    lifetime: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let cleanup_guard = CleanupGuard::new(handle.clone(), registry.clone());

    async_stream::stream! {
        // Dropped when the stream ends or the client goes away
        let _guard = cleanup_guard;

        let deadline = tokio::time::sleep(lifetime);
        tokio::pin!(deadline);

        loop {
            let frame = tokio::select! {
                biased;
                frame = frames.recv() => frame,
                _ = handle.terminated() => frames.try_recv().ok(),
                _ = &mut deadline => {
                    if registry.terminate(&handle, TerminationReason::TimedOut) {
                        LiveChannelMetrics::record_terminated(TerminationReason::TimedOut);
                    }
                    continue;
                }
            };

            match frame {
                Some(ChannelFrame::Event(event)) => yield Ok(to_sse_event(&event)),
                Some(ChannelFrame::Fail(message)) => {
                    yield Ok(to_sse_event(&LiveEvent::error("DELIVERY_FAILED", &message)));
                    break;
                }
                Some(ChannelFrame::Complete) | None => break,
            }
        }
    }
}

/// Runs the terminal transition when the response stream is dropped
struct CleanupGuard {
    handle: Arc<PushHandle>,
    registry: Arc<ConnectionRegistry>,
    opened_at: Instant,
}

impl CleanupGuard {
    fn new(handle: Arc<PushHandle>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            handle,
            registry,
            opened_at: Instant::now(),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        // No-op if a timeout, error or sweep got there first
        if self.registry.terminate(&self.handle, TerminationReason::Disconnected) {
            LiveChannelMetrics::record_terminated(TerminationReason::Disconnected);
        }

        let duration = self.opened_at.elapsed();
        LiveChannelMetrics::record_closed(duration);
        LiveChannelMetrics::update_gauges(&self.registry.stats());

        tracing::info!(
            connection_id = %self.handle.id,
            subscriber_id = self.handle.subscriber_id(),
            duration_secs = duration.as_secs_f64(),
            "Live channel closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionId;
    use crate::storage::{now_millis, Notification, NotificationKind};
    use futures::StreamExt;

    fn registered(
        registry: &Arc<ConnectionRegistry>,
        capacity: usize,
    ) -> (Arc<PushHandle>, mpsc::Receiver<ChannelFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Arc::new(PushHandle::new(ConnectionId::new(1), tx));
        registry.register(handle.id, handle.clone()).unwrap();
        (handle, rx)
    }

    fn notification(id: i64) -> Notification {
        Notification {
            id,
            recipient_id: 1,
            kind: NotificationKind::GroupInvited,
            content: "join us".into(),
            redirect_target: None,
            is_read: false,
            created_at: now_millis(),
        }
    }

    #[test]
    fn test_extract_token_from_query() {
        let query = StreamQuery {
            token: Some("my-token".to_string()),
            last_event_id: None,
        };
        assert_eq!(extract_token(&query, &HeaderMap::new()), Some("my-token".to_string()));
    }

    #[test]
    fn test_extract_token_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer header-token".parse().unwrap());
        assert_eq!(
            extract_token(&StreamQuery::default(), &headers),
            Some("header-token".to_string())
        );
    }

    #[test]
    fn test_extract_token_none() {
        assert_eq!(extract_token(&StreamQuery::default(), &HeaderMap::new()), None);
    }

    #[test]
    fn test_last_event_id_sources() {
        let mut headers = HeaderMap::new();
        headers.insert(LAST_EVENT_ID, "41".parse().unwrap());

        assert_eq!(last_event_id(&StreamQuery::default(), &headers).unwrap(), Some(41));

        let query = StreamQuery {
            token: None,
            last_event_id: Some(7),
        };
        assert_eq!(last_event_id(&query, &headers).unwrap(), Some(7));
        assert_eq!(last_event_id(&StreamQuery::default(), &HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn test_malformed_last_event_id_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(LAST_EVENT_ID, "abc".parse().unwrap());
        assert!(matches!(
            last_event_id(&StreamQuery::default(), &headers),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_ends_on_complete_and_unregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, rx) = registered(&registry, 8);

        handle.push_notification(&notification(3)).unwrap();
        registry.terminate(&handle, TerminationReason::Shutdown);

        let events: Vec<_> = frame_stream(handle, rx, registry.clone(), Duration::from_secs(60))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stream_emits_error_then_ends() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, rx) = registered(&registry, 8);

        registry.terminate(&handle, TerminationReason::Errored);

        let events: Vec<_> = frame_stream(handle, rx, registry, Duration::from_secs(60))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_waiting_stream_emits_error_on_termination() {
        for _ in 0..50 {
            let registry = Arc::new(ConnectionRegistry::new());
            let (handle, rx) = registered(&registry, 8);

            let stream = frame_stream(handle.clone(), rx, registry.clone(), Duration::from_secs(60));
            let collector = tokio::spawn(stream.collect::<Vec<_>>());
            tokio::task::yield_now().await;

            registry.terminate(&handle, TerminationReason::Errored);
            assert_eq!(collector.await.unwrap().len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_lifetime_times_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, rx) = registered(&registry, 8);

        let started = tokio::time::Instant::now();
        let events: Vec<_> =
            frame_stream(handle.clone(), rx, registry.clone(), Duration::from_secs(30))
                .collect()
                .await;

        assert!(events.is_empty());
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert!(handle.is_terminated());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_stream_unregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, rx) = registered(&registry, 8);

        let stream = frame_stream(handle.clone(), rx, registry.clone(), Duration::from_secs(60));
        drop(stream);

        assert!(registry.is_empty());
        assert!(handle.is_terminated());
    }
}
