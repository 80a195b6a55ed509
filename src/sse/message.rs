use serde::Serialize;

use crate::storage::Notification;

/// Event names carried on the live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventName {
    Notification,
    Keepalive,
    Error,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Keepalive => "keepalive",
            Self::Error => "error",
        }
    }
}

/// One typed event pushed to a client
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    /// Notification id, used by clients as `Last-Event-ID` on reconnect
    pub id: Option<i64>,
    pub name: EventName,
    pub payload: serde_json::Value,
}

impl LiveEvent {
    pub fn notification(notification: &Notification) -> Self {
        Self {
            id: Some(notification.id),
            name: EventName::Notification,
            payload: serde_json::to_value(notification).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn keepalive() -> Self {
        Self {
            id: None,
            name: EventName::Keepalive,
            payload: serde_json::json!({ "ts": chrono::Utc::now().timestamp_millis() }),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            id: None,
            name: EventName::Error,
            payload: serde_json::json!({ "code": code, "message": message }),
        }
    }

    pub fn notification_id(&self) -> Option<i64> {
        match self.name {
            EventName::Notification => self.id,
            _ => None,
        }
    }
}

/// What travels through a connection's outbound buffer
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFrame {
    Event(LiveEvent),
    /// Close the stream normally
    Complete,
    /// Emit an error event, then close the stream
    Fail(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{now_millis, NotificationKind};

    #[test]
    fn test_notification_event_carries_id() {
        let notification = Notification {
            id: 11,
            recipient_id: 1,
            kind: NotificationKind::CommentCreated,
            content: "hi".to_string(),
            redirect_target: Some("/posts/3".to_string()),
            is_read: false,
            created_at: now_millis(),
        };
        let event = LiveEvent::notification(&notification);
        assert_eq!(event.id, Some(11));
        assert_eq!(event.notification_id(), Some(11));
        assert_eq!(event.name.as_str(), "notification");
        assert_eq!(event.payload["redirectTarget"], "/posts/3");
    }

    #[test]
    fn test_keepalive_has_no_id() {
        let event = LiveEvent::keepalive();
        assert_eq!(event.id, None);
        assert_eq!(event.notification_id(), None);
        assert_eq!(event.name, EventName::Keepalive);
    }
}
