//! Live notification channel over Server-Sent Events.
//!
//! # Endpoint
//!
//! `GET /api/v1/notifications/stream?token=<JWT>&lastEventId=<id>`
//!
//! The token may also be sent as `Authorization: Bearer <JWT>`, and the last
//! seen id as the standard `Last-Event-ID` header.
//!
//! # Event Types
//!
//! - `keepalive` - sent on connect and by the periodic health check
//! - `notification` - a notification, `id` is the notification id
//! - `error` - delivery failed, the stream closes after it
//!
//! On connect with a last seen id, missed notifications are replayed in id
//! order before live pushes are released.

mod channel;
mod handler;
mod message;

pub use channel::{LiveChannelService, LiveConnection, REPLAY_POOL_NAME};
pub use handler::{notification_stream, StreamQuery};
pub use message::{ChannelFrame, EventName, LiveEvent};
