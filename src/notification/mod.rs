//! Notification producer path.
//!
//! `NotificationPublisher` is the in-process entry point used by the rest of
//! the application (and by the internal HTTP endpoint) whenever something
//! notification-worthy happens.

mod publisher;
mod types;

pub use publisher::NotificationPublisher;
pub use types::{NotificationRequest, PublishResult, PublisherStatsSnapshot, MAX_RECIPIENTS};
