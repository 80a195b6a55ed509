//! Comment and notification storage.
//!
//! Backends:
//! - `MemoryCommentStore` / `MemoryNotificationStore`: in-process (default)
//! - `PostgresCommentStore` / `PostgresNotificationStore`: persistent, used
//!   when `database.url` is configured
//!
//! Use `create_stores()` to pick the backends from configuration.

mod backend;
mod memory_backend;
mod models;
mod postgres_backend;

use std::sync::Arc;

use crate::config::DatabaseConfig;

pub use backend::{CommentStore, NotificationStore, StorageError};
pub use memory_backend::{MemoryCommentStore, MemoryNotificationStore};
pub use models::{
    now_millis, Comment, NewComment, NewNotification, Notification, NotificationKind,
};
pub use postgres_backend::{PostgresCommentStore, PostgresNotificationStore};

/// The pair of stores the delivery subsystem reads from
#[derive(Clone)]
pub struct Stores {
    pub comments: Arc<dyn CommentStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            comments: Arc::new(MemoryCommentStore::new()),
            notifications: Arc::new(MemoryNotificationStore::new()),
        }
    }
}

/// Create storage backends based on configuration.
///
/// - `database.url` set: PostgreSQL (tables are created if missing)
/// - otherwise: in-memory stores
pub async fn create_stores(config: &DatabaseConfig) -> Result<Stores, StorageError> {
    match config.url.as_deref() {
        Some(url) => {
            tracing::info!(backend = "postgres", "Creating PostgreSQL stores");
            let pool = postgres_backend::connect(config, url).await?;
            Ok(Stores {
                comments: Arc::new(PostgresCommentStore::new(pool.clone())),
                notifications: Arc::new(PostgresNotificationStore::new(pool)),
            })
        }
        None => {
            tracing::info!(backend = "memory", "Creating in-memory stores");
            Ok(Stores::in_memory())
        }
    }
}
