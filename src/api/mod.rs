//! API layer - HTTP endpoint handlers organized by domain.

mod comments;
mod health;
mod internal;
mod metrics;
mod notifications;
mod routes;

use serde::Deserialize;

use crate::cursor::{Cursor, CursorKey, Direction};
use crate::error::AppError;

pub use comments::{list_comments, poll_comments};
pub use health::{health, stats};
pub use internal::{close_connection, create_comment, publish_notification};
pub use metrics::prometheus_metrics;
pub use notifications::{list_notifications, mark_read};
pub use routes::{api_routes, internal_routes};

/// Page size when the client sends none
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Largest page a keyset list will return
pub const MAX_PAGE_SIZE: usize = 100;

/// `?cursor=&limit=&direction=` shared by the keyset list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub direction: Direction,
}

impl PageQuery {
    /// Decoded cursor; malformed tokens are a 400
    pub fn cursor_key(&self) -> Result<Option<CursorKey>, AppError> {
        Ok(Cursor::decode_optional(self.cursor.as_deref())?)
    }

    pub fn page_size(&self) -> Result<usize, AppError> {
        match self.limit {
            None => Ok(DEFAULT_PAGE_SIZE),
            Some(0) => Err(AppError::Validation("limit must be at least 1".into())),
            Some(limit) => Ok(limit.min(MAX_PAGE_SIZE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_defaults_and_clamps() {
        assert_eq!(PageQuery::default().page_size().unwrap(), DEFAULT_PAGE_SIZE);

        let big = PageQuery {
            limit: Some(10_000),
            ..PageQuery::default()
        };
        assert_eq!(big.page_size().unwrap(), MAX_PAGE_SIZE);

        let zero = PageQuery {
            limit: Some(0),
            ..PageQuery::default()
        };
        assert!(matches!(zero.page_size(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_bad_cursor_is_rejected() {
        let query = PageQuery {
            cursor: Some("not a cursor!".into()),
            ..PageQuery::default()
        };
        assert!(matches!(query.cursor_key(), Err(AppError::InvalidCursor(_))));
    }
}
