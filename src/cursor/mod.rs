//! Opaque keyset pagination cursors.
//!
//! A cursor is the URL-safe base64 form of `"{created_at_millis}:{id}"`. Every
//! keyset-paginated list (comment feed, long poll, notification list) pages
//! with it, so the ordering key `(created_at, id)` must match the storage
//! predicate exactly.

use std::fmt::{self, Display, Formatter};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEPARATOR: char = ':';

/// Cursor decoding failures; always the client's fault
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

/// Position in a feed ordered by `(created_at, id)`.
///
/// Ordering is lexicographic on the pair, which keeps pages strictly monotonic
/// even when several items share a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CursorKey {
    pub timestamp: DateTime<Utc>,
    pub id: i64,
}

impl CursorKey {
    pub fn new(timestamp: DateTime<Utc>, id: i64) -> Self {
        Self { timestamp, id }
    }
}

/// Opaque pagination token handed to clients
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Encode a `(timestamp, id)` pair. Sub-millisecond precision is dropped.
    pub fn encode(timestamp: DateTime<Utc>, id: i64) -> Self {
        let raw = format!("{}{}{}", timestamp.timestamp_millis(), SEPARATOR, id);
        Self(URL_SAFE_NO_PAD.encode(raw.as_bytes()))
    }

    pub fn from_key(key: &CursorKey) -> Self {
        Self::encode(key.timestamp, key.id)
    }

    /// Decode a raw token into its key
    pub fn decode(token: &str) -> Result<CursorKey, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| CursorError::InvalidCursor("not valid base64".to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| CursorError::InvalidCursor("not valid UTF-8".to_string()))?;

        let parts: Vec<&str> = text.split(SEPARATOR).collect();
        let [timestamp_part, id_part] = parts.as_slice() else {
            return Err(CursorError::InvalidCursor(format!(
                "expected 2 parts, found {}",
                parts.len()
            )));
        };

        let millis = timestamp_part
            .parse::<i64>()
            .map_err(|_| CursorError::InvalidCursor("timestamp is not numeric".to_string()))?;
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| CursorError::InvalidCursor("timestamp out of range".to_string()))?;
        let id = id_part
            .parse::<i64>()
            .map_err(|_| CursorError::InvalidCursor("id is not numeric".to_string()))?;

        Ok(CursorKey { timestamp, id })
    }

    /// Decode an optional query parameter; empty strings count as absent
    pub fn decode_optional(token: Option<&str>) -> Result<Option<CursorKey>, CursorError> {
        match token {
            Some(t) if !t.is_empty() => Self::decode(t).map(Some),
            _ => Ok(None),
        }
    }

    pub fn key(&self) -> Result<CursorKey, CursorError> {
        Self::decode(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that sits in a keyset-paginated feed
pub trait Keyed {
    fn cursor_key(&self) -> CursorKey;
}

/// Direction of a keyset list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Oldest first, items strictly after the cursor
    #[default]
    Asc,
    /// Newest first, items strictly before the cursor
    Desc,
}

/// One page of a keyset list, `{items, nextCursor, hasMore}` on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

impl<T: Keyed> CursorPage<T> {
    /// Build a page from a query that fetched up to `limit + 1` rows.
    ///
    /// The extra row only signals `has_more`; it is not returned. With no
    /// items the incoming cursor is echoed back so clients can keep paging.
    pub fn from_overfetch(mut items: Vec<T>, limit: usize, incoming: Option<CursorKey>) -> Self {
        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_cursor = items
            .last()
            .map(|item| Cursor::from_key(&item.cursor_key()))
            .or_else(|| incoming.as_ref().map(Cursor::from_key));

        Self {
            items,
            next_cursor,
            has_more,
        }
    }
}

impl<T> CursorPage<T> {
    /// Empty page that preserves the caller's position
    pub fn empty(cursor: Option<CursorKey>) -> Self {
        Self {
            items: Vec::new(),
            next_cursor: cursor.as_ref().map(Cursor::from_key),
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn raw(s: &str) -> String {
        URL_SAFE_NO_PAD.encode(s.as_bytes())
    }

    #[derive(Debug)]
    struct Item(CursorKey);

    impl Keyed for Item {
        fn cursor_key(&self) -> CursorKey {
            self.0
        }
    }

    #[test]
    fn test_round_trip() {
        for (millis, id) in [(0, 0), (1_700_000_000_123, 42), (1, i64::MAX), (-5_000, -7)] {
            let cursor = Cursor::encode(ts(millis), id);
            let key = Cursor::decode(cursor.as_str()).unwrap();
            assert_eq!(key, CursorKey::new(ts(millis), id));
        }
    }

    #[test]
    fn test_token_is_opaque() {
        let cursor = Cursor::encode(ts(1_700_000_000_000), 9);
        assert!(!cursor.as_str().contains(':'));
    }

    #[test]
    fn test_decode_rejects_wrong_part_count() {
        assert!(matches!(
            Cursor::decode(&raw("123")),
            Err(CursorError::InvalidCursor(_))
        ));
        assert!(matches!(
            Cursor::decode(&raw("1:2:3")),
            Err(CursorError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_numeric_parts() {
        assert!(Cursor::decode(&raw("123:abc")).is_err());
        assert!(Cursor::decode(&raw("abc:123")).is_err());
        assert!(Cursor::decode(&raw(":")).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Cursor::decode("***not base64***").is_err());
        assert!(Cursor::decode("").is_err());
    }

    #[test]
    fn test_decode_optional() {
        assert_eq!(Cursor::decode_optional(None).unwrap(), None);
        assert_eq!(Cursor::decode_optional(Some("")).unwrap(), None);
        let cursor = Cursor::encode(ts(10), 1);
        assert_eq!(
            Cursor::decode_optional(Some(cursor.as_str())).unwrap(),
            Some(CursorKey::new(ts(10), 1))
        );
    }

    #[test]
    fn test_key_ordering_breaks_ties_by_id() {
        let a = CursorKey::new(ts(100), 1);
        let b = CursorKey::new(ts(100), 2);
        let c = CursorKey::new(ts(101), 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_page_from_overfetch() {
        let items = vec![
            Item(CursorKey::new(ts(1), 1)),
            Item(CursorKey::new(ts(2), 2)),
            Item(CursorKey::new(ts(3), 3)),
        ];
        let page = CursorPage::from_overfetch(items, 2, None);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);
        assert_eq!(
            page.next_cursor.unwrap().key().unwrap(),
            CursorKey::new(ts(2), 2)
        );
    }

    #[test]
    fn test_empty_page_keeps_cursor() {
        let key = CursorKey::new(ts(5), 5);
        let page: CursorPage<Item> = CursorPage::from_overfetch(Vec::new(), 10, Some(key));
        assert!(page.items.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_cursor.unwrap().key().unwrap(), key);
    }

    #[test]
    fn test_page_wire_shape() {
        let page: CursorPage<i32> = CursorPage::empty(None);
        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("nextCursor").is_some());
        assert_eq!(json["hasMore"], false);
        assert!(json["items"].as_array().unwrap().is_empty());
    }
}
