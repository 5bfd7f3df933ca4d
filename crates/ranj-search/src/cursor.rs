//! Opaque keyset cursors.
//!
//! A cursor is the ordering key of the last row on the previous page,
//! tagged with the mode that produced it, serialized as JSON and encoded as
//! URL-safe base64 without padding. Callers must treat it as opaque.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use ranj_core::{Error, LinkSummary, RecencyKey, Result, SimilarityKey};

/// Decoded pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "m")]
pub enum PageCursor {
    /// Lexical mode: `(created_at, id)`.
    #[serde(rename = "r")]
    Recency(RecencyKey),
    /// Semantic mode: `(similarity, id)`.
    #[serde(rename = "s")]
    Similarity(SimilarityKey),
}

impl PageCursor {
    /// Cursor positioned after `row` in recency order.
    pub fn after_recent(row: &LinkSummary) -> Self {
        PageCursor::Recency(RecencyKey {
            created_at: row.created_at,
            id: row.id,
        })
    }

    /// Cursor positioned after `row` in similarity order. The row must
    /// carry its similarity score.
    pub fn after_similar(row: &LinkSummary) -> Result<Self> {
        let similarity = row.score.ok_or_else(|| {
            Error::Internal(format!("semantic result {} has no similarity score", row.id))
        })?;
        Ok(PageCursor::Similarity(SimilarityKey {
            similarity,
            id: row.id,
        }))
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::Internal(format!("Failed to encode cursor: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| Error::InvalidInput("Invalid cursor: not valid base64".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| Error::InvalidInput("Invalid cursor: unrecognized contents".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ranj_core::LinkState;
    use uuid::Uuid;

    fn row(score: Option<f64>) -> LinkSummary {
        LinkSummary {
            id: Uuid::new_v4(),
            url: "https://example.com".into(),
            title: None,
            description: None,
            image: None,
            state: LinkState::Processed,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
                + chrono::Duration::microseconds(123_456),
            tags: vec![],
            score,
        }
    }

    #[test]
    fn test_recency_cursor_keeps_microseconds() {
        let row = row(None);
        let cursor = PageCursor::after_recent(&row);
        let decoded = PageCursor::decode(&cursor.encode().unwrap()).unwrap();
        assert_eq!(decoded, cursor);
        match decoded {
            PageCursor::Recency(key) => {
                assert_eq!(key.created_at, row.created_at);
                assert_eq!(key.id, row.id);
            }
            other => panic!("unexpected cursor: {:?}", other),
        }
    }

    #[test]
    fn test_similarity_cursor_keeps_exact_score() {
        let row = row(Some(0.812_345_678_901_234_5));
        let cursor = PageCursor::after_similar(&row).unwrap();
        let decoded = PageCursor::decode(&cursor.encode().unwrap()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_similarity_cursor_requires_score() {
        assert!(matches!(
            PageCursor::after_similar(&row(None)),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_encoded_cursor_is_url_safe() {
        let encoded = PageCursor::after_recent(&row(None)).encode().unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            PageCursor::decode("not a cursor!"),
            Err(Error::InvalidInput(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"2024-05-01");
        assert!(matches!(
            PageCursor::decode(&not_json),
            Err(Error::InvalidInput(_))
        ));
        let wrong_shape = URL_SAFE_NO_PAD.encode(br#"{"m":"x","id":"1"}"#);
        assert!(matches!(
            PageCursor::decode(&wrong_shape),
            Err(Error::InvalidInput(_))
        ));
    }
}
