//! Search request parsing and validation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ranj_core::{defaults, Error, Result, TagFilter, NO_TAGS_SENTINEL};

use crate::cursor::PageCursor;

/// Raw search parameters as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Free-text query.
    pub search: Option<String>,
    /// Tag ids to filter by; may include [`NO_TAGS_SENTINEL`].
    #[serde(default)]
    pub tag_ids: Vec<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub smart_search: bool,
}

impl SearchRequest {
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_tag_ids<I, S>(mut self, tag_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_ids = tag_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_smart_search(mut self, smart_search: bool) -> Self {
        self.smart_search = smart_search;
        self
    }

    /// Validate and resolve the request.
    ///
    /// Rejects malformed tag ids, malformed cursors, cursors from the other
    /// mode, and limits outside `1..=max_limit`. Smart search without any
    /// query text runs in lexical mode.
    pub fn parse(&self, default_limit: i64, max_limit: i64) -> Result<ParsedRequest> {
        let text = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let limit = self.limit.unwrap_or(default_limit);
        if limit < 1 || limit > max_limit {
            return Err(Error::InvalidInput(format!(
                "limit must be between 1 and {}, got {}",
                max_limit, limit
            )));
        }

        let tags = parse_tag_filter(&self.tag_ids)?;

        let mode = match (&text, self.smart_search) {
            (Some(_), true) => SearchMode::Semantic,
            _ => SearchMode::Lexical,
        };

        let cursor = self
            .cursor
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(PageCursor::decode)
            .transpose()?;

        match (mode, &cursor) {
            (SearchMode::Lexical, Some(PageCursor::Similarity(_)))
            | (SearchMode::Semantic, Some(PageCursor::Recency(_))) => {
                return Err(Error::InvalidInput(
                    "Invalid cursor: produced by a different search mode".to_string(),
                ));
            }
            _ => {}
        }

        Ok(ParsedRequest {
            mode,
            text,
            tags,
            cursor,
            limit,
        })
    }
}

/// Turn raw tag ids into a filter. The sentinel selects untagged links;
/// every other entry must be a UUID.
pub fn parse_tag_filter(tag_ids: &[String]) -> Result<TagFilter> {
    let mut filter = TagFilter::none();
    for raw in tag_ids {
        let raw = raw.trim();
        if raw == NO_TAGS_SENTINEL {
            filter.untagged = true;
            continue;
        }
        let id = Uuid::parse_str(raw)
            .map_err(|_| Error::InvalidInput(format!("Invalid tag id: {}", raw)))?;
        if !filter.tag_ids.contains(&id) {
            filter.tag_ids.push(id);
        }
    }
    Ok(filter)
}

/// Which ranking a request runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Lexical,
    Semantic,
}

/// A validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub mode: SearchMode,
    /// Trimmed query text, `None` when absent or blank.
    pub text: Option<String>,
    pub tags: TagFilter,
    pub cursor: Option<PageCursor>,
    pub limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ranj_core::{RecencyKey, SimilarityKey};

    fn parse(req: SearchRequest) -> Result<ParsedRequest> {
        req.parse(defaults::PAGE_LIMIT, defaults::PAGE_LIMIT_MAX)
    }

    #[test]
    fn test_defaults() {
        let parsed = parse(SearchRequest::default()).unwrap();
        assert_eq!(parsed.mode, SearchMode::Lexical);
        assert_eq!(parsed.limit, 12);
        assert!(parsed.text.is_none());
        assert!(parsed.tags.is_empty());
        assert!(parsed.cursor.is_none());
    }

    #[test]
    fn test_sentinel_is_not_a_tag_id() {
        let parsed = parse(SearchRequest::default().with_tag_ids([NO_TAGS_SENTINEL])).unwrap();
        assert_eq!(parsed.tags, TagFilter::untagged());
    }

    #[test]
    fn test_sentinel_mixed_with_ids() {
        let id = Uuid::new_v4();
        let parsed = parse(
            SearchRequest::default().with_tag_ids([id.to_string(), NO_TAGS_SENTINEL.to_string()]),
        )
        .unwrap();
        assert!(parsed.tags.untagged);
        assert_eq!(parsed.tags.tag_ids, vec![id]);
    }

    #[test]
    fn test_duplicate_tag_ids_collapse() {
        let id = Uuid::new_v4();
        let parsed =
            parse(SearchRequest::default().with_tag_ids([id.to_string(), id.to_string()])).unwrap();
        assert_eq!(parsed.tags, TagFilter::any_of(vec![id]));
    }

    #[test]
    fn test_invalid_tag_id_rejected() {
        let err = parse(SearchRequest::default().with_tag_ids(["reading-list"])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref m) if m.contains("reading-list")));
    }

    #[test]
    fn test_limit_bounds() {
        assert!(parse(SearchRequest::default().with_limit(0)).is_err());
        assert!(parse(SearchRequest::default().with_limit(101)).is_err());
        assert_eq!(parse(SearchRequest::default().with_limit(1)).unwrap().limit, 1);
        assert_eq!(parse(SearchRequest::default().with_limit(100)).unwrap().limit, 100);
    }

    #[test]
    fn test_blank_search_is_no_search() {
        let parsed = parse(SearchRequest::default().with_search("   ")).unwrap();
        assert!(parsed.text.is_none());

        let parsed = parse(SearchRequest::default().with_search("  rust  ")).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("rust"));
    }

    #[test]
    fn test_smart_search_without_text_is_lexical() {
        let parsed = parse(SearchRequest::default().with_smart_search(true)).unwrap();
        assert_eq!(parsed.mode, SearchMode::Lexical);

        let parsed = parse(
            SearchRequest::default()
                .with_search("async io")
                .with_smart_search(true),
        )
        .unwrap();
        assert_eq!(parsed.mode, SearchMode::Semantic);
    }

    #[test]
    fn test_cursor_mode_mismatch_rejected() {
        let similarity = PageCursor::Similarity(SimilarityKey {
            similarity: 0.9,
            id: Uuid::new_v4(),
        })
        .encode()
        .unwrap();
        let err = parse(SearchRequest::default().with_cursor(Some(similarity))).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let recency = PageCursor::Recency(RecencyKey {
            created_at: Utc::now(),
            id: Uuid::new_v4(),
        })
        .encode()
        .unwrap();
        let err = parse(
            SearchRequest::default()
                .with_search("rust")
                .with_smart_search(true)
                .with_cursor(Some(recency)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        let err = parse(SearchRequest::default().with_cursor(Some("%%%".into()))).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let req: SearchRequest = serde_json::from_value(serde_json::json!({
            "search": "rust",
            "tagIds": ["__NO_TAGS__"],
            "limit": 2,
            "smartSearch": false
        }))
        .unwrap();
        assert_eq!(req.tag_ids, vec!["__NO_TAGS__".to_string()]);
        assert_eq!(req.limit, Some(2));
        assert!(!req.smart_search);
    }
}
