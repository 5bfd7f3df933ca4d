//! The link search engine.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use uuid::Uuid;

use ranj_core::{
    defaults, EmbeddingBackend, Error, LexicalQuery, LinkPage, LinkSearchRepository, LinkSummary,
    Result, SemanticQuery,
};

use crate::cursor::PageCursor;
use crate::request::{ParsedRequest, SearchMode, SearchRequest};

/// Search engine configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Page size when the request gives none.
    pub default_limit: i64,
    /// Largest accepted page size.
    pub max_limit: i64,
    /// Semantic results must score strictly above this.
    pub similarity_floor: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: defaults::PAGE_LIMIT,
            max_limit: defaults::PAGE_LIMIT_MAX,
            similarity_floor: defaults::SIMILARITY_FLOOR,
        }
    }
}

impl SearchConfig {
    /// Reads `SEARCH_SIMILARITY_FLOOR` (default 0.7).
    pub fn from_env() -> Self {
        let similarity_floor = std::env::var("SEARCH_SIMILARITY_FLOOR")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|f| f.is_finite())
            .unwrap_or(defaults::SIMILARITY_FLOOR);
        Self {
            similarity_floor,
            ..Self::default()
        }
    }

    pub fn with_similarity_floor(mut self, floor: f64) -> Self {
        self.similarity_floor = floor;
        self
    }

    pub fn with_limits(mut self, default_limit: i64, max_limit: i64) -> Self {
        self.default_limit = default_limit;
        self.max_limit = max_limit;
        self
    }
}

/// Read-only search over a user's links.
#[derive(Clone)]
pub struct LinkSearchEngine {
    repo: Arc<dyn LinkSearchRepository>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    config: SearchConfig,
}

impl LinkSearchEngine {
    pub fn new(repo: Arc<dyn LinkSearchRepository>, config: SearchConfig) -> Self {
        Self {
            repo,
            embedder: None,
            config,
        }
    }

    /// Enable semantic search.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run one page of a search for `user_id`.
    pub async fn search(&self, user_id: Uuid, request: &SearchRequest) -> Result<LinkPage> {
        let parsed = request.parse(self.config.default_limit, self.config.max_limit)?;
        self.search_parsed(user_id, parsed).await
    }

    pub async fn search_parsed(&self, user_id: Uuid, parsed: ParsedRequest) -> Result<LinkPage> {
        let start = Instant::now();
        let mode = parsed.mode;
        let page = match mode {
            SearchMode::Lexical => self.lexical(user_id, parsed).await?,
            SearchMode::Semantic => self.semantic(user_id, parsed).await?,
        };

        info!(
            subsystem = "search",
            component = "engine",
            op = "search",
            user_id = %user_id,
            mode = ?mode,
            result_count = page.data.len(),
            total = page.total,
            has_more = page.has_more,
            duration_ms = start.elapsed().as_millis() as u64,
            "Search completed"
        );
        Ok(page)
    }

    async fn lexical(&self, user_id: Uuid, parsed: ParsedRequest) -> Result<LinkPage> {
        let after = match parsed.cursor {
            Some(PageCursor::Recency(key)) => Some(key),
            Some(PageCursor::Similarity(_)) => {
                return Err(Error::InvalidInput(
                    "Invalid cursor: produced by a different search mode".to_string(),
                ))
            }
            None => None,
        };

        let query = LexicalQuery {
            user_id,
            text: parsed.text,
            tags: parsed.tags,
            after,
            fetch_limit: parsed.limit + 1,
        };

        let (rows, total) = tokio::try_join!(
            self.repo.lexical_page(&query),
            self.repo.lexical_count(&query)
        )?;

        into_page(rows, parsed.limit, total, |row| {
            Ok(PageCursor::after_recent(row))
        })
    }

    async fn semantic(&self, user_id: Uuid, parsed: ParsedRequest) -> Result<LinkPage> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| Error::Config("semantic search is not configured".to_string()))?;
        let text = parsed
            .text
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("semantic search requires a query".to_string()))?;
        let after = match parsed.cursor {
            Some(PageCursor::Similarity(key)) => Some(key),
            Some(PageCursor::Recency(_)) => {
                return Err(Error::InvalidInput(
                    "Invalid cursor: produced by a different search mode".to_string(),
                ))
            }
            None => None,
        };

        let embedding = embedder.embed(text).await?;
        debug!(
            subsystem = "search",
            component = "engine",
            model = embedder.model_name(),
            dimension = embedding.as_slice().len(),
            "Embedded search query"
        );

        let query = SemanticQuery {
            user_id,
            embedding,
            floor: self.config.similarity_floor,
            tags: parsed.tags,
            after,
            fetch_limit: parsed.limit + 1,
        };

        let (rows, total) = tokio::try_join!(
            self.repo.semantic_page(&query),
            self.repo.semantic_count(&query)
        )?;

        into_page(rows, parsed.limit, total, PageCursor::after_similar)
    }
}

/// Strip the look-ahead row and derive `has_more` / `next_cursor` from it.
fn into_page<F>(mut rows: Vec<LinkSummary>, limit: i64, total: i64, cursor_for: F) -> Result<LinkPage>
where
    F: Fn(&LinkSummary) -> Result<PageCursor>,
{
    let limit = limit.max(0) as usize;
    let has_more = rows.len() > limit;
    rows.truncate(limit);

    let next_cursor = match (has_more, rows.last()) {
        (true, Some(last)) => Some(cursor_for(last)?.encode()?),
        _ => None,
    };

    Ok(LinkPage {
        data: rows,
        next_cursor,
        has_more,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ranj_core::LinkState;

    fn rows(n: usize) -> Vec<LinkSummary> {
        (0..n)
            .map(|i| LinkSummary {
                id: Uuid::new_v4(),
                url: format!("https://example.com/{}", i),
                title: None,
                description: None,
                image: None,
                state: LinkState::Processed,
                created_at: Utc::now(),
                tags: vec![],
                score: Some(0.9),
            })
            .collect()
    }

    #[test]
    fn test_into_page_strips_lookahead_row() {
        let fetched = rows(3);
        let second = fetched[1].clone();
        let page = into_page(fetched, 2, 7, |r| Ok(PageCursor::after_recent(r))).unwrap();

        assert_eq!(page.data.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.total, 7);
        let cursor = PageCursor::decode(page.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(cursor, PageCursor::after_recent(&second));
    }

    #[test]
    fn test_into_page_last_page() {
        let page = into_page(rows(2), 2, 2, |r| Ok(PageCursor::after_recent(r))).unwrap();
        assert_eq!(page.data.len(), 2);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_into_page_empty() {
        let page = into_page(vec![], 12, 0, PageCursor::after_similar).unwrap();
        assert!(page.data.is_empty());
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.default_limit, 12);
        assert_eq!(config.max_limit, 100);
        assert_eq!(config.similarity_floor, 0.7);
    }
}
