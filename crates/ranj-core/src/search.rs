//! Search query types shared between the search engine and the stores.
//!
//! The engine in `ranj-search` parses user input into these resolved
//! shapes; each `LinkSearchRepository` implementation turns them into
//! predicates of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Vector;

/// Reserved filter value meaning "links with zero tag associations".
pub const NO_TAGS_SENTINEL: &str = "__NO_TAGS__";

/// Tag membership filter.
///
/// `tag_ids` matches links carrying at least one of the ids; `untagged`
/// matches links with no tags at all. When both are set a link matching
/// either side is included. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub tag_ids: Vec<Uuid>,
    pub untagged: bool,
}

impl TagFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn untagged() -> Self {
        Self {
            tag_ids: Vec::new(),
            untagged: true,
        }
    }

    pub fn any_of(tag_ids: Vec<Uuid>) -> Self {
        Self {
            tag_ids,
            untagged: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tag_ids.is_empty() && !self.untagged
    }

    /// Whether a link carrying `link_tags` passes this filter.
    pub fn matches(&self, link_tags: &[Uuid]) -> bool {
        if self.is_empty() {
            return true;
        }
        (self.untagged && link_tags.is_empty())
            || link_tags.iter().any(|id| self.tag_ids.contains(id))
    }
}

/// Position after the last row of a recency-ordered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyKey {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl RecencyKey {
    /// True if a row with this key sorts strictly after `self` in
    /// `created_at DESC, id DESC` order.
    pub fn precedes(&self, created_at: DateTime<Utc>, id: Uuid) -> bool {
        created_at < self.created_at || (created_at == self.created_at && id < self.id)
    }
}

/// Position after the last row of a similarity-ordered page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityKey {
    pub similarity: f64,
    pub id: Uuid,
}

impl SimilarityKey {
    /// True if a row with this key sorts strictly after `self` in
    /// `similarity DESC, id DESC` order.
    pub fn precedes(&self, similarity: f64, id: Uuid) -> bool {
        similarity < self.similarity || (similarity == self.similarity && id < self.id)
    }
}

/// Resolved lexical (full-text) query.
#[derive(Debug, Clone)]
pub struct LexicalQuery {
    pub user_id: Uuid,
    /// Free-text query; `None` matches all of the user's links.
    pub text: Option<String>,
    pub tags: TagFilter,
    /// Ignored by count queries.
    pub after: Option<RecencyKey>,
    /// Rows to fetch, usually the page size plus one.
    pub fetch_limit: i64,
}

/// Resolved semantic (vector similarity) query.
#[derive(Debug, Clone)]
pub struct SemanticQuery {
    pub user_id: Uuid,
    pub embedding: Vector,
    /// Rows must have similarity strictly greater than this.
    pub floor: f64,
    pub tags: TagFilter,
    /// Ignored by count queries.
    pub after: Option<SimilarityKey>,
    pub fetch_limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = TagFilter::none();
        assert!(filter.is_empty());
        assert!(filter.matches(&[]));
        assert!(filter.matches(&[Uuid::new_v4()]));
    }

    #[test]
    fn test_untagged_filter() {
        let filter = TagFilter::untagged();
        assert!(filter.matches(&[]));
        assert!(!filter.matches(&[Uuid::new_v4()]));
    }

    #[test]
    fn test_any_of_filter() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let filter = TagFilter::any_of(vec![a]);
        assert!(filter.matches(&[a, b]));
        assert!(!filter.matches(&[b]));
        assert!(!filter.matches(&[]));
    }

    #[test]
    fn test_untagged_combined_with_ids_is_union() {
        let a = Uuid::new_v4();
        let filter = TagFilter {
            tag_ids: vec![a],
            untagged: true,
        };
        assert!(filter.matches(&[]));
        assert!(filter.matches(&[a]));
        assert!(!filter.matches(&[Uuid::new_v4()]));
    }

    #[test]
    fn test_recency_key_ordering_breaks_ties_by_id() {
        let now = Utc::now();
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let key = RecencyKey {
            created_at: now,
            id: high,
        };
        assert!(key.precedes(now, low));
        assert!(!key.precedes(now, high));
        assert!(key.precedes(now - Duration::seconds(1), high));
        assert!(!key.precedes(now + Duration::seconds(1), low));
    }

    #[test]
    fn test_similarity_key_ordering() {
        let key = SimilarityKey {
            similarity: 0.8,
            id: Uuid::from_u128(5),
        };
        assert!(key.precedes(0.79, Uuid::from_u128(9)));
        assert!(key.precedes(0.8, Uuid::from_u128(4)));
        assert!(!key.precedes(0.8, Uuid::from_u128(5)));
        assert!(!key.precedes(0.81, Uuid::from_u128(1)));
    }
}
