//! # ranj-search
//!
//! Link search for ranj.
//!
//! Two mutually exclusive modes:
//! - **Lexical** (default): weighted full-text match over title,
//!   description and notes, newest first.
//! - **Semantic** (`smart_search`): cosine similarity between the query
//!   embedding and each link's embedding, above a similarity floor.
//!
//! Both modes page with opaque keyset cursors: `(created_at, id)` for
//! lexical, `(similarity, id)` for semantic. A page fetches `limit + 1`
//! rows to detect whether more exist, and reports the size of the whole
//! filtered set alongside.
//!
//! ## Example
//!
//! ```ignore
//! use ranj_search::{LinkSearchEngine, SearchConfig, SearchRequest};
//!
//! let engine = LinkSearchEngine::new(db.search.clone(), SearchConfig::from_env())
//!     .with_embedder(embedder);
//! let page = engine
//!     .search(user_id, &SearchRequest::default().with_tag_ids(["__NO_TAGS__"]).with_limit(2))
//!     .await?;
//! ```

pub mod cursor;
pub mod engine;
pub mod request;

pub use cursor::PageCursor;
pub use engine::{LinkSearchEngine, SearchConfig};
pub use request::{ParsedRequest, SearchMode, SearchRequest};

pub use ranj_core::{Error, LinkPage, LinkSummary, Result, TagFilter, NO_TAGS_SENTINEL};
