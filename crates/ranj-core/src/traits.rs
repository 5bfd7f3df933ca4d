//! Core traits for ranj abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::search::{LexicalQuery, SemanticQuery};

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Persisted queue of link enrichment jobs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a pending, unlocked job.
    async fn insert(&self, job: NewJob) -> Result<Job>;

    /// Atomically claim up to `limit` pending, unlocked jobs.
    ///
    /// Jobs are taken highest priority first, then oldest first, and are
    /// returned already marked `processing` with `locked_at` set. Concurrent
    /// callers never receive the same job.
    async fn claim_batch(&self, limit: i64) -> Result<Vec<Job>>;

    /// Mark a claimed job completed and release its lock.
    ///
    /// `claimed` is the job as returned by `claim_batch`; the update only
    /// applies while the row is still `processing` under that same
    /// `locked_at`. A job that is already completed or failed is left as is
    /// and `Ok(())` is returned. A job that was reclaimed and is now owned by
    /// another execution yields `Error::Job`, leaving the row untouched.
    async fn mark_completed(&self, claimed: &Job) -> Result<()>;

    /// Mark a claimed job failed and release its lock, under the same
    /// ownership rule as `mark_completed`. Failed jobs are never retried.
    async fn mark_failed(&self, claimed: &Job, reason: &str) -> Result<()>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Get all jobs for a link, oldest first.
    async fn list_for_link(&self, link_id: Uuid) -> Result<Vec<Job>>;

    /// Get pending jobs count.
    async fn pending_count(&self) -> Result<i64>;

    /// Return jobs locked for longer than `older_than` to the pending state.
    ///
    /// Returns the number of jobs released.
    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64>;
}

// =============================================================================
// LINK REPOSITORY
// =============================================================================

/// Store of links owned by users.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Create a `processing` link and its `scrape_og` job in one transaction.
    async fn submit(&self, user_id: Uuid, url: &str) -> Result<SubmittedLink>;

    /// Get a link owned by `user_id`.
    ///
    /// Returns `Error::LinkNotFound` for missing or foreign links.
    async fn get(&self, link_id: Uuid, user_id: Uuid) -> Result<Link>;

    /// Get a link regardless of owner. Used by job handlers.
    async fn find(&self, link_id: Uuid) -> Result<Option<Link>>;

    /// List every link of a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Link>>;

    /// Apply user edits. Updating `notes` also refreshes `notes_text`.
    async fn update(&self, link_id: Uuid, user_id: Uuid, update: LinkUpdate) -> Result<Link>;

    /// Store scraped metadata and mark the link processed.
    async fn apply_metadata(&self, link_id: Uuid, metadata: &LinkMetadata) -> Result<()>;

    /// Delete a link; its jobs and tag associations go with it.
    async fn delete(&self, link_id: Uuid, user_id: Uuid) -> Result<()>;

    /// Links of a user that have no embedding yet.
    async fn list_missing_embedding(&self, user_id: Uuid) -> Result<Vec<Link>>;

    /// Store a link's embedding.
    async fn set_embedding(&self, link_id: Uuid, embedding: &Vector) -> Result<()>;
}

// =============================================================================
// TAG REPOSITORY
// =============================================================================

/// Store of tags and link/tag associations.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// System tags, ordered by name.
    async fn list_system(&self) -> Result<Vec<Tag>>;

    /// System tags plus the user's own tags, ordered by name.
    async fn list_visible(&self, user_id: Uuid) -> Result<Vec<Tag>>;

    /// Tags attached to a link, ordered by name.
    async fn for_link(&self, link_id: Uuid) -> Result<Vec<Tag>>;

    /// System tags not yet attached to a link, ordered by name.
    async fn other_available(&self, link_id: Uuid) -> Result<Vec<Tag>>;

    /// Replace the link's tag set.
    ///
    /// Assignments without an id create new tags owned by `user_id`.
    /// Assignments naming a tag the user cannot see are rejected.
    async fn set_for_link(
        &self,
        link_id: Uuid,
        user_id: Uuid,
        tags: &[TagAssignment],
    ) -> Result<Vec<Tag>>;
}

// =============================================================================
// SEARCH
// =============================================================================

/// Read-only query surface used by the search engine.
///
/// Page methods return rows in the mode's ordering with tags attached;
/// count methods apply every predicate except the cursor.
#[async_trait]
pub trait LinkSearchRepository: Send + Sync {
    /// Rows ordered by `created_at DESC, id DESC`.
    async fn lexical_page(&self, query: &LexicalQuery) -> Result<Vec<LinkSummary>>;

    async fn lexical_count(&self, query: &LexicalQuery) -> Result<i64>;

    /// Rows ordered by `similarity DESC, id DESC`, each above the floor.
    async fn semantic_page(&self, query: &SemanticQuery) -> Result<Vec<LinkSummary>>;

    async fn semantic_count(&self, query: &SemanticQuery) -> Result<i64>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vector> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            crate::Error::Embedding("backend returned no embedding".to_string())
        })
    }

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Key/value store for computed embeddings.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vector>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, embedding: &Vector, ttl: Duration) -> Result<()>;
}
