//! Centralized default constants for ranj.
//!
//! Config structs fall back to these when the corresponding environment
//! variable is not set.

// =============================================================================
// JOB EXECUTOR
// =============================================================================

/// Maximum jobs claimed per poll.
pub const JOB_BATCH_SIZE: i64 = 10;

/// Sleep after a poll that claimed nothing (or failed).
pub const JOB_IDLE_INTERVAL_MS: u64 = 2_000;

/// Sleep after a poll that claimed at least one job.
pub const JOB_BUSY_INTERVAL_MS: u64 = 100;

/// Per-job execution timeout.
pub const JOB_TIMEOUT_SECS: u64 = 60;

/// How far the stale lock threshold must exceed the job timeout, so the
/// sweep never reclaims a job whose handler can still be running.
pub const STALE_LOCK_MARGIN_SECS: u64 = 30;

/// Priority given to the scrape job created with a link.
pub const SCRAPE_JOB_PRIORITY: i32 = 1;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SCRAPING
// =============================================================================

/// Timeout for page fetches and reachability checks.
pub const SCRAPE_TIMEOUT_SECS: u64 = 5;

/// User agent sent when fetching pages.
pub const SCRAPE_USER_AGENT: &str = "Mozilla/5.0 (compatible; ranj/1.0; +https://github.com/ranj/ranj)";

/// Redirects followed before a fetch is abandoned.
pub const SCRAPE_MAX_REDIRECTS: usize = 5;

/// Largest page body read when scraping. Open Graph tags live in `<head>`,
/// so a longer body is cut at this size before parsing.
pub const SCRAPE_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (OpenAI).
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Embedding dimension of text-embedding-3-small.
pub const EMBED_DIMENSION: usize = 1536;

/// Lifetime of cached query embeddings (24 hours).
pub const EMBED_CACHE_TTL_SECS: u64 = 86_400;

/// Prefix of embedding cache keys.
pub const EMBED_CACHE_PREFIX: &str = "embedding:";

// =============================================================================
// SEARCH
// =============================================================================

/// Default page size for link listings.
pub const PAGE_LIMIT: i64 = 12;

/// Largest page size a caller may request.
pub const PAGE_LIMIT_MAX: i64 = 100;

/// Minimum cosine similarity for semantic results (exclusive).
pub const SIMILARITY_FLOOR: f64 = 0.7;

/// Text search configuration used for tsvector/tsquery.
pub const FTS_CONFIG: &str = "english";

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default minimum idle pool connections.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Seconds to wait for a pooled connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
