//! Structured logging field name constants.
//!
//! All crates use these names for structured `tracing` fields so log
//! queries work the same across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), job outcomes |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-row iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "jobs", "search", "inference", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "executor", "scrape_og", "pool", "embedding_cache"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_batch", "search", "embed_texts"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

pub const JOB_ID: &str = "job_id";

/// Job event kind.
pub const JOB_EVENT: &str = "job_event";

pub const LINK_ID: &str = "link_id";

pub const USER_ID: &str = "user_id";

/// Search query text.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Jobs claimed in one poll.
pub const BATCH_SIZE: &str = "batch_size";

/// Whether a cache lookup hit.
pub const CACHE_HIT: &str = "cache_hit";
