//! # ranj-db
//!
//! PostgreSQL storage layer for ranj.
//!
//! This crate provides:
//! - Connection pool management
//! - The job queue with `FOR UPDATE SKIP LOCKED` batch claiming
//! - Link and tag repositories
//! - Link search over weighted tsvector and pgvector cosine distance
//! - An in-memory store implementing the same traits, for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use ranj_db::{Database, LinkRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/ranj").await?;
//!     let submitted = db.links.submit(user_id, "https://example.com").await?;
//!     println!("Queued job {}", submitted.job.id);
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod link_query;
pub mod links;
pub mod memory;
pub mod pool;
pub mod search;
pub mod tags;

// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use ranj_core::*;

pub use jobs::PgJobRepository;
pub use links::PgLinkRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use search::PgLinkSearch;
pub use tags::PgTagRepository;

use std::sync::Arc;

/// Database handle bundling every Postgres repository.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub jobs: Arc<PgJobRepository>,
    pub links: Arc<PgLinkRepository>,
    pub tags: Arc<PgTagRepository>,
    pub search: Arc<PgLinkSearch>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            links: Arc::new(PgLinkRepository::new(pool.clone())),
            tags: Arc::new(PgTagRepository::new(pool.clone())),
            search: Arc::new(PgLinkSearch::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
