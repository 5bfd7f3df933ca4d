//! Embedding cache.
//!
//! Embeddings are keyed by `embedding:<model>:<sha256(text)>` and expire after a
//! configurable TTL (default one day). The cache is an optimization only:
//! [`CachedEmbedder`] treats any cache error as a miss and keeps going.
//!
//! ## Configuration
//!
//! - `REDIS_ENABLED`: set to "false" to disable caching (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `EMBEDDING_CACHE_TTL_SECS`: entry lifetime in seconds (default: 86400)

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use ranj_core::{defaults, EmbeddingBackend, EmbeddingCache, Error, Result, Vector};

/// Cache key for a piece of text embedded by `model`.
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!(
        "{}{}:{}",
        defaults::EMBED_CACHE_PREFIX,
        model,
        hex::encode(hasher.finalize())
    )
}

/// Entry lifetime from `EMBEDDING_CACHE_TTL_SECS`.
pub fn ttl_from_env() -> Duration {
    let secs = std::env::var("EMBEDDING_CACHE_TTL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::EMBED_CACHE_TTL_SECS);
    Duration::from_secs(secs)
}

// =============================================================================
// REDIS
// =============================================================================

/// Redis-backed embedding cache. A disabled cache misses on every read and
/// drops every write.
#[derive(Clone)]
pub struct RedisEmbeddingCache {
    connection: Option<ConnectionManager>,
}

impl RedisEmbeddingCache {
    pub async fn from_env() -> Self {
        let enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        if !enabled {
            info!(
                subsystem = "inference",
                component = "embedding_cache",
                "Embedding cache disabled via REDIS_ENABLED"
            );
            return Self::disabled();
        }

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        match Self::connect(&redis_url).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "embedding_cache",
                    error = %e,
                    "Failed to connect to Redis, embedding cache disabled"
                );
                Self::disabled()
            }
        }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Cache(format!("Invalid Redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Cache(format!("Redis connection failed: {}", e)))?;
        info!(
            subsystem = "inference",
            component = "embedding_cache",
            "Redis embedding cache enabled"
        );
        Ok(Self {
            connection: Some(connection),
        })
    }

    pub fn disabled() -> Self {
        Self { connection: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.connection.is_some()
    }
}

#[async_trait]
impl EmbeddingCache for RedisEmbeddingCache {
    async fn get(&self, key: &str) -> Result<Option<Vector>> {
        let Some(mut conn) = self.connection.clone() else {
            return Ok(None);
        };

        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| Error::Cache(format!("GET {} failed: {}", key, e)))?;

        match raw {
            Some(json) => {
                let values: Vec<f32> = serde_json::from_str(&json)?;
                Ok(Some(Vector::from(values)))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, embedding: &Vector, ttl: Duration) -> Result<()> {
        let Some(mut conn) = self.connection.clone() else {
            return Ok(());
        };

        let json = serde_json::to_string(embedding.as_slice())?;
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::Cache(format!("SETEX {} failed: {}", key, e)))
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local cache with per-entry expiry.
#[derive(Default)]
pub struct MemoryEmbeddingCache {
    entries: Mutex<HashMap<String, (Vec<f32>, Instant)>>,
    fail_reads: bool,
    fail_writes: bool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryEmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache whose reads and writes always error.
    pub fn failing() -> Self {
        Self {
            fail_reads: true,
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (Vec<f32>, Instant)>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Cache("cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl EmbeddingCache for MemoryEmbeddingCache {
    async fn get(&self, key: &str) -> Result<Option<Vector>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.fail_reads {
            return Err(Error::Cache("cache unavailable".to_string()));
        }

        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((values, expires_at)) if *expires_at > Instant::now() => {
                Ok(Some(Vector::from(values.clone())))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, embedding: &Vector, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes {
            return Err(Error::Cache("cache unavailable".to_string()));
        }

        self.lock()?.insert(
            key.to_string(),
            (embedding.as_slice().to_vec(), Instant::now() + ttl),
        );
        Ok(())
    }
}

// =============================================================================
// CACHED EMBEDDER
// =============================================================================

/// Embedding backend that consults a cache before calling the provider.
#[derive(Clone)]
pub struct CachedEmbedder {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Arc<dyn EmbeddingCache>,
    ttl: Duration,
}

impl CachedEmbedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self {
            backend,
            cache,
            ttl: Duration::from_secs(defaults::EMBED_CACHE_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn lookup(&self, key: &str) -> Option<Vector> {
        match self.cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "embedding_cache",
                    op = "get",
                    error = %e,
                    "Embedding cache read failed, treating as miss"
                );
                None
            }
        }
    }

    async fn store(&self, key: &str, embedding: &Vector) {
        if let Err(e) = self.cache.set(key, embedding, self.ttl).await {
            warn!(
                subsystem = "inference",
                component = "embedding_cache",
                op = "set",
                error = %e,
                "Embedding cache write failed"
            );
        }
    }
}

#[async_trait]
impl EmbeddingBackend for CachedEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let model = self.backend.model_name();
        let keys: Vec<String> = texts.iter().map(|t| cache_key(model, t)).collect();
        let mut results: Vec<Option<Vector>> = Vec::with_capacity(texts.len());
        for key in &keys {
            results.push(self.lookup(key).await);
        }

        let missing: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        debug!(
            subsystem = "inference",
            component = "embedding_cache",
            op = "embed_texts",
            input_count = texts.len(),
            cache_hits = texts.len() - missing.len(),
            "Embedding cache lookup"
        );

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let computed = self.backend.embed_texts(&batch).await?;
            if computed.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    computed.len()
                )));
            }
            for (&i, embedding) in missing.iter().zip(computed) {
                self.store(&keys[i], &embedding).await;
                results[i] = Some(embedding);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}
