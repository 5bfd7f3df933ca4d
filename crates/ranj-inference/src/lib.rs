//! # ranj-inference
//!
//! Embedding generation for ranj.
//!
//! - [`OpenAIBackend`]: OpenAI-compatible `/embeddings` client
//! - [`MockEmbeddingBackend`]: deterministic vectors for tests
//! - [`CachedEmbedder`]: wraps any backend with a keyed, expiring cache
//!   ([`RedisEmbeddingCache`] in production, [`MemoryEmbeddingCache`] in tests)

pub mod cache;
pub mod mock;
pub mod openai;

pub use cache::{cache_key, CachedEmbedder, MemoryEmbeddingCache, RedisEmbeddingCache};
pub use mock::MockEmbeddingBackend;
pub use openai::{OpenAIBackend, OpenAIConfig};

pub use ranj_core::{EmbeddingBackend, EmbeddingCache, Error, Result, Vector};
