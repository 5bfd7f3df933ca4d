//! Mock embedding backend for deterministic testing.
//!
//! Vectors are derived from a SHA-256 digest of the input text, so the same
//! text always embeds to the same unit vector. Specific texts can be pinned
//! to hand-picked vectors when a test needs to control similarity.
//!
//! # Example
//!
//! ```rust,ignore
//! use ranj_inference::MockEmbeddingBackend;
//!
//! let backend = MockEmbeddingBackend::new()
//!     .with_dimension(3)
//!     .with_vector("rust", vec![1.0, 0.0, 0.0]);
//! let v = backend.embed("rust").await?;
//! ```

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ranj_core::{defaults, EmbeddingBackend, Error, Result, Vector};

/// A recorded call to the mock backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    model: String,
    fixed: HashMap<String, Vec<f32>>,
    failure: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: defaults::EMBED_DIMENSION,
            model: "mock-embedding".to_string(),
            fixed: HashMap::new(),
            failure: None,
        }
    }
}

/// Deterministic embedding backend.
#[derive(Clone, Default)]
pub struct MockEmbeddingBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockEmbeddingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Pin `text` to a specific vector.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .fixed
            .insert(text.into(), vector);
        self
    }

    /// Make every call fail with the given message.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).failure = Some(message.into());
        self
    }

    /// Number of `embed_texts` calls seen so far.
    pub fn embed_call_count(&self) -> usize {
        self.call_log.lock().map(|log| log.len()).unwrap_or(0)
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Vector that `text` embeds to, without recording a call.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(fixed) = self.config.fixed.get(text) {
            return fixed.clone();
        }
        deterministic_vector(text, self.config.dimension)
    }
}

fn deterministic_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(dimension);
    let mut counter: u32 = 0;
    while values.len() < dimension {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for byte in digest.iter() {
            if values.len() == dimension {
                break;
            }
            values.push((*byte as f32 / 127.5) - 1.0);
        }
        counter += 1;
    }

    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
    values
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if let Ok(mut log) = self.call_log.lock() {
            log.push(MockCall {
                texts: texts.to_vec(),
            });
        }

        if let Some(ref message) = self.config.failure {
            return Err(Error::Embedding(message.clone()));
        }

        Ok(texts
            .iter()
            .map(|t| Vector::from(self.vector_for(t)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_text_same_vector() {
        let backend = MockEmbeddingBackend::new().with_dimension(16);
        let a = backend.embed("hello world").await.unwrap();
        let b = backend.embed("hello world").await.unwrap();
        let c = backend.embed("goodbye").await.unwrap();

        assert_eq!(a.as_slice(), b.as_slice());
        assert_ne!(a.as_slice(), c.as_slice());
        assert_eq!(a.as_slice().len(), 16);
        assert_eq!(backend.embed_call_count(), 3);
    }

    #[tokio::test]
    async fn test_vectors_are_unit_length() {
        let backend = MockEmbeddingBackend::new().with_dimension(64);
        let v = backend.embed("normalize me").await.unwrap();
        let norm: f32 = v.as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_fixed_vector() {
        let backend = MockEmbeddingBackend::new()
            .with_dimension(3)
            .with_vector("rust", vec![1.0, 0.0, 0.0]);
        let v = backend.embed("rust").await.unwrap();
        assert_eq!(v.as_slice(), &[1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let backend = MockEmbeddingBackend::new().with_failure("provider down");
        let err = backend.embed("x").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(ref m) if m == "provider down"));
        assert_eq!(backend.embed_call_count(), 1);
        assert_eq!(backend.calls()[0].texts, vec!["x".to_string()]);
    }

    #[test]
    fn test_clones_share_call_log() {
        let backend = MockEmbeddingBackend::new();
        let clone = backend.clone();
        clone.call_log.lock().unwrap().push(MockCall { texts: vec![] });
        assert_eq!(backend.embed_call_count(), 1);
    }
}
