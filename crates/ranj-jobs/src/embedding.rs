//! Embedding backfill for links stored without a vector.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use ranj_core::{EmbeddingBackend, LinkRepository, Result};

/// Outcome of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Links that had no embedding when the run started.
    pub scanned: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Computes and stores embeddings for a user's links.
pub struct EmbeddingBackfill {
    links: Arc<dyn LinkRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
}

impl EmbeddingBackfill {
    pub fn new(links: Arc<dyn LinkRepository>, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self { links, embedder }
    }

    /// Embed every link of `user_id` that has no embedding yet.
    ///
    /// A failure on one link is logged and counted; the run continues with
    /// the next link. Only a failure to list the links aborts the run.
    pub async fn run(&self, user_id: Uuid) -> Result<BackfillReport> {
        let start = Instant::now();
        let pending = self.links.list_missing_embedding(user_id).await?;
        let mut report = BackfillReport {
            scanned: pending.len(),
            ..Default::default()
        };

        for link in pending {
            let text = link.embedding_text();
            let outcome = match self.embedder.embed(&text).await {
                Ok(vector) => self.links.set_embedding(link.id, &vector).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => report.embedded += 1,
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "embedding_backfill",
                        link_id = %link.id,
                        error = %e,
                        "Failed to embed link"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            subsystem = "jobs",
            component = "embedding_backfill",
            user_id = %user_id,
            scanned = report.scanned,
            embedded = report.embedded,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding backfill finished"
        );
        Ok(report)
    }
}
