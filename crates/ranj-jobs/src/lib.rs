//! # ranj-jobs
//!
//! Background job processing for ranj.
//!
//! This crate provides:
//! - An immutable [`HandlerRegistry`] mapping event kinds to handlers
//! - The [`JobExecutor`] polling loop: batch claim, concurrent fan-out,
//!   idle/busy back-off, per-job timeout and panic isolation
//! - [`ScrapeOgHandler`], which enriches a link with its page metadata
//! - [`EmbeddingBackfill`], which embeds links that have no vector yet
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ranj_jobs::{HandlerRegistry, HttpMetadataFetcher, ScrapeOgHandler, WorkerBuilder, WorkerConfig};
//!
//! let registry = HandlerRegistry::builder()
//!     .register(ScrapeOgHandler::new(links, Arc::new(HttpMetadataFetcher::from_env()?)))
//!     .build();
//!
//! let handle = WorkerBuilder::new(jobs)
//!     .with_config(WorkerConfig::from_env())
//!     .with_registry(registry)
//!     .build()
//!     .start();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod embedding;
pub mod handler;
pub mod scrape;
pub mod worker;

// Re-export core types
pub use ranj_core::*;

pub use embedding::{BackfillReport, EmbeddingBackfill};
pub use handler::{HandlerRegistry, HandlerRegistryBuilder, JobContext, JobHandler, JobResult};
pub use scrape::{
    check_reachable, parse_link_metadata, HttpMetadataFetcher, MetadataFetcher, ScrapeOgHandler,
};
pub use worker::{JobExecutor, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
