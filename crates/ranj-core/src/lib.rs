//! # ranj-core
//!
//! Core types, traits, and abstractions shared by the ranj crates.
//!
//! The job queue, the link store and the search engine all talk to each
//! other through the repository traits defined here, so every component
//! can be constructed with either the Postgres implementations from
//! `ranj-db` or an in-memory double.

pub mod defaults;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod notes;
pub mod search;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use export::export_netscape;
pub use models::*;
pub use notes::extract_text_from_notes;
pub use search::*;
pub use traits::*;
pub use uuid_utils::new_v7;
