//! Core data models for ranj.
//!
//! These types are shared across all ranj crates and represent the
//! domain entities: links, tags and the jobs that enrich links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

pub use pgvector::Vector;

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a queued job.
///
/// `Pending` jobs are eligible for claiming; `Processing` jobs are owned by
/// exactly one in-flight execution; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job has reached an outcome that will never change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Serialization(format!("unknown job status: {other}"))),
        }
    }
}

/// Kind of work a job carries.
///
/// The set of known kinds is closed; anything else read from storage is kept
/// as `Unknown` so the executor can fail it with a useful message instead of
/// refusing to load the row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum JobEvent {
    /// Scrape Open Graph metadata for the owning link.
    ScrapeOg,
    /// An event kind this build does not know about.
    Unknown(String),
}

impl JobEvent {
    /// Every event kind this build can execute.
    pub const KNOWN: &'static [JobEvent] = &[JobEvent::ScrapeOg];

    pub fn as_str(&self) -> &str {
        match self {
            JobEvent::ScrapeOg => "scrape_og",
            JobEvent::Unknown(kind) => kind,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, JobEvent::Unknown(_))
    }
}

impl From<&str> for JobEvent {
    fn from(s: &str) -> Self {
        match s {
            "scrape_og" => JobEvent::ScrapeOg,
            other => JobEvent::Unknown(other.to_string()),
        }
    }
}

impl From<String> for JobEvent {
    fn from(s: String) -> Self {
        JobEvent::from(s.as_str())
    }
}

impl From<JobEvent> for String {
    fn from(event: JobEvent) -> Self {
        event.as_str().to_string()
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of deferred work tied to one owning link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub url: String,
    pub event: JobEvent,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while the job is claimed by an executor.
    pub locked_at: Option<DateTime<Utc>>,
    pub link_id: Uuid,
    /// Reason recorded by the last `mark_failed`.
    pub error_message: Option<String>,
}

/// Request for inserting a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub url: String,
    pub event: JobEvent,
    pub priority: i32,
    pub link_id: Uuid,
}

impl NewJob {
    pub fn new(link_id: Uuid, url: impl Into<String>, event: JobEvent) -> Self {
        Self {
            url: url.into(),
            event,
            priority: 0,
            link_id,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

// =============================================================================
// LINK TYPES
// =============================================================================

/// Enrichment state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Submitted; metadata not yet authoritative.
    Processing,
    Processed,
    Failed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Processing => "processing",
            LinkState::Processed => "processed",
            LinkState::Failed => "failed",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(LinkState::Processing),
            "processed" => Ok(LinkState::Processed),
            "failed" => Ok(LinkState::Failed),
            other => Err(Error::Serialization(format!("unknown link state: {other}"))),
        }
    }
}

/// A bookmarked URL and its enrichment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: Uuid,
    pub url: String,
    /// `None` while `state` is `Processing` means "still enriching".
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub state: LinkState,
    /// Rich-text document as stored by the editor.
    pub notes: Option<JsonValue>,
    /// Plain-text projection of `notes`, indexed for search.
    pub notes_text: Option<String>,
    pub has_embedding: bool,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Link {
    /// Text used to compute the link's embedding.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {}",
            self.title.as_deref().unwrap_or_default(),
            self.description.as_deref().unwrap_or_default(),
            self.notes_text.as_deref().unwrap_or_default()
        )
    }
}

/// Metadata scraped from a link's page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub site_name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

/// Fields a user may edit on a link. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct LinkUpdate {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub notes: Option<JsonValue>,
}

/// A newly submitted link together with the job that will enrich it.
#[derive(Debug, Clone)]
pub struct SubmittedLink {
    pub link: Link,
    pub job: Job,
}

// =============================================================================
// TAG TYPES
// =============================================================================

/// A label, either shared (system) or owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: String,
    pub is_system: bool,
    /// `None` iff `is_system`.
    pub user_id: Option<Uuid>,
}

impl Tag {
    /// System tags are visible to everyone, user tags only to their owner.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.is_system || self.user_id == Some(user_id)
    }

    pub fn summary(&self) -> TagSummary {
        TagSummary {
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

/// Tag as carried on search result rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSummary {
    pub name: String,
    pub color: String,
}

/// One entry of a link's desired tag set.
///
/// Entries without an `id` create a new tag owned by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagAssignment {
    pub id: Option<Uuid>,
    pub name: String,
    pub color: String,
}

// =============================================================================
// SEARCH RESULT TYPES
// =============================================================================

/// A link row returned by the search engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSummary {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub state: LinkState,
    pub created_at: DateTime<Utc>,
    /// Never contains placeholder entries; a link without tags has `[]`.
    pub tags: Vec<TagSummary>,
    /// Text rank (lexical mode) or cosine similarity (semantic mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPage {
    pub data: Vec<LinkSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Size of the full filtered set, independent of the cursor.
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_event_known_and_unknown() {
        assert_eq!(JobEvent::from("scrape_og"), JobEvent::ScrapeOg);
        let unknown = JobEvent::from("generate_summary");
        assert_eq!(unknown, JobEvent::Unknown("generate_summary".to_string()));
        assert!(!unknown.is_known());
        assert_eq!(unknown.as_str(), "generate_summary");
        assert!(JobEvent::KNOWN.iter().all(JobEvent::is_known));
    }

    #[test]
    fn test_job_event_serde_as_string() {
        let json = serde_json::to_string(&JobEvent::ScrapeOg).unwrap();
        assert_eq!(json, "\"scrape_og\"");
        let parsed: JobEvent = serde_json::from_str("\"other\"").unwrap();
        assert_eq!(parsed, JobEvent::Unknown("other".to_string()));
    }

    #[test]
    fn test_link_state_parse() {
        assert_eq!("processed".parse::<LinkState>().unwrap(), LinkState::Processed);
        assert!("done".parse::<LinkState>().is_err());
    }

    #[test]
    fn test_embedding_text_with_missing_parts() {
        let link = Link {
            id: Uuid::nil(),
            url: "https://example.com".to_string(),
            title: Some("Example".to_string()),
            description: None,
            image: None,
            state: LinkState::Processed,
            notes: None,
            notes_text: Some("read later".to_string()),
            has_embedding: false,
            user_id: Uuid::nil(),
            created_at: Utc::now(),
        };
        assert_eq!(link.embedding_text(), "Example  read later");
    }

    #[test]
    fn test_tag_visibility() {
        let owner = Uuid::new_v4();
        let system = Tag {
            id: Uuid::new_v4(),
            name: "Reading".to_string(),
            color: "#8B5CF6".to_string(),
            is_system: true,
            user_id: None,
        };
        let private = Tag {
            id: Uuid::new_v4(),
            name: "mine".to_string(),
            color: "#000000".to_string(),
            is_system: false,
            user_id: Some(owner),
        };
        let stranger = Uuid::new_v4();
        assert!(system.is_visible_to(stranger));
        assert!(private.is_visible_to(owner));
        assert!(!private.is_visible_to(stranger));
    }

    #[test]
    fn test_link_page_serializes_camel_case() {
        let page = LinkPage {
            data: vec![],
            next_cursor: None,
            has_more: false,
            total: 0,
        };
        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("nextCursor").is_some());
        assert!(json.get("hasMore").is_some());
    }
}
