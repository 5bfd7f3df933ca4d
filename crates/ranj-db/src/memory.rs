//! In-memory implementation of every repository trait.
//!
//! Used as the test double for the executor, handlers and search engine.
//! All state sits behind one mutex, so `claim_batch` selects and marks jobs
//! in a single critical section the same way the Postgres claim does in a
//! single statement.
//!
//! Full-text matching is approximated: every whitespace-separated query term
//! must occur (case-insensitively) in the title, description or notes text.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use ranj_core::{
    defaults, extract_text_from_notes, new_v7, Error, Job, JobEvent, JobRepository, JobStatus,
    LexicalQuery, Link, LinkMetadata, LinkRepository, LinkSearchRepository, LinkState,
    LinkSummary, LinkUpdate, NewJob, Result, SemanticQuery, SubmittedLink, Tag, TagAssignment,
    TagRepository, Vector,
};

/// System tags every fresh store starts with.
pub const SYSTEM_TAGS: &[(&str, &str)] = &[
    ("Technology", "#EF4444"),
    ("Health", "#10B981"),
    ("Finance", "#3B82F6"),
    ("Science", "#F59E0B"),
    ("Entertainment", "#6366F1"),
    ("Reading", "#8B5CF6"),
];

#[derive(Debug, Clone)]
struct StoredLink {
    link: Link,
    embedding: Option<Vector>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    links: HashMap<Uuid, StoredLink>,
    tags: HashMap<Uuid, Tag>,
    /// (link_id, tag_id)
    link_tags: BTreeSet<(Uuid, Uuid)>,
}

impl State {
    fn tag_ids_for(&self, link_id: Uuid) -> Vec<Uuid> {
        self.link_tags
            .iter()
            .filter(|(l, _)| *l == link_id)
            .map(|(_, t)| *t)
            .collect()
    }

    fn tags_for(&self, link_id: Uuid) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .tag_ids_for(link_id)
            .into_iter()
            .filter_map(|id| self.tags.get(&id).cloned())
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    fn summary(&self, stored: &StoredLink, score: Option<f64>) -> LinkSummary {
        let link = &stored.link;
        LinkSummary {
            id: link.id,
            url: link.url.clone(),
            title: link.title.clone(),
            description: link.description.clone(),
            image: link.image.clone(),
            state: link.state,
            created_at: link.created_at,
            tags: self.tags_for(link.id).iter().map(Tag::summary).collect(),
            score,
        }
    }

    fn owned_link_mut(&mut self, link_id: Uuid, user_id: Uuid) -> Result<&mut StoredLink> {
        self.links
            .get_mut(&link_id)
            .filter(|s| s.link.user_id == user_id)
            .ok_or(Error::LinkNotFound(link_id))
    }

    /// Lexical candidates in `created_at DESC, id DESC` order, cursor ignored.
    fn lexical_matches(&self, query: &LexicalQuery) -> Vec<(&StoredLink, Option<f64>)> {
        let terms = query_terms(query.text.as_deref());
        let mut rows: Vec<(&StoredLink, Option<f64>)> = self
            .links
            .values()
            .filter(|s| s.link.user_id == query.user_id)
            .filter(|s| query.tags.matches(&self.tag_ids_for(s.link.id)))
            .filter_map(|s| {
                if terms.is_empty() {
                    Some((s, None))
                } else {
                    text_rank(&s.link, &terms).map(|rank| (s, Some(rank)))
                }
            })
            .collect();
        rows.sort_by(|(a, _), (b, _)| {
            b.link
                .created_at
                .cmp(&a.link.created_at)
                .then(b.link.id.cmp(&a.link.id))
        });
        rows
    }

    /// Semantic candidates above the floor in `similarity DESC, id DESC`
    /// order, cursor ignored.
    fn semantic_matches(&self, query: &SemanticQuery) -> Vec<(&StoredLink, f64)> {
        let mut rows: Vec<(&StoredLink, f64)> = self
            .links
            .values()
            .filter(|s| s.link.user_id == query.user_id)
            .filter(|s| query.tags.matches(&self.tag_ids_for(s.link.id)))
            .filter_map(|s| {
                s.embedding
                    .as_ref()
                    .map(|e| (s, cosine_similarity(e.as_slice(), query.embedding.as_slice())))
            })
            .filter(|(_, sim)| *sim > query.floor)
            .collect();
        rows.sort_by(|(a, sa), (b, sb)| {
            sb.total_cmp(sa).then(b.link.id.cmp(&a.link.id))
        });
        rows
    }
}

fn query_terms(text: Option<&str>) -> Vec<String> {
    text.unwrap_or_default()
        .split_whitespace()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Weighted rank of a link against every term, or `None` if a term is missing.
fn text_rank(link: &Link, terms: &[String]) -> Option<f64> {
    let fields = [
        (link.title.as_deref().unwrap_or_default().to_lowercase(), 1.0),
        (link.description.as_deref().unwrap_or_default().to_lowercase(), 0.4),
        (link.notes_text.as_deref().unwrap_or_default().to_lowercase(), 0.2),
    ];
    let mut rank = 0.0;
    for term in terms {
        let weight: f64 = fields
            .iter()
            .filter(|(text, _)| text.contains(term.as_str()))
            .map(|(_, w)| *w)
            .sum();
        if weight == 0.0 {
            return None;
        }
        rank += weight;
    }
    Some(rank)
}

/// Cosine similarity, `1 - cosine distance`. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-memory store implementing the job, link, tag and search repositories.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_claims: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store seeded with the system tags.
    pub fn new() -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.state.lock() {
            for (name, color) in SYSTEM_TAGS {
                let tag = Tag {
                    id: new_v7(),
                    name: (*name).to_string(),
                    color: (*color).to_string(),
                    is_system: true,
                    user_id: None,
                };
                state.tags.insert(tag.id, tag);
            }
        }
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }

    /// Make the next `n` calls to `claim_batch` fail, simulating a lost
    /// database connection.
    pub fn fail_next_claims(&self, n: usize) {
        self.failing_claims.store(n, Ordering::SeqCst);
    }

    /// Insert a processed link with explicit fields, bypassing job creation.
    pub fn insert_link(
        &self,
        user_id: Uuid,
        title: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Link> {
        let link = Link {
            id: new_v7(),
            url: format!("https://example.com/{}", title.to_lowercase().replace(' ', "-")),
            title: Some(title.to_string()),
            description: None,
            image: None,
            state: LinkState::Processed,
            notes: None,
            notes_text: None,
            has_embedding: false,
            user_id,
            created_at,
        };
        self.lock()?.links.insert(
            link.id,
            StoredLink {
                link: link.clone(),
                embedding: None,
            },
        );
        Ok(link)
    }

    /// Attach a tag to a link without ownership checks.
    pub fn attach_tag(&self, link_id: Uuid, tag_id: Uuid) -> Result<()> {
        let mut state = self.lock()?;
        if !state.links.contains_key(&link_id) {
            return Err(Error::LinkNotFound(link_id));
        }
        if !state.tags.contains_key(&tag_id) {
            return Err(Error::NotFound(format!("tag {tag_id}")));
        }
        state.link_tags.insert((link_id, tag_id));
        Ok(())
    }

    /// Create a tag owned by `user_id`.
    pub fn create_user_tag(&self, user_id: Uuid, name: &str, color: &str) -> Result<Tag> {
        let tag = Tag {
            id: new_v7(),
            name: name.to_string(),
            color: color.to_string(),
            is_system: false,
            user_id: Some(user_id),
        };
        self.lock()?.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    /// Overwrite a job's lock time, for exercising stale-lock recovery.
    pub fn set_locked_at(&self, job_id: Uuid, locked_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock()?;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        job.locked_at = Some(locked_at);
        Ok(())
    }

    /// Number of stored jobs in any status.
    pub fn job_count(&self) -> Result<usize> {
        Ok(self.lock()?.jobs.len())
    }

    /// The stored job if `claimed` still holds its lock, `None` if it has
    /// already finished.
    fn owned_job<'a>(state: &'a mut State, claimed: &Job) -> Result<Option<&'a mut Job>> {
        let job = state
            .jobs
            .get_mut(&claimed.id)
            .ok_or(Error::JobNotFound(claimed.id))?;
        if job.status == JobStatus::Processing
            && job.locked_at.is_some()
            && job.locked_at == claimed.locked_at
        {
            Ok(Some(job))
        } else if job.status.is_terminal() {
            Ok(None)
        } else {
            Err(Error::lock_lost(claimed.id))
        }
    }

    fn insert_job_locked(state: &mut State, job: &NewJob) -> Job {
        let now = Utc::now();
        let job = Job {
            id: new_v7(),
            url: job.url.clone(),
            event: job.event.clone(),
            status: JobStatus::Pending,
            priority: job.priority,
            created_at: now,
            updated_at: now,
            locked_at: None,
            link_id: job.link_id,
            error_message: None,
        };
        state.jobs.insert(job.id, job.clone());
        job
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        let mut state = self.lock()?;
        if !state.links.contains_key(&job.link_id) {
            return Err(Error::LinkNotFound(job.link_id));
        }
        Ok(Self::insert_job_locked(&mut state, &job))
    }

    async fn claim_batch(&self, limit: i64) -> Result<Vec<Job>> {
        let failing = self
            .failing_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let mut state = self.lock()?;
        let mut candidates: Vec<&Job> = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.locked_at.is_none())
            .collect();
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        let ids: Vec<Uuid> = candidates
            .into_iter()
            .take(limit as usize)
            .map(|j| j.id)
            .collect();

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = state.jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.locked_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, claimed: &Job) -> Result<()> {
        let mut state = self.lock()?;
        let Some(job) = Self::owned_job(&mut state, claimed)? else {
            return Ok(());
        };
        job.status = JobStatus::Completed;
        job.locked_at = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, claimed: &Job, reason: &str) -> Result<()> {
        let mut state = self.lock()?;
        let Some(job) = Self::owned_job(&mut state, claimed)? else {
            return Ok(());
        };
        job.status = JobStatus::Failed;
        job.locked_at = None;
        job.updated_at = Utc::now();
        job.error_message = Some(reason.to_string());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(&job_id).cloned())
    }

    async fn list_for_link(&self, link_id: Uuid) -> Result<Vec<Job>> {
        let state = self.lock()?;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.link_id == link_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn pending_count(&self) -> Result<i64> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.locked_at.is_none())
            .count() as i64)
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(older_than)
                .map_err(|e| Error::InvalidInput(format!("stale lock timeout: {e}")))?;
        let mut state = self.lock()?;
        let mut released = 0;
        for job in state.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.locked_at.is_some_and(|t| t < cutoff) {
                job.status = JobStatus::Pending;
                job.locked_at = None;
                job.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl LinkRepository for MemoryStore {
    async fn submit(&self, user_id: Uuid, url: &str) -> Result<SubmittedLink> {
        let mut state = self.lock()?;
        let link = Link {
            id: new_v7(),
            url: url.to_string(),
            title: None,
            description: None,
            image: None,
            state: LinkState::Processing,
            notes: None,
            notes_text: None,
            has_embedding: false,
            user_id,
            created_at: Utc::now(),
        };
        state.links.insert(
            link.id,
            StoredLink {
                link: link.clone(),
                embedding: None,
            },
        );
        let job = Self::insert_job_locked(
            &mut state,
            &NewJob::new(link.id, url, JobEvent::ScrapeOg)
                .with_priority(defaults::SCRAPE_JOB_PRIORITY),
        );
        Ok(SubmittedLink { link, job })
    }

    async fn get(&self, link_id: Uuid, user_id: Uuid) -> Result<Link> {
        self.lock()?
            .links
            .get(&link_id)
            .filter(|s| s.link.user_id == user_id)
            .map(|s| s.link.clone())
            .ok_or(Error::LinkNotFound(link_id))
    }

    async fn find(&self, link_id: Uuid) -> Result<Option<Link>> {
        Ok(self.lock()?.links.get(&link_id).map(|s| s.link.clone()))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Link>> {
        let state = self.lock()?;
        let mut links: Vec<Link> = state
            .links
            .values()
            .filter(|s| s.link.user_id == user_id)
            .map(|s| s.link.clone())
            .collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(links)
    }

    async fn update(&self, link_id: Uuid, user_id: Uuid, update: LinkUpdate) -> Result<Link> {
        let mut state = self.lock()?;
        let stored = state.owned_link_mut(link_id, user_id)?;
        let link = &mut stored.link;
        if let Some(url) = update.url {
            link.url = url;
        }
        if let Some(title) = update.title {
            link.title = Some(title);
        }
        if let Some(description) = update.description {
            link.description = Some(description);
        }
        if let Some(image) = update.image {
            link.image = Some(image);
        }
        if let Some(notes) = update.notes {
            link.notes_text = Some(extract_text_from_notes(&notes));
            link.notes = Some(notes);
        }
        Ok(link.clone())
    }

    async fn apply_metadata(&self, link_id: Uuid, metadata: &LinkMetadata) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .links
            .get_mut(&link_id)
            .ok_or(Error::LinkNotFound(link_id))?;
        let link = &mut stored.link;
        if metadata.title.is_some() {
            link.title = metadata.title.clone();
        }
        if metadata.description.is_some() {
            link.description = metadata.description.clone();
        }
        if metadata.image.is_some() {
            link.image = metadata.image.clone();
        }
        link.state = LinkState::Processed;
        Ok(())
    }

    async fn delete(&self, link_id: Uuid, user_id: Uuid) -> Result<()> {
        let mut state = self.lock()?;
        state.owned_link_mut(link_id, user_id)?;
        state.links.remove(&link_id);
        state.jobs.retain(|_, j| j.link_id != link_id);
        state.link_tags.retain(|(l, _)| *l != link_id);
        Ok(())
    }

    async fn list_missing_embedding(&self, user_id: Uuid) -> Result<Vec<Link>> {
        let state = self.lock()?;
        let mut links: Vec<Link> = state
            .links
            .values()
            .filter(|s| s.link.user_id == user_id && s.embedding.is_none())
            .map(|s| s.link.clone())
            .collect();
        links.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(links)
    }

    async fn set_embedding(&self, link_id: Uuid, embedding: &Vector) -> Result<()> {
        let mut state = self.lock()?;
        let stored = state
            .links
            .get_mut(&link_id)
            .ok_or(Error::LinkNotFound(link_id))?;
        stored.embedding = Some(embedding.clone());
        stored.link.has_embedding = true;
        Ok(())
    }
}

#[async_trait]
impl TagRepository for MemoryStore {
    async fn list_system(&self) -> Result<Vec<Tag>> {
        let state = self.lock()?;
        let mut tags: Vec<Tag> = state.tags.values().filter(|t| t.is_system).cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn list_visible(&self, user_id: Uuid) -> Result<Vec<Tag>> {
        let state = self.lock()?;
        let mut tags: Vec<Tag> = state
            .tags
            .values()
            .filter(|t| t.is_visible_to(user_id))
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn for_link(&self, link_id: Uuid) -> Result<Vec<Tag>> {
        Ok(self.lock()?.tags_for(link_id))
    }

    async fn other_available(&self, link_id: Uuid) -> Result<Vec<Tag>> {
        let state = self.lock()?;
        let attached = state.tag_ids_for(link_id);
        let mut tags: Vec<Tag> = state
            .tags
            .values()
            .filter(|t| t.is_system && !attached.contains(&t.id))
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn set_for_link(
        &self,
        link_id: Uuid,
        user_id: Uuid,
        tags: &[TagAssignment],
    ) -> Result<Vec<Tag>> {
        let mut state = self.lock()?;
        state.owned_link_mut(link_id, user_id)?;

        // Validate everything before mutating so a rejected request leaves
        // the previous tag set intact.
        for assignment in tags {
            if let Some(tag_id) = assignment.id {
                let visible = state
                    .tags
                    .get(&tag_id)
                    .is_some_and(|t| t.is_visible_to(user_id));
                if !visible {
                    return Err(Error::InvalidInput(format!("unknown tag id: {tag_id}")));
                }
            }
        }

        let mut resolved: Vec<Tag> = Vec::with_capacity(tags.len());
        for assignment in tags {
            let tag = match assignment.id.and_then(|id| state.tags.get(&id).cloned()) {
                Some(existing) => existing,
                None => {
                    let tag = Tag {
                        id: new_v7(),
                        name: assignment.name.clone(),
                        color: assignment.color.clone(),
                        is_system: false,
                        user_id: Some(user_id),
                    };
                    state.tags.insert(tag.id, tag.clone());
                    tag
                }
            };
            if !resolved.iter().any(|t| t.id == tag.id) {
                resolved.push(tag);
            }
        }

        state.link_tags.retain(|(l, _)| *l != link_id);
        for tag in &resolved {
            state.link_tags.insert((link_id, tag.id));
        }

        resolved.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resolved)
    }
}

#[async_trait]
impl LinkSearchRepository for MemoryStore {
    async fn lexical_page(&self, query: &LexicalQuery) -> Result<Vec<LinkSummary>> {
        let state = self.lock()?;
        Ok(state
            .lexical_matches(query)
            .into_iter()
            .filter(|(s, _)| {
                query
                    .after
                    .map_or(true, |key| key.precedes(s.link.created_at, s.link.id))
            })
            .take(query.fetch_limit.max(0) as usize)
            .map(|(s, score)| state.summary(s, score))
            .collect())
    }

    async fn lexical_count(&self, query: &LexicalQuery) -> Result<i64> {
        Ok(self.lock()?.lexical_matches(query).len() as i64)
    }

    async fn semantic_page(&self, query: &SemanticQuery) -> Result<Vec<LinkSummary>> {
        let state = self.lock()?;
        Ok(state
            .semantic_matches(query)
            .into_iter()
            .filter(|(s, sim)| {
                query
                    .after
                    .map_or(true, |key| key.precedes(*sim, s.link.id))
            })
            .take(query.fetch_limit.max(0) as usize)
            .map(|(s, sim)| state.summary(s, Some(sim)))
            .collect())
    }

    async fn semantic_count(&self, query: &SemanticQuery) -> Result<i64> {
        Ok(self.lock()?.semantic_matches(query).len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use ranj_core::{RecencyKey, TagFilter};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_submit_creates_processing_link_and_pending_job() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let submitted = store.submit(user, "https://example.com").await.unwrap();

        assert_eq!(submitted.link.state, LinkState::Processing);
        assert!(submitted.link.title.is_none());
        assert_eq!(submitted.job.event, JobEvent::ScrapeOg);
        assert_eq!(submitted.job.status, JobStatus::Pending);
        assert_eq!(submitted.job.priority, 1);
        assert_eq!(submitted.job.link_id, submitted.link.id);
        assert!(submitted.job.locked_at.is_none());
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_age() {
        let store = MemoryStore::new();
        let link = store
            .insert_link(Uuid::new_v4(), "Example", Utc::now())
            .unwrap();

        let low = store
            .insert(NewJob::new(link.id, &link.url, JobEvent::ScrapeOg))
            .await
            .unwrap();
        let high = store
            .insert(NewJob::new(link.id, &link.url, JobEvent::ScrapeOg).with_priority(5))
            .await
            .unwrap();

        let claimed = store.claim_batch(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, high.id);
        assert_eq!(claimed[0].status, JobStatus::Processing);
        assert!(claimed[0].locked_at.is_some());

        let next = store.claim_batch(10).await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id, low.id);
        assert!(store.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let store = Arc::new(MemoryStore::new());
        let link = store
            .insert_link(Uuid::new_v4(), "Example", Utc::now())
            .unwrap();
        for _ in 0..50 {
            store
                .insert(NewJob::new(link.id, &link.url, JobEvent::ScrapeOg))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let batch = store.claim_batch(3).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|j| j.id));
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: BTreeSet<Uuid> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
    }

    #[tokio::test]
    async fn test_mark_completed_is_idempotent() {
        let store = MemoryStore::new();
        let submitted = store.submit(Uuid::new_v4(), "https://example.com").await.unwrap();
        let claimed = store.claim_batch(10).await.unwrap();

        store.mark_completed(&claimed[0]).await.unwrap();
        store.mark_completed(&claimed[0]).await.unwrap();

        let job = JobRepository::get(&store, submitted.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.locked_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_failed_records_reason() {
        let store = MemoryStore::new();
        let submitted = store.submit(Uuid::new_v4(), "https://example.com").await.unwrap();
        let claimed = store.claim_batch(10).await.unwrap();

        store.mark_failed(&claimed[0], "boom").await.unwrap();

        let job = JobRepository::get(&store, submitted.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(store.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completion_after_reclaim_does_not_touch_new_owner() {
        let store = MemoryStore::new();
        let submitted = store.submit(Uuid::new_v4(), "https://example.com").await.unwrap();
        let first = store.claim_batch(10).await.unwrap().remove(0);

        store
            .set_locked_at(first.id, Utc::now() - ChronoDuration::minutes(30))
            .unwrap();
        assert_eq!(store.reclaim_stale(Duration::from_secs(600)).await.unwrap(), 1);
        let second = store.claim_batch(10).await.unwrap().remove(0);
        assert_eq!(second.id, submitted.job.id);
        assert_ne!(second.locked_at, first.locked_at);

        let err = store.mark_completed(&first).await.unwrap_err();
        assert!(matches!(err, Error::Job(_)));
        let err = store.mark_failed(&first, "late").await.unwrap_err();
        assert!(matches!(err, Error::Job(_)));

        let job = JobRepository::get(&store, submitted.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.locked_at, second.locked_at);
        assert!(job.error_message.is_none());

        store.mark_completed(&second).await.unwrap();
        // The stale owner finishing afterwards is a no-op.
        store.mark_failed(&first, "late").await.unwrap();
        let job = JobRepository::get(&store, submitted.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
    }

    #[tokio::test]
    async fn test_mark_completed_unknown_job() {
        let store = MemoryStore::new();
        let submitted = store.submit(Uuid::new_v4(), "https://example.com").await.unwrap();
        let mut ghost = submitted.job.clone();
        ghost.id = Uuid::new_v4();
        let err = store.mark_completed(&ghost).await.unwrap_err();
        assert!(matches!(err, Error::JobNotFound(id) if id == ghost.id));
    }

    #[tokio::test]
    async fn test_reclaim_stale_only_touches_old_locks() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let old = store.submit(user, "https://a.example").await.unwrap();
        let fresh = store.submit(user, "https://b.example").await.unwrap();
        store.claim_batch(10).await.unwrap();
        store
            .set_locked_at(old.job.id, Utc::now() - ChronoDuration::minutes(30))
            .unwrap();

        let released = store
            .reclaim_stale(Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(released, 1);
        let old_job = JobRepository::get(&store, old.job.id).await.unwrap().unwrap();
        let fresh_job = JobRepository::get(&store, fresh.job.id).await.unwrap().unwrap();
        assert_eq!(old_job.status, JobStatus::Pending);
        assert!(old_job.locked_at.is_none());
        assert_eq!(fresh_job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_fail_next_claims() {
        let store = MemoryStore::new();
        store.fail_next_claims(1);
        assert!(store.claim_batch(10).await.is_err());
        assert!(store.claim_batch(10).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_notes_refreshes_notes_text() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let link = store.insert_link(user, "Example", Utc::now()).unwrap();

        let updated = store
            .update(
                link.id,
                user,
                LinkUpdate {
                    notes: Some(serde_json::json!({"content": [{"text": "remember this"}]})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.notes_text.as_deref(), Some("remember this"));
        assert_eq!(updated.title.as_deref(), Some("Example"));
    }

    #[tokio::test]
    async fn test_foreign_link_is_not_found() {
        let store = MemoryStore::new();
        let link = store
            .insert_link(Uuid::new_v4(), "Example", Utc::now())
            .unwrap();

        let err = LinkRepository::get(&store, link.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LinkNotFound(id) if id == link.id));
        assert!(store.delete(link.id, Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_jobs_and_tags() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let submitted = store.submit(user, "https://example.com").await.unwrap();
        let system = store.list_system().await.unwrap();
        store.attach_tag(submitted.link.id, system[0].id).unwrap();

        store.delete(submitted.link.id, user).await.unwrap();

        assert!(JobRepository::get(&store, submitted.job.id).await.unwrap().is_none());
        assert!(store.for_link(submitted.link.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_for_link_replaces_and_creates() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let link = store.insert_link(user, "Example", Utc::now()).unwrap();
        let system = store.list_system().await.unwrap();
        store.attach_tag(link.id, system[0].id).unwrap();

        let tags = store
            .set_for_link(
                link.id,
                user,
                &[
                    TagAssignment {
                        id: Some(system[1].id),
                        name: system[1].name.clone(),
                        color: system[1].color.clone(),
                    },
                    TagAssignment {
                        id: None,
                        name: "AAA later".to_string(),
                        color: "#000000".to_string(),
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "AAA later");
        assert_eq!(tags[0].user_id, Some(user));
        let attached: Vec<Uuid> = store.for_link(link.id).await.unwrap().iter().map(|t| t.id).collect();
        assert!(!attached.contains(&system[0].id));
        assert!(attached.contains(&system[1].id));

        let visible = store.list_visible(user).await.unwrap();
        assert_eq!(visible.len(), SYSTEM_TAGS.len() + 1);
        assert_eq!(store.list_visible(Uuid::new_v4()).await.unwrap().len(), SYSTEM_TAGS.len());
    }

    #[tokio::test]
    async fn test_set_for_link_rejects_foreign_tag() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let link = store.insert_link(user, "Example", Utc::now()).unwrap();
        let foreign = store.create_user_tag(Uuid::new_v4(), "theirs", "#111111").unwrap();

        let err = store
            .set_for_link(
                link.id,
                user,
                &[TagAssignment {
                    id: Some(foreign.id),
                    name: foreign.name.clone(),
                    color: foreign.color.clone(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_other_available_excludes_attached() {
        let store = MemoryStore::new();
        let link = store
            .insert_link(Uuid::new_v4(), "Example", Utc::now())
            .unwrap();
        let system = store.list_system().await.unwrap();
        store.attach_tag(link.id, system[2].id).unwrap();

        let others = store.other_available(link.id).await.unwrap();
        assert_eq!(others.len(), SYSTEM_TAGS.len() - 1);
        assert!(others.iter().all(|t| t.id != system[2].id));
    }

    #[tokio::test]
    async fn test_lexical_page_orders_and_pages() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let older = store
            .insert_link(user, "Older", now - ChronoDuration::hours(1))
            .unwrap();
        let newer = store.insert_link(user, "Newer", now).unwrap();

        let mut query = LexicalQuery {
            user_id: user,
            text: None,
            tags: TagFilter::none(),
            after: None,
            fetch_limit: 10,
        };
        let page = store.lexical_page(&query).await.unwrap();
        assert_eq!(
            page.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
        assert!(page[0].tags.is_empty());

        query.after = Some(RecencyKey {
            created_at: newer.created_at,
            id: newer.id,
        });
        let page = store.lexical_page(&query).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, older.id);
        assert_eq!(store.lexical_count(&query).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lexical_text_requires_every_term() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.insert_link(user, "Rust async book", Utc::now()).unwrap();
        store.insert_link(user, "Rust cookbook", Utc::now()).unwrap();

        let query = LexicalQuery {
            user_id: user,
            text: Some("rust ASYNC".to_string()),
            tags: TagFilter::none(),
            after: None,
            fetch_limit: 10,
        };
        let page = store.lexical_page(&query).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title.as_deref(), Some("Rust async book"));
        assert!(page[0].score.is_some());
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
