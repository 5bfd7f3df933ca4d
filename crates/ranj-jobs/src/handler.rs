//! Job handlers and the registry that dispatches to them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use ranj_core::{Job, JobEvent};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// The link this job enriches.
    pub fn link_id(&self) -> Uuid {
        self.job.link_id
    }

    pub fn url(&self) -> &str {
        &self.job.url
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Success,
    /// Job failed with an error message. Failed jobs are not retried.
    Failed(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success)
    }
}

impl<T> From<ranj_core::Result<T>> for JobResult {
    fn from(result: ranj_core::Result<T>) -> Self {
        match result {
            Ok(_) => JobResult::Success,
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The event kind this handler processes.
    fn event(&self) -> JobEvent;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// Immutable mapping from event kind to handler.
///
/// Built once at startup with [`HandlerRegistry::builder`] and shared by
/// `Arc` afterwards; there is no way to add handlers to a built registry.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobEvent, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Find the handler for `event`.
    ///
    /// Unknown event kinds never resolve, even if a handler claimed one.
    pub fn lookup(&self, event: &JobEvent) -> Option<Arc<dyn JobHandler>> {
        match event {
            JobEvent::ScrapeOg => self.handlers.get(event).cloned(),
            JobEvent::Unknown(_) => None,
        }
    }

    /// Known event kinds with no registered handler.
    pub fn missing(&self) -> Vec<JobEvent> {
        JobEvent::KNOWN
            .iter()
            .filter(|event| !self.handlers.contains_key(event))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered event kinds, sorted by name.
    pub fn events(&self) -> Vec<JobEvent> {
        let mut events: Vec<JobEvent> = self.handlers.keys().cloned().collect();
        events.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        events
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("events", &self.events())
            .finish()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<JobEvent, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register a handler. A later registration for the same event replaces
    /// the earlier one.
    pub fn register<H: JobHandler + 'static>(self, handler: H) -> Self {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(mut self, handler: Arc<dyn JobHandler>) -> Self {
        let event = handler.event();
        if !event.is_known() {
            warn!(
                subsystem = "jobs",
                job_event = %event,
                "Registering handler for unknown event kind; it will never be dispatched"
            );
        }
        debug!(subsystem = "jobs", job_event = %event, "Registered job handler");
        self.handlers.insert(event, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        let registry = HandlerRegistry {
            handlers: self.handlers,
        };
        for event in registry.missing() {
            warn!(
                subsystem = "jobs",
                job_event = %event,
                "No handler registered for known event kind"
            );
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ranj_core::JobStatus;

    struct StaticHandler {
        event: JobEvent,
        result: JobResult,
    }

    #[async_trait]
    impl JobHandler for StaticHandler {
        fn event(&self) -> JobEvent {
            self.event.clone()
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            self.result.clone()
        }
    }

    fn job(event: JobEvent) -> Job {
        Job {
            id: Uuid::new_v4(),
            url: "https://example.com".to_string(),
            event,
            status: JobStatus::Processing,
            priority: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            locked_at: Some(Utc::now()),
            link_id: Uuid::new_v4(),
            error_message: None,
        }
    }

    #[test]
    fn test_job_context_accessors() {
        let job = job(JobEvent::ScrapeOg);
        let ctx = JobContext::new(job.clone());
        assert_eq!(ctx.link_id(), job.link_id);
        assert_eq!(ctx.url(), "https://example.com");
    }

    #[test]
    fn test_job_result_from_result() {
        let ok: ranj_core::Result<()> = Ok(());
        assert_eq!(JobResult::from(ok), JobResult::Success);

        let err: ranj_core::Result<()> = Err(ranj_core::Error::Scrape("timed out".into()));
        match JobResult::from(err) {
            JobResult::Failed(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lookup_registered_handler() {
        let registry = HandlerRegistry::builder()
            .register(StaticHandler {
                event: JobEvent::ScrapeOg,
                result: JobResult::Success,
            })
            .build();

        let handler = registry.lookup(&JobEvent::ScrapeOg).expect("handler");
        let result = handler.execute(JobContext::new(job(JobEvent::ScrapeOg))).await;
        assert!(result.is_success());
        assert!(registry.missing().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown_event_is_none() {
        let registry = HandlerRegistry::builder()
            .register(StaticHandler {
                event: JobEvent::Unknown("send_email".into()),
                result: JobResult::Success,
            })
            .build();

        assert!(registry
            .lookup(&JobEvent::Unknown("send_email".into()))
            .is_none());
        assert!(registry.lookup(&JobEvent::ScrapeOg).is_none());
        assert_eq!(registry.missing(), vec![JobEvent::ScrapeOg]);
    }

    #[test]
    fn test_later_registration_replaces_earlier() {
        let registry = HandlerRegistry::builder()
            .register(StaticHandler {
                event: JobEvent::ScrapeOg,
                result: JobResult::Failed("first".into()),
            })
            .register(StaticHandler {
                event: JobEvent::ScrapeOg,
                result: JobResult::Success,
            })
            .build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.events(), vec![JobEvent::ScrapeOg]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.lookup(&JobEvent::ScrapeOg).is_none());
    }
}
