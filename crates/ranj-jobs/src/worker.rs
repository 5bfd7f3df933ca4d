//! Job executor: the polling loop that claims and runs queued jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use ranj_core::{defaults, Error, Job, JobEvent, JobRepository, Result};

use crate::handler::{HandlerRegistry, JobContext, JobResult};

/// Configuration for the job executor.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Maximum jobs claimed per poll.
    pub batch_size: i64,
    /// Sleep after an empty or failed poll, in milliseconds.
    pub idle_interval_ms: u64,
    /// Sleep after a non-empty batch, in milliseconds.
    pub busy_interval_ms: u64,
    /// Per-job execution timeout in seconds.
    pub job_timeout_secs: u64,
    /// Reset jobs locked longer than this back to pending. `None` disables
    /// the sweep.
    pub stale_lock_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: defaults::JOB_BATCH_SIZE,
            idle_interval_ms: defaults::JOB_IDLE_INTERVAL_MS,
            busy_interval_ms: defaults::JOB_BUSY_INTERVAL_MS,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            stale_lock_timeout: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_BATCH_SIZE` | `10` | Jobs claimed per poll |
    /// | `JOB_IDLE_INTERVAL_MS` | `2000` | Sleep when the queue is empty |
    /// | `JOB_BUSY_INTERVAL_MS` | `100` | Sleep between non-empty batches |
    /// | `JOB_TIMEOUT_SECS` | `60` | Per-job timeout |
    /// | `JOB_STALE_LOCK_SECS` | unset | Stale lock sweep threshold, at least `JOB_TIMEOUT_SECS` + 30 |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let batch_size = std::env::var("JOB_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_BATCH_SIZE)
            .max(1);

        let idle_interval_ms = std::env::var("JOB_IDLE_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_IDLE_INTERVAL_MS);

        let busy_interval_ms = std::env::var("JOB_BUSY_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_BUSY_INTERVAL_MS);

        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_TIMEOUT_SECS);

        let stale_lock_timeout = std::env::var("JOB_STALE_LOCK_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let mut config = Self {
            enabled,
            batch_size,
            idle_interval_ms,
            busy_interval_ms,
            job_timeout_secs,
            stale_lock_timeout,
        };
        config.clamp_stale_lock_timeout();
        config
    }

    /// Shortest stale lock threshold accepted for the configured job timeout.
    pub fn min_stale_lock_timeout(&self) -> Duration {
        Duration::from_secs(
            self.job_timeout_secs
                .saturating_add(defaults::STALE_LOCK_MARGIN_SECS),
        )
    }

    /// Raise the stale lock threshold to `min_stale_lock_timeout` if it is
    /// below it. Returns the requested value when it was raised.
    fn clamp_stale_lock_timeout(&mut self) -> Option<Duration> {
        let min = self.min_stale_lock_timeout();
        match self.stale_lock_timeout {
            Some(requested) if requested < min => {
                self.stale_lock_timeout = Some(min);
                Some(requested)
            }
            _ => None,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_idle_interval(mut self, ms: u64) -> Self {
        self.idle_interval_ms = ms;
        self
    }

    pub fn with_busy_interval(mut self, ms: u64) -> Self {
        self.busy_interval_ms = ms;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self.clamp_stale_lock_timeout();
        self
    }

    /// Enable the stale lock sweep. The threshold is never shorter than the
    /// job timeout plus `STALE_LOCK_MARGIN_SECS`.
    pub fn with_stale_lock_timeout(mut self, timeout: Duration) -> Self {
        self.stale_lock_timeout = Some(timeout);
        self.clamp_stale_lock_timeout();
        self
    }
}

/// Event emitted by the job executor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    /// A poll claimed a non-empty batch.
    BatchClaimed { count: usize },
    JobStarted { job_id: Uuid, event: JobEvent },
    JobCompleted {
        job_id: Uuid,
        event: JobEvent,
        duration_ms: u64,
    },
    JobFailed {
        job_id: Uuid,
        event: JobEvent,
        error: String,
    },
    /// The stale lock sweep returned jobs to the queue.
    StaleLocksReclaimed { count: u64 },
    WorkerStopped,
}

/// Handle for controlling a running executor.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Signal the executor to stop and wait for the in-flight batch to
    /// finish.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already have exited (disabled worker), which drops
        // the receiver; that is not an error.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Job executor task failed: {}", e)))
    }
}

/// Executor that claims batches from the job store and dispatches each job
/// to its handler.
pub struct JobExecutor {
    jobs: Arc<dyn JobRepository>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobExecutor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        registry: HandlerRegistry,
        mut config: WorkerConfig,
    ) -> Self {
        if let Some(requested) = config.clamp_stale_lock_timeout() {
            warn!(
                subsystem = "jobs",
                component = "executor",
                requested_secs = requested.as_secs_f64(),
                job_timeout_secs = config.job_timeout_secs,
                stale_lock_secs = config.min_stale_lock_timeout().as_secs(),
                "Stale lock timeout raised above the job timeout"
            );
        }
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            registry: Arc::new(registry),
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the executor loop and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Run the polling loop until a shutdown signal arrives.
    ///
    /// Claims up to `batch_size` jobs, runs them concurrently, waits for the
    /// whole batch, then sleeps the busy interval. An empty batch or a
    /// failed claim sleeps the idle interval instead.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "jobs", "Job worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            component = "executor",
            batch_size = self.config.batch_size,
            idle_interval_ms = self.config.idle_interval_ms,
            busy_interval_ms = self.config.busy_interval_ms,
            job_timeout_secs = self.config.job_timeout_secs,
            handlers = ?self.registry.events(),
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let idle = Duration::from_millis(self.config.idle_interval_ms);
        let busy = Duration::from_millis(self.config.busy_interval_ms);
        let mut last_sweep: Option<Instant> = None;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "jobs", "Job worker received shutdown signal");
                break;
            }

            if let Some(timeout) = self.config.stale_lock_timeout {
                if last_sweep.map_or(true, |at| at.elapsed() >= timeout) {
                    last_sweep = Some(Instant::now());
                    if let Err(e) = self.reclaim_stale_locks(timeout).await {
                        warn!(subsystem = "jobs", error = %e, "Stale lock sweep failed");
                    }
                }
            }

            let pause = match self.run_batch().await {
                Ok(0) => idle,
                Ok(_) => busy,
                Err(e) => {
                    error!(
                        subsystem = "jobs",
                        component = "executor",
                        op = "claim_batch",
                        error = %e,
                        "Failed to claim jobs"
                    );
                    idle
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(subsystem = "jobs", "Job worker received shutdown signal");
                    break;
                }
                _ = sleep(pause) => {}
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", "Job worker stopped");
    }

    /// Claim one batch and run it to completion. Returns the number of jobs
    /// claimed.
    pub async fn run_batch(&self) -> Result<usize> {
        let jobs = self.jobs.claim_batch(self.config.batch_size).await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        debug!(
            subsystem = "jobs",
            component = "executor",
            batch_size = count,
            "Processing job batch"
        );
        let _ = self.event_tx.send(WorkerEvent::BatchClaimed { count });

        let mut tasks = JoinSet::new();
        for job in jobs {
            let runner = self.runner();
            tasks.spawn(runner.execute(job));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(subsystem = "jobs", error = ?e, "Job task aborted");
            }
        }

        Ok(count)
    }

    /// Reset jobs locked for longer than `older_than` to pending.
    pub async fn reclaim_stale_locks(&self, older_than: Duration) -> Result<u64> {
        let count = self.jobs.reclaim_stale(older_than).await?;
        if count > 0 {
            warn!(
                subsystem = "jobs",
                component = "executor",
                count,
                older_than_secs = older_than.as_secs(),
                "Reclaimed stale job locks"
            );
            let _ = self
                .event_tx
                .send(WorkerEvent::StaleLocksReclaimed { count });
        }
        Ok(count)
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }

    fn runner(&self) -> JobRunner {
        JobRunner {
            jobs: self.jobs.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
            timeout: Duration::from_secs(self.config.job_timeout_secs),
        }
    }
}

/// References needed to run one job inside a spawned task.
struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    registry: Arc<HandlerRegistry>,
    event_tx: broadcast::Sender<WorkerEvent>,
    timeout: Duration,
}

impl JobRunner {
    async fn execute(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let event = job.event.clone();

        info!(
            subsystem = "jobs",
            job_id = %job_id,
            job_event = %event,
            link_id = %job.link_id,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            event: event.clone(),
        });

        let claimed = job.clone();
        let result = match self.registry.lookup(&event) {
            Some(handler) => {
                let run =
                    tokio::time::timeout(self.timeout, handler.execute(JobContext::new(job)));
                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => JobResult::Failed(format!(
                        "Job exceeded timeout of {}s",
                        self.timeout.as_secs()
                    )),
                    Err(panic) => JobResult::Failed(format!(
                        "Handler panicked: {}",
                        panic_message(&*panic)
                    )),
                }
            }
            None => {
                warn!(
                    subsystem = "jobs",
                    job_event = %event,
                    "No handler registered for event"
                );
                JobResult::Failed(format!("No handler found for event type: {}", event))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success => {
                if let Err(e) = self.jobs.mark_completed(&claimed).await {
                    report_release_error(job_id, &e, "completed");
                    return;
                }
                info!(
                    subsystem = "jobs",
                    job_id = %job_id,
                    job_event = %event,
                    duration_ms,
                    "Job completed successfully"
                );
                let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                    job_id,
                    event,
                    duration_ms,
                });
            }
            JobResult::Failed(error) => {
                if let Err(e) = self.jobs.mark_failed(&claimed, &error).await {
                    report_release_error(job_id, &e, "failed");
                    return;
                }
                warn!(
                    subsystem = "jobs",
                    job_id = %job_id,
                    job_event = %event,
                    reason = %error,
                    duration_ms,
                    "Job failed"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    event,
                    error,
                });
            }
        }
    }
}

fn report_release_error(job_id: Uuid, e: &Error, outcome: &str) {
    match e {
        Error::Job(_) => warn!(
            subsystem = "jobs",
            job_id = %job_id,
            outcome,
            error = %e,
            "Job lock lost, result discarded"
        ),
        _ => error!(
            subsystem = "jobs",
            job_id = %job_id,
            outcome,
            error = %e,
            "Failed to record job outcome"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for creating a job executor.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    registry: HandlerRegistry,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            registry: HandlerRegistry::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> JobExecutor {
        JobExecutor::new(self.jobs, self.registry, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.idle_interval_ms, 2_000);
        assert_eq!(config.busy_interval_ms, 100);
        assert_eq!(config.job_timeout_secs, 60);
        assert!(config.stale_lock_timeout.is_none());
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_enabled(false)
            .with_batch_size(3)
            .with_idle_interval(50)
            .with_busy_interval(5)
            .with_job_timeout(2)
            .with_stale_lock_timeout(Duration::from_secs(300));

        assert!(!config.enabled);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.idle_interval_ms, 50);
        assert_eq!(config.busy_interval_ms, 5);
        assert_eq!(config.job_timeout_secs, 2);
        assert_eq!(config.stale_lock_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_stale_lock_timeout_clamped_above_job_timeout() {
        let config = WorkerConfig::default()
            .with_job_timeout(60)
            .with_stale_lock_timeout(Duration::from_millis(300));
        assert_eq!(config.stale_lock_timeout, Some(Duration::from_secs(90)));

        // Raising the job timeout afterwards raises the threshold with it.
        let config = config.with_job_timeout(120);
        assert_eq!(config.stale_lock_timeout, Some(Duration::from_secs(150)));

        let config = WorkerConfig::default().with_job_timeout(5);
        assert!(config.stale_lock_timeout.is_none());
    }

    #[test]
    fn test_executor_clamps_hand_built_config() {
        let mut config = WorkerConfig::default().with_job_timeout(10);
        config.stale_lock_timeout = Some(Duration::from_secs(1));

        let executor = JobExecutor::new(
            Arc::new(ranj_db::MemoryStore::new()),
            HandlerRegistry::default(),
            config,
        );
        assert_eq!(
            executor.config().stale_lock_timeout,
            Some(Duration::from_secs(40))
        );
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*boxed), "owned boom");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
