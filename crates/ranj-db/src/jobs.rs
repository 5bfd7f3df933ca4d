//! Job repository implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use ranj_core::{new_v7, Error, Job, JobRepository, JobStatus, NewJob, Result};

/// Columns returned by every job query.
pub(crate) const JOB_COLUMNS: &str = "id, url, event::text AS event, status::text AS status, \
     priority, created_at, updated_at, locked_at, link_id, error_message";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into a Job struct.
    pub(crate) fn parse_job_row(row: &sqlx::postgres::PgRow) -> Result<Job> {
        let event: String = row.get("event");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            url: row.get("url"),
            event: event.into(),
            status: status.parse::<JobStatus>()?,
            priority: row.get("priority"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            locked_at: row.get("locked_at"),
            link_id: row.get("link_id"),
            error_message: row.get("error_message"),
        })
    }

    /// Explain a completion update that matched no row: a missing job is
    /// `JobNotFound`, a finished one is a no-op, anything else means the lock
    /// moved to another execution.
    async fn resolve_unowned(&self, job_id: Uuid) -> Result<()> {
        match self.get(job_id).await? {
            None => Err(Error::JobNotFound(job_id)),
            Some(current) if current.status.is_terminal() => {
                debug!(
                    subsystem = "db",
                    component = "jobs",
                    job_id = %job_id,
                    status = %current.status,
                    "Job already finished"
                );
                Ok(())
            }
            Some(_) => Err(Error::lock_lost(job_id)),
        }
    }

    /// Insert a job inside an existing transaction.
    pub(crate) async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        job: &NewJob,
    ) -> Result<Job> {
        let row = sqlx::query(&format!(
            "INSERT INTO job_queue (id, url, event, priority, link_id, created_at, updated_at)
             VALUES ($1, $2, $3::job_event, $4, $5, $6, $6)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(&job.url)
        .bind(job.event.as_str())
        .bind(job.priority)
        .bind(job.link_id)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Self::parse_job_row(&row)
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let inserted = Self::insert_tx(&mut tx, &job).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(inserted)
    }

    async fn claim_batch(&self, limit: i64) -> Result<Vec<Job>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        // Selection and transition happen in one statement. SKIP LOCKED lets
        // concurrent claimers pass over rows another transaction is taking.
        let rows = sqlx::query(&format!(
            "UPDATE job_queue
             SET status = 'processing'::job_status, locked_at = $1, updated_at = $1
             WHERE id IN (
                 SELECT id FROM job_queue
                 WHERE status = 'pending'::job_status AND locked_at IS NULL
                 ORDER BY priority DESC, created_at ASC
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut jobs = rows
            .iter()
            .map(Self::parse_job_row)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order.
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        debug!(
            subsystem = "db",
            component = "jobs",
            op = "claim_batch",
            batch_size = jobs.len(),
            "Claimed jobs"
        );
        Ok(jobs)
    }

    async fn mark_completed(&self, claimed: &Job) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_queue
             SET status = 'completed'::job_status, locked_at = NULL, updated_at = $1
             WHERE id = $2 AND status = 'processing'::job_status AND locked_at = $3",
        )
        .bind(Utc::now())
        .bind(claimed.id)
        .bind(claimed.locked_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return self.resolve_unowned(claimed.id).await;
        }
        Ok(())
    }

    async fn mark_failed(&self, claimed: &Job, reason: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_queue
             SET status = 'failed'::job_status, locked_at = NULL, updated_at = $1,
                 error_message = $2
             WHERE id = $3 AND status = 'processing'::job_status AND locked_at = $4",
        )
        .bind(Utc::now())
        .bind(reason)
        .bind(claimed.id)
        .bind(claimed.locked_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return self.resolve_unowned(claimed.id).await;
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn list_for_link(&self, link_id: Uuid) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_queue WHERE link_id = $1 ORDER BY created_at ASC"
        ))
        .bind(link_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_job_row).collect()
    }

    async fn pending_count(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM job_queue
             WHERE status = 'pending'::job_status AND locked_at IS NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.get("count"))
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(older_than)
                .map_err(|e| Error::InvalidInput(format!("stale lock timeout: {e}")))?;

        let result = sqlx::query(
            "UPDATE job_queue
             SET status = 'pending'::job_status, locked_at = NULL, updated_at = $1
             WHERE status = 'processing'::job_status AND locked_at < $2",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
