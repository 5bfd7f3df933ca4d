//! Link repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use ranj_core::{
    defaults, extract_text_from_notes, new_v7, Error, JobEvent, Link, LinkMetadata,
    LinkRepository, LinkState, LinkUpdate, NewJob, Result, SubmittedLink, Vector,
};

use crate::jobs::PgJobRepository;

const LINK_COLUMNS: &str = "id, url, title, description, image, state::text AS state, notes, \
     notes_text, (embedding IS NOT NULL) AS has_embedding, user_id, created_at";

/// PostgreSQL implementation of LinkRepository.
pub struct PgLinkRepository {
    pool: Pool<Postgres>,
}

impl PgLinkRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub(crate) fn parse_link_row(row: &sqlx::postgres::PgRow) -> Result<Link> {
        let state: String = row.get("state");
        Ok(Link {
            id: row.get("id"),
            url: row.get("url"),
            title: row.get("title"),
            description: row.get("description"),
            image: row.get("image"),
            state: state.parse::<LinkState>()?,
            notes: row.get("notes"),
            notes_text: row.get("notes_text"),
            has_embedding: row.get("has_embedding"),
            user_id: row.get("user_id"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    async fn submit(&self, user_id: Uuid, url: &str) -> Result<SubmittedLink> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "INSERT INTO link (id, url, state, user_id, created_at)
             VALUES ($1, $2, 'processing'::link_state, $3, $4)
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(url)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let link = Self::parse_link_row(&row)?;

        let job = PgJobRepository::insert_tx(
            &mut tx,
            &NewJob::new(link.id, url, JobEvent::ScrapeOg)
                .with_priority(defaults::SCRAPE_JOB_PRIORITY),
        )
        .await?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "links",
            op = "submit",
            link_id = %link.id,
            job_id = %job.id,
            "Link submitted"
        );
        Ok(SubmittedLink { link, job })
    }

    async fn get(&self, link_id: Uuid, user_id: Uuid) -> Result<Link> {
        let row = sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM link WHERE id = $1 AND user_id = $2"
        ))
        .bind(link_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::LinkNotFound(link_id))?;

        Self::parse_link_row(&row)
    }

    async fn find(&self, link_id: Uuid) -> Result<Option<Link>> {
        let row = sqlx::query(&format!("SELECT {LINK_COLUMNS} FROM link WHERE id = $1"))
            .bind(link_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_link_row).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Link>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM link WHERE user_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_link_row).collect()
    }

    async fn update(&self, link_id: Uuid, user_id: Uuid, update: LinkUpdate) -> Result<Link> {
        let notes_text = update.notes.as_ref().map(extract_text_from_notes);

        let row = sqlx::query(&format!(
            "UPDATE link SET
                 url = COALESCE($1, url),
                 title = COALESCE($2, title),
                 description = COALESCE($3, description),
                 image = COALESCE($4, image),
                 notes = COALESCE($5, notes),
                 notes_text = COALESCE($6, notes_text)
             WHERE id = $7 AND user_id = $8
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(&update.url)
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.image)
        .bind(&update.notes)
        .bind(&notes_text)
        .bind(link_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::LinkNotFound(link_id))?;

        Self::parse_link_row(&row)
    }

    async fn apply_metadata(&self, link_id: Uuid, metadata: &LinkMetadata) -> Result<()> {
        let result = sqlx::query(
            "UPDATE link SET
                 title = COALESCE($1, title),
                 description = COALESCE($2, description),
                 image = COALESCE($3, image),
                 state = 'processed'::link_state
             WHERE id = $4",
        )
        .bind(&metadata.title)
        .bind(&metadata.description)
        .bind(&metadata.image)
        .bind(link_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::LinkNotFound(link_id));
        }
        Ok(())
    }

    async fn delete(&self, link_id: Uuid, user_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM link WHERE id = $1 AND user_id = $2")
            .bind(link_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::LinkNotFound(link_id));
        }
        Ok(())
    }

    async fn list_missing_embedding(&self, user_id: Uuid) -> Result<Vec<Link>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM link
             WHERE user_id = $1 AND embedding IS NULL
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(Self::parse_link_row).collect()
    }

    async fn set_embedding(&self, link_id: Uuid, embedding: &Vector) -> Result<()> {
        let result = sqlx::query("UPDATE link SET embedding = $1 WHERE id = $2")
            .bind(embedding)
            .bind(link_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::LinkNotFound(link_id));
        }
        Ok(())
    }
}
