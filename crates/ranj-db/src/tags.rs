//! Tag repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use ranj_core::{new_v7, Error, Result, Tag, TagAssignment, TagRepository};

const TAG_COLUMNS: &str = "t.id, t.name, t.color, t.is_system, t.user_id";

/// PostgreSQL implementation of TagRepository.
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_tag_row(row: &sqlx::postgres::PgRow) -> Tag {
        Tag {
            id: row.get("id"),
            name: row.get("name"),
            color: row.get("color"),
            is_system: row.get("is_system"),
            user_id: row.get("user_id"),
        }
    }
}

#[async_trait]
impl TagRepository for PgTagRepository {
    async fn list_system(&self) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {TAG_COLUMNS} FROM tag t WHERE t.is_system ORDER BY t.name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_tag_row).collect())
    }

    async fn list_visible(&self, user_id: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {TAG_COLUMNS} FROM tag t
             WHERE t.is_system OR t.user_id = $1
             ORDER BY t.name"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_tag_row).collect())
    }

    async fn for_link(&self, link_id: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {TAG_COLUMNS} FROM tag t
             JOIN link_tag lt ON lt.tag_id = t.id
             WHERE lt.link_id = $1
             ORDER BY t.name"
        ))
        .bind(link_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_tag_row).collect())
    }

    async fn other_available(&self, link_id: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {TAG_COLUMNS} FROM tag t
             WHERE t.is_system
               AND NOT EXISTS (
                   SELECT 1 FROM link_tag lt WHERE lt.link_id = $1 AND lt.tag_id = t.id
               )
             ORDER BY t.name"
        ))
        .bind(link_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_tag_row).collect())
    }

    async fn set_for_link(
        &self,
        link_id: Uuid,
        user_id: Uuid,
        tags: &[TagAssignment],
    ) -> Result<Vec<Tag>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let owned = sqlx::query("SELECT 1 FROM link WHERE id = $1 AND user_id = $2 FOR UPDATE")
            .bind(link_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if owned.is_none() {
            return Err(Error::LinkNotFound(link_id));
        }

        let mut resolved: Vec<Tag> = Vec::with_capacity(tags.len());
        for assignment in tags {
            let tag = match assignment.id {
                Some(tag_id) => {
                    let row = sqlx::query(&format!(
                        "SELECT {TAG_COLUMNS} FROM tag t
                         WHERE t.id = $1 AND (t.is_system OR t.user_id = $2)"
                    ))
                    .bind(tag_id)
                    .bind(user_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(Error::Database)?
                    .ok_or_else(|| Error::InvalidInput(format!("unknown tag id: {tag_id}")))?;
                    Self::parse_tag_row(&row)
                }
                None => {
                    let row = sqlx::query(
                        "INSERT INTO tag (id, name, color, is_system, user_id)
                         VALUES ($1, $2, $3, false, $4)
                         RETURNING id, name, color, is_system, user_id",
                    )
                    .bind(new_v7())
                    .bind(&assignment.name)
                    .bind(&assignment.color)
                    .bind(user_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(Error::Database)?;
                    Self::parse_tag_row(&row)
                }
            };
            if !resolved.iter().any(|t| t.id == tag.id) {
                resolved.push(tag);
            }
        }

        sqlx::query("DELETE FROM link_tag WHERE link_id = $1")
            .bind(link_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let tag_ids: Vec<Uuid> = resolved.iter().map(|t| t.id).collect();
        sqlx::query(
            "INSERT INTO link_tag (link_id, tag_id)
             SELECT $1, UNNEST($2::uuid[])",
        )
        .bind(link_id)
        .bind(&tag_ids)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "tags",
            op = "set_for_link",
            link_id = %link_id,
            tag_count = resolved.len(),
            "Replaced link tags"
        );

        resolved.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resolved)
    }
}
