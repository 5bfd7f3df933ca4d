//! Link search over PostgreSQL full-text and pgvector indexes.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use ranj_core::{
    Error, LexicalQuery, LinkSearchRepository, LinkState, LinkSummary, Result, SemanticQuery,
    TagSummary,
};

use crate::link_query::{self, QueryParam};

/// PostgreSQL implementation of LinkSearchRepository.
pub struct PgLinkSearch {
    pool: Pool<Postgres>,
}

impl PgLinkSearch {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch_page(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<LinkSummary>> {
        let start = Instant::now();
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let summaries = rows
            .iter()
            .map(parse_summary_row)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "db",
            component = "search",
            op = "fetch_page",
            result_count = summaries.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched link page"
        );
        Ok(summaries)
    }

    async fn fetch_count(&self, sql: &str, params: &[QueryParam]) -> Result<i64> {
        let row = bind_params(sqlx::query(sql), params)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("total"))
    }
}

fn bind_params<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    params: &'q [QueryParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        q = match param {
            QueryParam::Uuid(id) => q.bind(id),
            QueryParam::UuidArray(ids) => q.bind(ids),
            QueryParam::BigInt(val) => q.bind(val),
            QueryParam::Float(val) => q.bind(val),
            QueryParam::Timestamp(ts) => q.bind(ts),
            QueryParam::String(s) => q.bind(s),
            QueryParam::Vector(v) => q.bind(v),
        };
    }
    q
}

/// Decode the aggregated tag array, dropping any null entries.
fn parse_tags(value: serde_json::Value) -> Result<Vec<TagSummary>> {
    let entries: Vec<Option<TagSummary>> = serde_json::from_value(value)?;
    Ok(entries.into_iter().flatten().collect())
}

fn parse_summary_row(row: &sqlx::postgres::PgRow) -> Result<LinkSummary> {
    let state: String = row.get("state");
    Ok(LinkSummary {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        description: row.get("description"),
        image: row.get("image"),
        state: state.parse::<LinkState>()?,
        created_at: row.get("created_at"),
        tags: parse_tags(row.get("tags"))?,
        score: row.get("score"),
    })
}

#[async_trait]
impl LinkSearchRepository for PgLinkSearch {
    async fn lexical_page(&self, query: &LexicalQuery) -> Result<Vec<LinkSummary>> {
        let (sql, params) = link_query::lexical_page(query);
        self.fetch_page(&sql, &params).await
    }

    async fn lexical_count(&self, query: &LexicalQuery) -> Result<i64> {
        let (sql, params) = link_query::lexical_count(query);
        self.fetch_count(&sql, &params).await
    }

    async fn semantic_page(&self, query: &SemanticQuery) -> Result<Vec<LinkSummary>> {
        let (sql, params) = link_query::semantic_page(query);
        self.fetch_page(&sql, &params).await
    }

    async fn semantic_count(&self, query: &SemanticQuery) -> Result<i64> {
        let (sql, params) = link_query::semantic_count(query);
        self.fetch_count(&sql, &params).await
    }
}
