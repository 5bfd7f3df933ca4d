//! SQL generation for link search pages and counts.
//!
//! Every query is scoped to one user and shares the same tag predicate, so
//! the page and count statements for a mode always filter identically; only
//! the page statement carries the keyset cursor and the row limit.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use ranj_core::{defaults, LexicalQuery, SemanticQuery, TagFilter, Vector};

/// Type-safe parameter binding for SQL queries.
#[derive(Debug, Clone)]
pub enum QueryParam {
    Uuid(Uuid),
    /// Array of UUIDs (for ANY operations).
    UuidArray(Vec<Uuid>),
    BigInt(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Vector(Vector),
}

/// Rows returned by page queries, tags aggregated as a JSON array.
const PAGE_SELECT: &str = "SELECT l.id, l.url, l.title, l.description, l.image, \
     l.state::text AS state, l.created_at, COALESCE(lt_agg.tags, '[]'::json) AS tags";

/// Per-row tag aggregation. `json_agg` over zero rows is NULL, which the
/// COALESCE above turns into an empty array.
const TAG_AGGREGATE_JOIN: &str = "LEFT JOIN LATERAL (\
     SELECT json_agg(json_build_object('name', t.name, 'color', t.color) ORDER BY t.name) AS tags \
     FROM link_tag lt JOIN tag t ON t.id = lt.tag_id \
     WHERE lt.link_id = l.id) lt_agg ON TRUE";

/// Weighted document: title (A), description (B), notes text (C).
fn search_document() -> String {
    format!(
        "(setweight(to_tsvector('{cfg}', coalesce(l.title, '')), 'A') || \
         setweight(to_tsvector('{cfg}', coalesce(l.description, '')), 'B') || \
         setweight(to_tsvector('{cfg}', coalesce(l.notes_text, '')), 'C'))",
        cfg = defaults::FTS_CONFIG
    )
}

fn tsquery(param_idx: usize) -> String {
    format!(
        "websearch_to_tsquery('{}', ${})",
        defaults::FTS_CONFIG,
        param_idx
    )
}

fn similarity(param_idx: usize) -> String {
    format!("(1 - (l.embedding <=> ${}))", param_idx)
}

/// Accumulates WHERE clauses and their positional parameters.
#[derive(Debug, Default)]
pub struct LinkQueryBuilder {
    clauses: Vec<String>,
    params: Vec<QueryParam>,
}

impl LinkQueryBuilder {
    /// Start a query restricted to one user's links.
    pub fn for_user(user_id: Uuid) -> Self {
        let mut builder = Self::default();
        let idx = builder.param(QueryParam::Uuid(user_id));
        builder.clauses.push(format!("l.user_id = ${}", idx));
        builder
    }

    /// Register a parameter and return its 1-based position.
    pub fn param(&mut self, param: QueryParam) -> usize {
        self.params.push(param);
        self.params.len()
    }

    pub fn clause(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    /// Add the tag membership predicate. An empty filter adds nothing.
    pub fn tag_filter(&mut self, filter: &TagFilter) {
        let mut alternatives = Vec::new();
        if !filter.tag_ids.is_empty() {
            let idx = self.param(QueryParam::UuidArray(filter.tag_ids.clone()));
            alternatives.push(format!(
                "EXISTS (SELECT 1 FROM link_tag lt WHERE lt.link_id = l.id AND lt.tag_id = ANY(${}::uuid[]))",
                idx
            ));
        }
        if filter.untagged {
            alternatives.push(
                "NOT EXISTS (SELECT 1 FROM link_tag lt WHERE lt.link_id = l.id)".to_string(),
            );
        }
        match alternatives.len() {
            0 => {}
            1 => self.clauses.extend(alternatives),
            _ => self.clauses.push(format!("({})", alternatives.join(" OR "))),
        }
    }

    pub fn where_clause(&self) -> String {
        self.clauses.join(" AND ")
    }

    pub fn into_params(self) -> Vec<QueryParam> {
        self.params
    }
}

/// Build the page statement for a lexical query.
///
/// Rows are ordered `created_at DESC, id DESC`; the score column carries
/// `ts_rank` when a query text is present.
pub fn lexical_page(query: &LexicalQuery) -> (String, Vec<QueryParam>) {
    let mut builder = LinkQueryBuilder::for_user(query.user_id);
    let score = match normalized_text(query) {
        Some(text) => {
            let idx = builder.param(QueryParam::String(text.to_string()));
            builder.clause(format!("{} @@ {}", search_document(), tsquery(idx)));
            format!("ts_rank({}, {})::float8", search_document(), tsquery(idx))
        }
        None => "NULL::float8".to_string(),
    };
    builder.tag_filter(&query.tags);
    if let Some(after) = &query.after {
        let ts = builder.param(QueryParam::Timestamp(after.created_at));
        let id = builder.param(QueryParam::Uuid(after.id));
        builder.clause(format!("(l.created_at, l.id) < (${}, ${})", ts, id));
    }
    let limit = builder.param(QueryParam::BigInt(query.fetch_limit));

    let sql = format!(
        "{PAGE_SELECT}, {score} AS score FROM link l {TAG_AGGREGATE_JOIN} WHERE {} \
         ORDER BY l.created_at DESC, l.id DESC LIMIT ${}",
        builder.where_clause(),
        limit
    );
    (sql, builder.into_params())
}

/// Build the count statement for a lexical query (cursor ignored).
pub fn lexical_count(query: &LexicalQuery) -> (String, Vec<QueryParam>) {
    let mut builder = LinkQueryBuilder::for_user(query.user_id);
    if let Some(text) = normalized_text(query) {
        let idx = builder.param(QueryParam::String(text.to_string()));
        builder.clause(format!("{} @@ {}", search_document(), tsquery(idx)));
    }
    builder.tag_filter(&query.tags);

    let sql = format!(
        "SELECT COUNT(*) AS total FROM link l WHERE {}",
        builder.where_clause()
    );
    (sql, builder.into_params())
}

/// Build the page statement for a semantic query.
///
/// Only links with an embedding and similarity strictly above the floor are
/// eligible; rows are ordered `similarity DESC, id DESC`.
pub fn semantic_page(query: &SemanticQuery) -> (String, Vec<QueryParam>) {
    let mut builder = LinkQueryBuilder::for_user(query.user_id);
    let vector = builder.param(QueryParam::Vector(query.embedding.clone()));
    semantic_eligibility(&mut builder, vector, query);
    if let Some(after) = &query.after {
        let sim = builder.param(QueryParam::Float(after.similarity));
        let id = builder.param(QueryParam::Uuid(after.id));
        builder.clause(format!(
            "({}, l.id) < (${}, ${})",
            similarity(vector),
            sim,
            id
        ));
    }
    let limit = builder.param(QueryParam::BigInt(query.fetch_limit));

    let sql = format!(
        "{PAGE_SELECT}, {} AS score FROM link l {TAG_AGGREGATE_JOIN} WHERE {} \
         ORDER BY score DESC, l.id DESC LIMIT ${}",
        similarity(vector),
        builder.where_clause(),
        limit
    );
    (sql, builder.into_params())
}

/// Build the count statement for a semantic query (cursor ignored).
pub fn semantic_count(query: &SemanticQuery) -> (String, Vec<QueryParam>) {
    let mut builder = LinkQueryBuilder::for_user(query.user_id);
    let vector = builder.param(QueryParam::Vector(query.embedding.clone()));
    semantic_eligibility(&mut builder, vector, query);

    let sql = format!(
        "SELECT COUNT(*) AS total FROM link l WHERE {}",
        builder.where_clause()
    );
    (sql, builder.into_params())
}

fn semantic_eligibility(builder: &mut LinkQueryBuilder, vector: usize, query: &SemanticQuery) {
    builder.clause("l.embedding IS NOT NULL".to_string());
    let floor = builder.param(QueryParam::Float(query.floor));
    builder.clause(format!("{} > ${}", similarity(vector), floor));
    builder.tag_filter(&query.tags);
}

fn normalized_text(query: &LexicalQuery) -> Option<&str> {
    query
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
