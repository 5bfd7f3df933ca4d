//! Open Graph scraping: the `scrape_og` job handler and its HTTP fetcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use ranj_core::{defaults, Error, JobEvent, LinkMetadata, LinkRepository, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Source of page metadata for a URL.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<LinkMetadata>;
}

/// Fetches pages over HTTP and reads their Open Graph tags.
#[derive(Clone)]
pub struct HttpMetadataFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpMetadataFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(
                defaults::SCRAPE_MAX_REDIRECTS,
            ))
            .build()
            .map_err(|e| Error::Scrape(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_body_bytes: defaults::SCRAPE_MAX_BODY_BYTES,
        })
    }

    /// Limit how much of a page body is read.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Create from `SCRAPE_TIMEOUT_SECS` and `SCRAPE_USER_AGENT`.
    pub fn from_env() -> Result<Self> {
        let timeout = std::env::var("SCRAPE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::SCRAPE_TIMEOUT_SECS);
        let user_agent = std::env::var("SCRAPE_USER_AGENT")
            .unwrap_or_else(|_| defaults::SCRAPE_USER_AGENT.to_string());
        Self::new(Duration::from_secs(timeout), &user_agent)
    }

    /// Whether a HEAD request to `url` succeeds with a 2xx status.
    pub async fn is_reachable(&self, url: &str) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        match self.client.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(
                    subsystem = "jobs",
                    component = "scrape_og",
                    error = %e,
                    "HEAD request failed"
                );
                false
            }
        }
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<LinkMetadata> {
        let parsed =
            Url::parse(url).map_err(|e| Error::Scrape(format!("Invalid URL {}: {}", url, e)))?;

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| Error::Scrape(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Scrape(format!("{} returned {}", url, status)));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes as u64 {
                return Err(Error::Scrape(format!(
                    "{} is too large ({} bytes, limit {})",
                    url, len, self.max_body_bytes
                )));
            }
        }

        let final_url = response.url().clone();
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Scrape(format!("Failed to read {}: {}", url, e)))?
        {
            if append_capped(&mut body, &chunk, self.max_body_bytes) {
                debug!(
                    subsystem = "jobs",
                    component = "scrape_og",
                    url = %url,
                    limit = self.max_body_bytes,
                    "Page body truncated"
                );
                break;
            }
        }

        parse_link_metadata(&String::from_utf8_lossy(&body), &final_url)
    }
}

/// Append `chunk` to `buf` without growing it past `cap`. Returns true once
/// `buf` is full.
fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize) -> bool {
    let room = cap.saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    buf.len() >= cap
}

/// HEAD `url` with the default scrape timeout. Any error counts as
/// unreachable.
pub async fn check_reachable(url: &str) -> bool {
    match HttpMetadataFetcher::new(
        Duration::from_secs(defaults::SCRAPE_TIMEOUT_SECS),
        defaults::SCRAPE_USER_AGENT,
    ) {
        Ok(fetcher) => fetcher.is_reachable(url).await,
        Err(_) => false,
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::Scrape(format!("Bad selector {}: {:?}", css, e)))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn meta_content(doc: &Html, css: &str) -> Result<Option<String>> {
    let sel = selector(css)?;
    Ok(doc
        .select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .find(|s| !s.is_empty()))
}

/// Extract site name, title, description and primary image from a page.
///
/// Open Graph tags win; `<title>` and `<meta name="description">` are
/// fallbacks. The image URL is resolved against `page_url`. A page with no
/// title at all is rejected.
pub fn parse_link_metadata(html: &str, page_url: &Url) -> Result<LinkMetadata> {
    let doc = Html::parse_document(html);

    let site_name = meta_content(&doc, r#"meta[property="og:site_name"]"#)?;

    let title = match meta_content(&doc, r#"meta[property="og:title"]"#)? {
        Some(title) => Some(title),
        None => {
            let sel = selector("title")?;
            doc.select(&sel)
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .find(|s| !s.is_empty())
        }
    };

    let description = match meta_content(&doc, r#"meta[property="og:description"]"#)? {
        Some(description) => Some(description),
        None => meta_content(&doc, r#"meta[name="description"]"#)?,
    };

    let image = meta_content(&doc, r#"meta[property="og:image"]"#)?
        .and_then(|raw| page_url.join(&raw).ok())
        .map(|u| u.to_string());

    if title.is_none() {
        return Err(Error::Scrape(format!("No title found at {}", page_url)));
    }

    Ok(LinkMetadata {
        site_name,
        title,
        description,
        image,
    })
}

/// Handler for `scrape_og` jobs: fetch the page and write its metadata onto
/// the owning link, marking it processed.
///
/// On failure the link is left untouched, still `processing`.
pub struct ScrapeOgHandler {
    links: Arc<dyn LinkRepository>,
    fetcher: Arc<dyn MetadataFetcher>,
}

impl ScrapeOgHandler {
    pub fn new(links: Arc<dyn LinkRepository>, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self { links, fetcher }
    }
}

#[async_trait]
impl JobHandler for ScrapeOgHandler {
    fn event(&self) -> JobEvent {
        JobEvent::ScrapeOg
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let link_id = ctx.link_id();
        info!(
            subsystem = "jobs",
            component = "scrape_og",
            job_id = %ctx.job.id,
            link_id = %link_id,
            url = %ctx.url(),
            "Scraping OG data"
        );

        let metadata = match self.fetcher.fetch(ctx.url()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "scrape_og",
                    link_id = %link_id,
                    error = %e,
                    "Failed to parse link data"
                );
                return JobResult::Failed(e.to_string());
            }
        };

        self.links.apply_metadata(link_id, &metadata).await.into()
    }
}
