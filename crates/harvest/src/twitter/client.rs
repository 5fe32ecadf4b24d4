//! X API v2 page fetcher.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, instrument, warn};

use crate::config::ApiConfig;
use crate::error::{FetchFailure, Result};

use super::response::{decode_page, Record};
use super::types::{Cursor, Page, Query, TimeWindow};

/// Largest `max_results` the recent search endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Smallest `max_results` the recent search endpoint accepts.
pub const MIN_PAGE_SIZE: u32 = 10;

/// Error bodies longer than this are truncated before they are kept.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Paginated v2 endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/2/tweets/search/recent` (last 7 days of posts).
    SearchRecent,
    /// `/2/tweets/counts/recent` (per-day post counts).
    CountsRecent,
}

impl Endpoint {
    /// Path relative to the API base URL.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::SearchRecent => "/2/tweets/search/recent",
            Self::CountsRecent => "/2/tweets/counts/recent",
        }
    }

    /// Fixed field selection sent with every request.
    #[must_use]
    pub fn field_selection(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::SearchRecent => &[
                (
                    "tweet.fields",
                    "author_id,conversation_id,created_at,in_reply_to_user_id,lang,public_metrics",
                ),
                ("expansions", "author_id"),
                ("user.fields", "name,username,verified"),
            ],
            Self::CountsRecent => &[("granularity", "day")],
        }
    }

    /// Whether the endpoint accepts `max_results`.
    #[must_use]
    pub fn accepts_page_size(self) -> bool {
        matches!(self, Self::SearchRecent)
    }
}

/// Everything needed to request one page.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub query: &'a Query,
    pub window: &'a TimeWindow,
    pub page_size: u32,
    pub cursor: Option<&'a Cursor>,
}

impl PageRequest<'_> {
    /// Query-string parameters for `endpoint`.
    #[must_use]
    pub fn params(&self, endpoint: Endpoint) -> Vec<(&'static str, String)> {
        let mut params = vec![("query", self.query.as_str().to_string())];
        if let Some(start) = self.window.start_param() {
            params.push(("start_time", start));
        }
        params.push(("end_time", self.window.end_param()));
        if let Some(cursor) = self.cursor {
            params.push(("next_token", cursor.as_str().to_string()));
        }
        if endpoint.accepts_page_size() {
            let size = self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
            params.push(("max_results", size.to_string()));
        }
        params.extend(
            endpoint
                .field_selection()
                .iter()
                .map(|(k, v)| (*k, (*v).to_string())),
        );
        params
    }
}

/// Performs exactly one network round trip per call; never retries.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page<R: Record>(
        &self,
        request: &PageRequest<'_>,
    ) -> Result<Page<R>, FetchFailure>;
}

/// reqwest-backed fetcher for the X API v2.
pub struct XClient {
    http: Client,
    config: ApiConfig,
}

impl XClient {
    /// Create a new client.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, config })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.config.base_url, endpoint.path())
    }
}

#[async_trait]
impl PageFetcher for XClient {
    #[instrument(skip_all, fields(query = %request.query))]
    async fn fetch_page<R: Record>(
        &self,
        request: &PageRequest<'_>,
    ) -> Result<Page<R>, FetchFailure> {
        let endpoint = R::ENDPOINT;
        let params = request.params(endpoint);

        let response = self
            .http
            .get(self.url(endpoint))
            .bearer_auth(&self.config.bearer_token)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset = response
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            warn!(reset = %reset, endpoint = ?endpoint, "Rate limited by X API");
            return Err(FetchFailure::RateLimited);
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".into());
            return Err(FetchFailure::Remote {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;
        debug!(len = body.len(), content_type = %content_type, "Received page");

        decode_page(&body)
    }
}

/// Truncate an error body, respecting UTF-8 character boundaries.
fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{truncated}...")
    }
}
