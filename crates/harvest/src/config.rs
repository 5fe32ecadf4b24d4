//! Process configuration: API credentials/endpoint and query sets.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarvestError, Result};
use crate::twitter::LabeledQuery;

/// Environment variable holding the v2 bearer token.
pub const ENV_BEARER_TOKEN: &str = "X_BEARER_TOKEN";

/// Environment variable overriding the API base URL.
pub const ENV_API_BASE_URL: &str = "X_API_BASE_URL";

/// Environment variable overriding the per-request timeout.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "X_REQUEST_TIMEOUT_SECS";

/// Environment variable overriding the User-Agent header.
pub const ENV_USER_AGENT: &str = "X_USER_AGENT";

/// Default API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.x.com";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the page fetcher.
#[derive(Clone)]
pub struct ApiConfig {
    /// Bearer token for app-only authentication.
    pub bearer_token: String,
    /// Base URL without trailing slash.
    pub base_url: String,
    /// User-Agent header.
    pub user_agent: String,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

impl ApiConfig {
    /// Create a configuration with default endpoint settings.
    #[must_use]
    pub fn new(bearer_token: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: default_user_agent(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Point the client at a different base URL (tests, proxies).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create configuration from environment variables.
    ///
    /// # Required Environment Variables
    /// - `X_BEARER_TOKEN`: bearer token for the X API v2
    ///
    /// # Optional Environment Variables
    /// - `X_API_BASE_URL`: API base URL (default: https://api.x.com)
    /// - `X_REQUEST_TIMEOUT_SECS`: request timeout (default: 30)
    /// - `X_USER_AGENT`: User-Agent header (default: harvest/<version>)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bearer_token = lookup(ENV_BEARER_TOKEN)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                HarvestError::Configuration(format!(
                    "{ENV_BEARER_TOKEN} is not set; export your X API bearer token"
                ))
            })?;

        let mut config = Self::new(bearer_token);

        if let Some(base_url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config = config.with_base_url(base_url.trim());
        }

        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                HarvestError::Configuration(format!(
                    "{ENV_REQUEST_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"
                ))
            })?;
            if secs == 0 {
                return Err(HarvestError::Configuration(format!(
                    "{ENV_REQUEST_TIMEOUT_SECS} must be greater than zero"
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(agent) = lookup(ENV_USER_AGENT).filter(|v| !v.trim().is_empty()) {
            config.user_agent = agent;
        }

        Ok(config)
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bearer_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn default_user_agent() -> String {
    format!("harvest/{}", env!("CARGO_PKG_VERSION"))
}

/// Query set loaded from a TOML file:
///
/// ```toml
/// [[query]]
/// label = "Jara"
/// expr = '("Jeannette Jara" OR jeannette_jara) lang:es -is:retweet'
/// ```
#[derive(Debug, Deserialize)]
struct QueryFile {
    #[serde(default, rename = "query")]
    queries: Vec<QueryEntry>,
}

#[derive(Debug, Deserialize)]
struct QueryEntry {
    label: String,
    expr: String,
}

/// Parse a query set from TOML text.
pub fn parse_queries(content: &str) -> Result<Vec<LabeledQuery>> {
    let file: QueryFile = toml::from_str(content)?;
    file.queries
        .into_iter()
        .map(|q| LabeledQuery::new(q.label, q.expr))
        .collect()
}

/// Load a query set from a TOML file.
pub fn load_queries(path: &Path) -> Result<Vec<LabeledQuery>> {
    if !path.exists() {
        return Err(HarvestError::SourceNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_queries(&content)
}

/// Reject an empty query set or duplicate labels.
pub fn validate_queries(queries: &[LabeledQuery]) -> Result<()> {
    if queries.is_empty() {
        return Err(HarvestError::Configuration(
            "no queries given; pass --query LABEL=QUERY or --queries-file".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for q in queries {
        if !seen.insert(q.label.as_str()) {
            return Err(HarvestError::InputFormat(format!(
                "duplicate query label '{}'",
                q.label
            )));
        }
    }
    Ok(())
}
