//! X/Twitter data types.

use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Seconds `end_time` must trail the request instant; the API rejects
/// windows that end too close to "now".
pub const END_GRACE_SECS: i64 = 20;

/// An opaque search expression (`lang:es -is:retweet (a OR b)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    /// Wrap a search expression. Blank expressions are rejected.
    pub fn new(expr: impl Into<String>) -> Result<Self> {
        let expr = expr.into();
        if expr.trim().is_empty() {
            return Err(HarvestError::InputFormat(
                "search query must not be empty".to_string(),
            ));
        }
        Ok(Self(expr))
    }

    /// Query matching every post in a conversation thread.
    #[must_use]
    pub fn conversation(conversation_id: &str) -> Self {
        Self(format!("conversation_id:{conversation_id}"))
    }

    /// The raw expression.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A query together with the label its results are reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledQuery {
    /// Column/row label in the output.
    pub label: String,
    /// Search expression.
    pub query: Query,
}

impl LabeledQuery {
    pub fn new(label: impl Into<String>, expr: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if label.trim().is_empty() {
            return Err(HarvestError::InputFormat(
                "query label must not be empty".to_string(),
            ));
        }
        Ok(Self {
            label,
            query: Query::new(expr)?,
        })
    }

    /// Parse `LABEL=EXPR`. Only the first `=` separates; the expression may
    /// contain more.
    pub fn parse(raw: &str) -> Result<Self> {
        let (label, expr) = raw.split_once('=').ok_or_else(|| {
            HarvestError::InputFormat(format!("expected LABEL=QUERY, got '{raw}'"))
        })?;
        Self::new(label.trim(), expr.trim())
    }
}

/// Search time window sent as `start_time`/`end_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Grace interval between `end` and the request instant.
    #[must_use]
    pub fn grace() -> TimeDelta {
        TimeDelta::seconds(END_GRACE_SECS)
    }

    /// Validate a window against `now`.
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let latest_end = now - Self::grace();
        if end > latest_end {
            return Err(HarvestError::InvalidWindow(format!(
                "end {} must be at least {END_GRACE_SECS}s before now ({})",
                format_timestamp(end),
                format_timestamp(now)
            )));
        }
        if let Some(start) = start {
            if start >= end {
                return Err(HarvestError::InvalidWindow(format!(
                    "start {} must precede end {}",
                    format_timestamp(start),
                    format_timestamp(end)
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// Window covering the last `days` days, ending the grace interval
    /// before `now`.
    pub fn trailing_days(days: u32, now: DateTime<Utc>) -> Result<Self> {
        if days == 0 {
            return Err(HarvestError::InvalidWindow(
                "days back must be at least 1".to_string(),
            ));
        }
        let end = now - Self::grace();
        let start = end - TimeDelta::days(i64::from(days));
        Self::new(Some(start), end, now)
    }

    /// `start_time` request parameter.
    #[must_use]
    pub fn start_param(&self) -> Option<String> {
        self.start.map(format_timestamp)
    }

    /// `end_time` request parameter.
    #[must_use]
    pub fn end_param(&self) -> String {
        format_timestamp(self.end)
    }
}

/// RFC 3339 with whole seconds and a `Z` suffix (`2025-01-01T00:00:00Z`).
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Opaque continuation token (`meta.next_token`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One batch of results plus the cursor for the next batch.
///
/// An absent `next_token` means the result set is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<Cursor>,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, next_token: Option<Cursor>) -> Self {
        Self { items, next_token }
    }

    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next_token.is_none()
    }
}

/// Public engagement counters of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMetrics {
    pub like_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

/// Which public metric counts as "engagement".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngagementMetric {
    #[default]
    Likes,
    Retweets,
    Replies,
    Quotes,
}

impl fmt::Display for EngagementMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Likes => write!(f, "likes"),
            Self::Retweets => write!(f, "retweets"),
            Self::Replies => write!(f, "replies"),
            Self::Quotes => write!(f, "quotes"),
        }
    }
}

/// Author expansion (`includes.users`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub verified: bool,
}

/// A post returned by the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    /// Unique post ID.
    pub id: String,
    /// Post text.
    pub text: String,
    /// When the post was created.
    pub created_at: DateTime<Utc>,
    /// Author user ID.
    pub author_id: String,
    /// Engagement counters.
    pub public_metrics: PublicMetrics,
    /// Detected language (BCP 47), when the API provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Root post of the thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// User this post replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_user_id: Option<String>,
    /// Author profile, resolved from the response expansions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
}

impl Tweet {
    /// Value of the selected engagement metric.
    #[must_use]
    pub fn engagement(&self, metric: EngagementMetric) -> u64 {
        let m = &self.public_metrics;
        match metric {
            EngagementMetric::Likes => m.like_count,
            EngagementMetric::Retweets => m.retweet_count,
            EngagementMetric::Replies => m.reply_count,
            EngagementMetric::Quotes => m.quote_count,
        }
    }
}

/// One row of the counts endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub tweet_count: u64,
}

impl CountBucket {
    /// Calendar-day key of the bucket (`YYYY-MM-DD`).
    #[must_use]
    pub fn bucket_key(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}
