//! Output artifacts assembled from terminal aggregator state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::aggregate::CountTable;
use crate::error::{HarvestError, Result};
use crate::twitter::{EngagementMetric, Tweet};

/// Identifies one run; used to stamp output file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunId {
    started_at: DateTime<Utc>,
}

impl RunId {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self { started_at }
    }

    #[must_use]
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// `YYYYmmdd-HHMMSS` in UTC.
    #[must_use]
    pub fn stamp(&self) -> String {
        self.started_at.format("%Y%m%d-%H%M%S").to_string()
    }
}

/// One row of the engagement count table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdRow {
    pub label: String,
    pub query: String,
    pub count: u64,
    /// `false` when pagination stopped early and the count is a lower bound.
    pub complete: bool,
}

/// Engagement counts per query, in query order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    pub threshold: u64,
    pub metric: EngagementMetric,
    pub rows: Vec<ThresholdRow>,
}

impl ThresholdTable {
    #[must_use]
    pub fn new(threshold: u64, metric: EngagementMetric) -> Self {
        Self {
            threshold,
            metric,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: ThresholdRow) {
        self.rows.push(row);
    }
}

/// Replies collected per conversation, in identifier order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReplyArchive {
    conversations: IndexMap<String, Vec<Tweet>>,
}

impl ReplyArchive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the replies of one conversation.
    pub fn insert(&mut self, conversation_id: impl Into<String>, replies: Vec<Tweet>) {
        self.conversations.insert(conversation_id.into(), replies);
    }

    #[must_use]
    pub fn get(&self, conversation_id: &str) -> Option<&[Tweet]> {
        self.conversations.get(conversation_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn reply_count(&self) -> usize {
        self.conversations.values().map(Vec::len).sum()
    }
}

/// A materialized run result.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Daily counts: rows are dates, columns are query labels.
    Counts(CountTable),
    /// Engagement counts: one row per query.
    Popular(ThresholdTable),
    /// Reply threads keyed by conversation.
    Replies(ReplyArchive),
}

impl Artifact {
    /// File name used when no explicit output path is given.
    #[must_use]
    pub fn default_file_name(&self, run: &RunId) -> String {
        let stamp = run.stamp();
        match self {
            Self::Counts(_) => format!("x_counts_recent_{stamp}.csv"),
            Self::Popular(_) => format!("x_popular_{stamp}.csv"),
            Self::Replies(_) => format!("replies_by_conversation_{stamp}.json"),
        }
    }

    /// Serialize the artifact. Identical state renders identically.
    pub fn render(&self) -> Result<String> {
        match self {
            Self::Counts(table) => render_count_table(table),
            Self::Popular(table) => render_threshold_table(table),
            Self::Replies(archive) => {
                let mut json = serde_json::to_string_pretty(archive)?;
                json.push('\n');
                Ok(json)
            }
        }
    }
}

fn render_count_table(table: &CountTable) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["date"];
    header.extend(table.labels());
    writer.write_record(&header)?;

    for key in table.row_keys() {
        let mut record = vec![key.to_string()];
        record.extend(table.labels().map(|label| {
            if table.is_complete(label) {
                table.cell(key, label).to_string()
            } else {
                table.get(key, label).map_or_else(String::new, |v| v.to_string())
            }
        }));
        writer.write_record(&record)?;
    }

    // Trailing marker row, only when some column is a partial series.
    if table.incomplete_labels().next().is_some() {
        let mut record = vec!["complete"];
        record.extend(
            table
                .labels()
                .map(|label| if table.is_complete(label) { "true" } else { "false" }),
        );
        writer.write_record(&record)?;
    }

    finish_csv(writer)
}

fn render_threshold_table(table: &ThresholdTable) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["label", "query", "metric", "threshold", "count", "complete"])?;
    let metric = table.metric.to_string();
    let threshold = table.threshold.to_string();
    for row in &table.rows {
        writer.write_record([
            row.label.as_str(),
            row.query.as_str(),
            &metric,
            &threshold,
            &row.count.to_string(),
            if row.complete { "true" } else { "false" },
        ])?;
    }
    finish_csv(writer)
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| HarvestError::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| HarvestError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Resolve the output path: explicit path, or the default name in `dir`.
#[must_use]
pub fn output_path(explicit: Option<&Path>, dir: &Path, artifact: &Artifact, run: &RunId) -> PathBuf {
    explicit.map_or_else(
        || dir.join(artifact.default_file_name(run)),
        Path::to_path_buf,
    )
}

/// Write a rendered artifact, creating parent directories.
pub fn write_artifact(path: &Path, artifact: &Artifact) -> Result<()> {
    let content = artifact.render()?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}
