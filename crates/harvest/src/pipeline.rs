//! Harvest pipeline - runs one pagination loop per query and assembles the
//! run artifact.
//!
//! Loops run one after another. Each loop owns its aggregator; the shared
//! table is only touched once a loop has reached a terminal state. A loop
//! that stops early is reported and its siblings still run.

use tracing::{info, warn};

use crate::aggregate::{Aggregator, BucketSeries, CountTable, ItemCollector, ThresholdCounter};
use crate::error::Result;
use crate::paginate::{PaginationConfig, Paginator, QueryPages, StopReason};
use crate::storage::{ReplyArchive, ThresholdRow, ThresholdTable};
use crate::twitter::{
    EngagementMetric, LabeledQuery, PageFetcher, Query, Record, TimeWindow, MAX_PAGE_SIZE,
};

/// Pipeline settings shared by every loop of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// `max_results` per search page.
    pub page_size: u32,
    /// Pacing, backoff and retry settings.
    pub pagination: PaginationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            pagination: PaginationConfig::default(),
        }
    }
}

/// How one loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStatus {
    Complete,
    Stopped(StopReason),
}

/// Per-loop summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    /// Query label or conversation ID.
    pub label: String,
    /// Pages folded.
    pub pages: usize,
    pub status: LoopStatus,
}

impl LoopReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == LoopStatus::Complete
    }
}

/// Artifact data plus what happened to every loop.
#[derive(Debug, Clone)]
pub struct RunReport<T> {
    pub data: T,
    pub loops: Vec<LoopReport>,
    /// Labels never started because the run was cancelled.
    pub skipped: Vec<String>,
}

impl<T> RunReport<T> {
    /// Every planned loop ran to completion.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        self.skipped.is_empty() && self.loops.iter().all(LoopReport::is_complete)
    }

    /// Loops that stopped early.
    pub fn failures(&self) -> impl Iterator<Item = &LoopReport> {
        self.loops.iter().filter(|l| !l.is_complete())
    }
}

/// Harvest pipeline orchestrator.
pub struct Harvester<F> {
    fetcher: F,
    paginator: Paginator,
    page_size: u32,
}

impl<F: PageFetcher> Harvester<F> {
    /// Create a new pipeline.
    #[must_use]
    pub fn new(fetcher: F, config: PipelineConfig) -> Self {
        Self {
            fetcher,
            paginator: Paginator::new(config.pagination),
            page_size: config.page_size,
        }
    }

    /// Use an existing paginator (shares its cancellation token).
    #[must_use]
    pub fn with_paginator(mut self, paginator: Paginator) -> Self {
        self.paginator = paginator;
        self
    }

    /// Count posts per query whose `metric` reaches `threshold`.
    pub async fn popular(
        &self,
        queries: &[LabeledQuery],
        window: &TimeWindow,
        threshold: u64,
        metric: EngagementMetric,
    ) -> Result<RunReport<ThresholdTable>> {
        let mut table = ThresholdTable::new(threshold, metric);
        let mut loops = Vec::with_capacity(queries.len());

        for (i, q) in queries.iter().enumerate() {
            if self.is_cancelled() {
                return Ok(cancelled_run(table, loops, labels(&queries[i..])));
            }
            info!(label = %q.label, query = %q.query, threshold, %metric, "Counting popular posts");

            let counter = ThresholdCounter::new(threshold, metric);
            let (count, report) = self.drive(&q.label, &q.query, window, counter).await?;
            info!(label = %q.label, count, pages = report.pages, "Query finished");

            table.push(ThresholdRow {
                label: q.label.clone(),
                query: q.query.to_string(),
                count,
                complete: report.is_complete(),
            });
            loops.push(report);
        }

        Ok(RunReport {
            data: table,
            loops,
            skipped: Vec::new(),
        })
    }

    /// Daily post counts per query, one column per label.
    pub async fn daily(
        &self,
        queries: &[LabeledQuery],
        window: &TimeWindow,
    ) -> Result<RunReport<CountTable>> {
        let mut table = CountTable::new();
        let mut loops = Vec::with_capacity(queries.len());

        for (i, q) in queries.iter().enumerate() {
            if self.is_cancelled() {
                return Ok(cancelled_run(table, loops, labels(&queries[i..])));
            }
            info!(label = %q.label, query = %q.query, "Fetching daily counts");

            let (series, report) = self
                .drive(&q.label, &q.query, window, BucketSeries::new())
                .await?;
            info!(label = %q.label, days = series.len(), pages = report.pages, "Query finished");

            table.insert_series(&q.label, series, report.is_complete())?;
            loops.push(report);
        }

        Ok(RunReport {
            data: table,
            loops,
            skipped: Vec::new(),
        })
    }

    /// Every post of each conversation, keyed by conversation ID.
    pub async fn replies(
        &self,
        conversation_ids: &[String],
        window: &TimeWindow,
    ) -> Result<RunReport<ReplyArchive>> {
        let mut archive = ReplyArchive::new();
        let mut loops = Vec::with_capacity(conversation_ids.len());

        for (i, id) in conversation_ids.iter().enumerate() {
            if self.is_cancelled() {
                return Ok(cancelled_run(archive, loops, conversation_ids[i..].to_vec()));
            }
            info!(conversation_id = %id, "Fetching replies");

            let query = Query::conversation(id);
            let (tweets, report) = self
                .drive(id, &query, window, ItemCollector::new())
                .await?;
            info!(conversation_id = %id, replies = tweets.len(), pages = report.pages, "Conversation finished");

            archive.insert(id.clone(), tweets);
            loops.push(report);
        }

        Ok(RunReport {
            data: archive,
            loops,
            skipped: Vec::new(),
        })
    }

    /// Run one loop to a terminal state.
    async fn drive<A>(
        &self,
        label: &str,
        query: &Query,
        window: &TimeWindow,
        aggregator: A,
    ) -> Result<(A::Output, LoopReport)>
    where
        A: Aggregator + Send,
        A::Item: Record,
    {
        let source = QueryPages::new(&self.fetcher, query, window, self.page_size);
        let outcome = self.paginator.run_strict(label, &source, aggregator).await?;
        let (data, pages, reason) = outcome.into_parts();

        let status = match reason {
            None => LoopStatus::Complete,
            Some(reason) => {
                warn!(label, pages, reason = %reason, "Loop stopped early; keeping partial result");
                LoopStatus::Stopped(reason)
            }
        };

        Ok((
            data,
            LoopReport {
                label: label.to_string(),
                pages,
                status,
            },
        ))
    }

    fn is_cancelled(&self) -> bool {
        self.paginator.cancellation().is_cancelled()
    }
}

fn cancelled_run<T>(data: T, loops: Vec<LoopReport>, skipped: Vec<String>) -> RunReport<T> {
    warn!(skipped = skipped.len(), "Run cancelled; remaining loops skipped");
    RunReport {
        data,
        loops,
        skipped,
    }
}

fn labels(queries: &[LabeledQuery]) -> Vec<String> {
    queries.iter().map(|q| q.label.clone()).collect()
}
