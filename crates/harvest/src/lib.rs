//! Harvest crate for X/Twitter recent-search data collection.
//!
//! This crate provides:
//! - A page fetcher for the X API v2 recent search and counts endpoints
//! - A cursor pagination driver with pacing, rate-limit backoff and
//!   cancellation
//! - Aggregators for engagement thresholds, daily counts and reply threads
//! - CSV/JSON materialization of run results

pub mod aggregate;
pub mod config;
pub mod error;
pub mod paginate;
pub mod pipeline;
pub mod storage;
pub mod twitter;

// Re-export main types
pub use config::ApiConfig;
pub use error::{FetchFailure, HarvestError, Result};
pub use paginate::{AbortPolicy, Outcome, PaginationConfig, Paginator, StopReason};
pub use pipeline::{Harvester, LoopReport, LoopStatus, PipelineConfig, RunReport};
pub use storage::{Artifact, RunId};
pub use twitter::{LabeledQuery, Query, TimeWindow, Tweet, XClient};
