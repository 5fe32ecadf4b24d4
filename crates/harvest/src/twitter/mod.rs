//! X/Twitter API v2 access.
//!
//! Provides the page fetcher for the recent search and counts endpoints and
//! the data types they return.

mod client;
mod response;
mod types;

pub use client::{Endpoint, PageFetcher, PageRequest, XClient, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
pub use response::{decode_page, Record};
pub use types::{
    format_timestamp, CountBucket, Cursor, EngagementMetric, LabeledQuery, Page, PublicMetrics,
    Query, TimeWindow, Tweet, User, END_GRACE_SECS,
};
