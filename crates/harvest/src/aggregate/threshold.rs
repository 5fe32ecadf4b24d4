//! Engagement threshold counter.

use tracing::trace;

use crate::twitter::{EngagementMetric, Tweet};

use super::Aggregator;

/// Counts posts whose engagement meets or exceeds a threshold (inclusive).
#[derive(Debug, Clone)]
pub struct ThresholdCounter {
    threshold: u64,
    metric: EngagementMetric,
    count: u64,
}

impl ThresholdCounter {
    #[must_use]
    pub fn new(threshold: u64, metric: EngagementMetric) -> Self {
        Self {
            threshold,
            metric,
            count: 0,
        }
    }

    /// Whether a single post passes the filter.
    #[must_use]
    pub fn matches(&self, tweet: &Tweet) -> bool {
        tweet.engagement(self.metric) >= self.threshold
    }

    /// Running count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Aggregator for ThresholdCounter {
    type Item = Tweet;
    type Output = u64;

    fn fold(&mut self, items: Vec<Tweet>) {
        let before = self.count;
        self.count += items.iter().filter(|t| self.matches(t)).count() as u64;
        trace!(
            page_items = items.len(),
            matched = self.count - before,
            "Folded page into threshold counter"
        );
    }

    fn finish(self) -> u64 {
        self.count
    }
}
