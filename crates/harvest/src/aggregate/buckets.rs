//! Per-day count series and the label-by-day table built from them.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

use crate::error::{HarvestError, Result};
use crate::twitter::CountBucket;

use super::Aggregator;

/// Per-loop accumulator of `(bucket_key, count)` rows in API order.
///
/// A key seen twice within one loop has its counts summed.
#[derive(Debug, Clone, Default)]
pub struct BucketSeries {
    rows: IndexMap<String, u64>,
}

impl BucketSeries {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for BucketSeries {
    type Item = CountBucket;
    type Output = Vec<(String, u64)>;

    fn fold(&mut self, items: Vec<CountBucket>) {
        for bucket in items {
            *self.rows.entry(bucket.bucket_key()).or_insert(0) += bucket.tweet_count;
        }
    }

    fn finish(self) -> Vec<(String, u64)> {
        self.rows.into_iter().collect()
    }
}

/// Counts keyed by bucket (rows) and query label (columns).
///
/// The first complete series fixes the row order. Buckets first seen in any
/// other series are appended after the existing rows. In a complete column a
/// bucket the series did not report reads as zero; in a column whose loop
/// stopped early it has no value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountTable {
    keys: IndexSet<String>,
    reference: Option<IndexSet<String>>,
    columns: IndexMap<String, Column>,
    mismatched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Column {
    cells: HashMap<String, u64>,
    complete: bool,
}

impl CountTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one query's series as a column.
    ///
    /// `complete` is `false` when the loop stopped early; such a series
    /// neither fixes the row order nor is checked against it.
    pub fn insert_series(
        &mut self,
        label: &str,
        series: Vec<(String, u64)>,
        complete: bool,
    ) -> Result<()> {
        if self.columns.contains_key(label) {
            return Err(HarvestError::InputFormat(format!(
                "column '{label}' already present in count table"
            )));
        }

        let mut order = IndexSet::with_capacity(series.len());
        let mut cells = HashMap::with_capacity(series.len());
        for (key, count) in series {
            order.insert(key.clone());
            *cells.entry(key).or_insert(0) += count;
        }

        if !complete {
            self.keys.extend(order);
        } else if let Some(reference) = &self.reference {
            let missing = reference.iter().filter(|k| !cells.contains_key(*k)).count();
            let extra = order.iter().filter(|k| !reference.contains(*k)).count();
            if missing > 0 || extra > 0 {
                warn!(
                    label,
                    missing, extra, "Bucket keys differ from first series; filling gaps with zero"
                );
                self.mismatched.push(label.to_string());
            }
            self.keys.extend(order);
        } else {
            let earlier = std::mem::replace(&mut self.keys, order.clone());
            self.keys.extend(earlier);
            self.reference = Some(order);
        }

        self.columns
            .insert(label.to_string(), Column { cells, complete });
        Ok(())
    }

    /// Row keys in canonical order.
    pub fn row_keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Column labels in insertion order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Reported value, `None` when the series had no such bucket.
    #[must_use]
    pub fn get(&self, key: &str, label: &str) -> Option<u64> {
        self.columns.get(label)?.cells.get(key).copied()
    }

    /// Value with zero fill.
    #[must_use]
    pub fn cell(&self, key: &str, label: &str) -> u64 {
        self.get(key, label).unwrap_or(0)
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Labels whose bucket set differed from the first complete series.
    #[must_use]
    pub fn mismatched_labels(&self) -> &[String] {
        &self.mismatched
    }

    /// Whether the column's loop ran to completion. Unknown labels are not.
    #[must_use]
    pub fn is_complete(&self, label: &str) -> bool {
        self.columns.get(label).is_some_and(|c| c.complete)
    }

    /// Labels whose loop stopped early.
    pub fn incomplete_labels(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|(_, c)| !c.complete)
            .map(|(label, _)| label.as_str())
    }
}
