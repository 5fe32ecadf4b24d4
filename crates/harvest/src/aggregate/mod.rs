//! Aggregation policies folded over pages by the pagination driver.

mod buckets;
mod collect;
mod threshold;

pub use buckets::{BucketSeries, CountTable};
pub use collect::ItemCollector;
pub use threshold::ThresholdCounter;

/// Accumulator fed one page of items at a time.
///
/// Each pagination loop owns its aggregator; nothing is shared between
/// loops until [`Aggregator::finish`] hands over the final state.
pub trait Aggregator {
    /// Item type consumed per page.
    type Item;
    /// Final state.
    type Output;

    /// Fold one page of items, in API order.
    fn fold(&mut self, items: Vec<Self::Item>);

    /// Consume the accumulator and return its final state.
    fn finish(self) -> Self::Output;
}
