//! Unfiltered item collector (reply threads).

use super::Aggregator;

/// Collects every item in API order.
#[derive(Debug, Clone)]
pub struct ItemCollector<T> {
    items: Vec<T>,
}

impl<T> ItemCollector<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for ItemCollector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Aggregator for ItemCollector<T> {
    type Item = T;
    type Output = Vec<T>;

    fn fold(&mut self, items: Vec<T>) {
        self.items.extend(items);
    }

    fn finish(self) -> Vec<T> {
        self.items
    }
}
