//! Watermark-based "what's new since I last looked" selection.

use crate::messages::{LimitOrderBook, Trade};
use std::collections::VecDeque;

/// Anything with a creation time and a fairness release time (both µs).
pub trait Timestamped {
    fn creation_timestamp(&self) -> u64;
    fn release_timestamp(&self) -> u64;
}

impl Timestamped for Trade {
    fn creation_timestamp(&self) -> u64 {
        self.creation_timestamp
    }

    fn release_timestamp(&self) -> u64 {
        self.release_timestamp
    }
}

impl Timestamped for LimitOrderBook {
    fn creation_timestamp(&self) -> u64 {
        self.creation_timestamp
    }

    fn release_timestamp(&self) -> u64 {
        self.release_timestamp
    }
}

/// Items created after `watermark` and already released at `now`, ascending by
/// creation time.
pub fn since_watermark<'a, T, I>(items: I, watermark: u64, now: u64) -> Vec<T>
where
    T: Timestamped + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut out: Vec<T> = items
        .into_iter()
        .filter(|i| i.creation_timestamp() > watermark && i.release_timestamp() <= now)
        .cloned()
        .collect();
    out.sort_by_key(|i| i.creation_timestamp());
    out
}

/// Creation time of the newest item a caller has already seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(pub u64);

impl Watermark {
    pub fn value(self) -> u64 {
        self.0
    }

    /// Moves past the newest of `items`. Never moves backwards.
    pub fn advance<T: Timestamped>(&mut self, items: &[T]) {
        if let Some(newest) = items.iter().map(Timestamped::creation_timestamp).max() {
            self.0 = self.0.max(newest);
        }
    }
}

/// Bounded cache of the most recent items, oldest evicted first.
#[derive(Clone, Debug)]
pub struct RecentCache<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Timestamped + Clone> RecentCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn since(&self, watermark: u64, now: u64) -> Vec<T> {
        since_watermark(&self.items, watermark, now)
    }
}
