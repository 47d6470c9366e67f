use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Shared generation counter for one plugin context. Workers hold a clone and
/// tag their results with the epoch they started under.
#[derive(Debug, Clone, Default)]
pub struct EpochCounter {
    inner: Arc<AtomicU64>,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Epoch {
        Epoch(self.inner.load(Ordering::Acquire))
    }

    pub fn advance(&self) -> Epoch {
        let previous = self.inner.fetch_add(1, Ordering::AcqRel);
        Epoch(previous.saturating_add(1))
    }

    pub fn is_stale(&self, epoch: Epoch) -> bool {
        epoch < self.current()
    }
}

/// Per-plugin rebuild generation. A newer request supersedes older in-flight
/// rebuilds even within the same epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generation(pub u64);

#[derive(Debug, Default)]
pub struct GenerationCounter {
    latest: u64,
}

impl GenerationCounter {
    pub fn begin(&mut self) -> Generation {
        self.latest = self.latest.wrapping_add(1);
        Generation(self.latest)
    }

    pub fn latest(&self) -> Generation {
        Generation(self.latest)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation.0 == self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_marks_previous_epochs_stale() {
        let counter = EpochCounter::new();
        let start = counter.current();
        assert!(!counter.is_stale(start));

        let next = counter.advance();
        assert_eq!(next, start.next());
        assert!(counter.is_stale(start));
        assert!(!counter.is_stale(next));
    }

    #[test]
    fn clones_share_the_same_counter() {
        let counter = EpochCounter::new();
        let worker_view = counter.clone();
        counter.advance();
        counter.advance();
        assert_eq!(worker_view.current(), Epoch(2));
    }

    #[test]
    fn only_latest_generation_is_current() {
        let mut generations = GenerationCounter::default();
        let first = generations.begin();
        let second = generations.begin();
        assert!(!generations.is_current(first));
        assert!(generations.is_current(second));
        assert_eq!(generations.latest(), second);
    }
}
