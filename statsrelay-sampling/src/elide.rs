use std::time::Instant;

use crate::index::MetricIndex;
use crate::protocol::{MetricType, ParsedLine};

#[derive(Clone, Copy, Debug)]
struct EliderEntry {
    generations: u64,
    last_seen: Instant,
}

/// Suppresses runs of zero-valued counters.
///
/// Idle counters are often reported as `0` on every interval. The elider forwards the first zero
/// of a run and drops the repetitions until the counter reports a non-zero value again.
///
/// Entries for names that are no longer reported are dropped with [`gc`](Self::gc).
#[derive(Debug)]
pub struct Elider {
    skip: u64,
    entries: MetricIndex<EliderEntry>,
}

impl Elider {
    /// Creates a new elider.
    ///
    /// `skip` is the generation a name starts at after a reset. The first zero of a run reports
    /// this generation.
    pub fn new(skip: u64) -> Self {
        Self {
            skip,
            entries: MetricIndex::new(),
        }
    }

    /// Returns the number of tracked names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no names are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records another zero for `key` and returns its generation before the increment.
    pub fn mark(&mut self, key: &str, now: Instant) -> u64 {
        let generation = self
            .entries
            .get(key)
            .map_or(self.skip, |entry| entry.generations);

        let entry = EliderEntry {
            generations: generation.saturating_add(1),
            last_seen: now,
        };
        self.entries.insert(key, entry);
        generation
    }

    /// Resets `key` to the initial generation and returns it.
    pub fn unmark(&mut self, key: &str, now: Instant) -> u64 {
        let entry = EliderEntry {
            generations: self.skip,
            last_seen: now,
        };
        self.entries.insert(key, entry);
        self.skip
    }

    /// Returns `true` if the line should be dropped instead of forwarded.
    ///
    /// Only counters are elided.
    pub fn should_elide(&mut self, name: &str, line: &ParsedLine<'_>, now: Instant) -> bool {
        if line.ty != MetricType::Counter {
            return false;
        }

        if line.value == 0.0 {
            self.mark(name, now) != self.skip
        } else {
            self.unmark(name, now);
            false
        }
    }

    /// Drops every name not seen after `cutoff` and returns how many were removed.
    pub fn gc(&mut self, cutoff: Instant) -> usize {
        let before = self.entries.len();
        self.entries.filter(|_, entry| entry.last_seen > cutoff);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_mark_counts_generations() {
        let now = Instant::now();
        let mut elider = Elider::new(2);

        assert_eq!(elider.mark("foo", now), 2);
        assert_eq!(elider.mark("foo", now), 3);
        assert_eq!(elider.mark("foo", now), 4);
        assert_eq!(elider.mark("bar", now), 2);

        assert_eq!(elider.unmark("foo", now), 2);
        assert_eq!(elider.mark("foo", now), 2);
        assert_eq!(elider.len(), 2);
    }

    #[test]
    fn test_mark_saturates() {
        let now = Instant::now();
        let mut elider = Elider::new(u64::MAX);
        assert_eq!(elider.mark("foo", now), u64::MAX);
        assert_eq!(elider.mark("foo", now), u64::MAX);
    }

    #[test]
    fn test_unmark_unknown_key() {
        let mut elider = Elider::new(0);
        assert_eq!(elider.unmark("foo", Instant::now()), 0);
        assert_eq!(elider.len(), 1);
    }

    #[test]
    fn test_elides_zero_runs() {
        let now = Instant::now();
        let mut elider = Elider::new(0);

        let zero = ParsedLine::parse("hits:0|c").unwrap();
        let one = ParsedLine::parse("hits:1|c").unwrap();

        assert!(!elider.should_elide("hits", &zero, now));
        assert!(elider.should_elide("hits", &zero, now));
        assert!(elider.should_elide("hits", &zero, now));

        assert!(!elider.should_elide("hits", &one, now));
        assert!(!elider.should_elide("hits", &one, now));

        assert!(!elider.should_elide("hits", &zero, now));
        assert!(elider.should_elide("hits", &zero, now));
    }

    #[test]
    fn test_only_counters() {
        let now = Instant::now();
        let mut elider = Elider::new(0);
        let gauge = ParsedLine::parse("temp:0|g").unwrap();

        for _ in 0..3 {
            assert!(!elider.should_elide("temp", &gauge, now));
        }
        assert!(elider.is_empty());
    }

    #[test]
    fn test_gc() {
        let start = Instant::now();
        let later = start + Duration::from_secs(30);
        let mut elider = Elider::new(0);

        elider.mark("old", start);
        elider.mark("older", start);
        elider.unmark("new", later);

        assert_eq!(elider.gc(start), 2);
        assert_eq!(elider.len(), 1);
        assert_eq!(elider.mark("new", later), 0);

        assert_eq!(elider.gc(start), 0);
        assert_eq!(elider.gc(later), 1);
        assert!(elider.is_empty());
    }
}
