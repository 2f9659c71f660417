//! Per-metric sampling state.

use rand::Rng;

use crate::protocol::MetricType;

/// A value together with the presampling rate it arrived with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Sample {
    pub value: f64,
    pub sample_rate: f64,
}

/// Running maximum or minimum of a timer within one window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) enum Extremum {
    /// No value has been observed since the last flush.
    #[default]
    Unset,
    /// The current extremum with the rate it was captured at.
    Set(Sample),
}

impl Extremum {
    /// Offers a value for a new maximum. See [`Self::offer`].
    pub fn offer_upper(&mut self, value: f64, sample_rate: f64) -> Option<f64> {
        self.offer(value, sample_rate, |new, current| new > current)
    }

    /// Offers a value for a new minimum. See [`Self::offer`].
    pub fn offer_lower(&mut self, value: f64, sample_rate: f64) -> Option<f64> {
        self.offer(value, sample_rate, |new, current| new < current)
    }

    /// Offers a value and returns what is left over for the reservoir.
    ///
    /// - An unset extremum absorbs the value and leaves nothing.
    /// - If the value beats the current extremum, it takes its place and the displaced value is
    ///   returned.
    /// - Otherwise, the value itself is returned.
    ///
    /// A new extremum is always tagged with `sample_rate`, the rate of the event being accounted,
    /// even when the value itself was displaced from the other extremum.
    fn offer(
        &mut self,
        value: f64,
        sample_rate: f64,
        wins: impl Fn(f64, f64) -> bool,
    ) -> Option<f64> {
        let leftover = match *self {
            Self::Unset => None,
            Self::Set(current) if wins(value, current.value) => Some(current.value),
            Self::Set(_) => return Some(value),
        };

        *self = Self::Set(Sample { value, sample_rate });
        leftover
    }

    /// Returns the extremum and resets it to [`Extremum::Unset`].
    pub fn take(&mut self) -> Option<Sample> {
        match std::mem::take(self) {
            Self::Unset => None,
            Self::Set(sample) => Some(sample),
        }
    }
}

/// Fixed-size store of timer values.
///
/// The first `capacity` values of a sampling period are appended. After that, values replace a
/// slot chosen at random among the events seen in the current window, so most of them are
/// dropped once the window grows much larger than the reservoir.
#[derive(Clone, Debug)]
pub(crate) struct Reservoir {
    slots: Box<[Option<f64>]>,
    /// Next slot to append to. Only reset when the metric stops sampling.
    index: usize,
}

impl Reservoir {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            index: 0,
        }
    }

    /// Stores a value, replacing a random slot once the reservoir is full.
    pub fn insert(&mut self, value: f64, window_count: u64, rng: &mut impl Rng) {
        if self.index < self.slots.len() {
            self.slots[self.index] = Some(value);
            self.index += 1;
            return;
        }

        if window_count == 0 {
            return;
        }

        let draw = rng.random_range(0..window_count);
        let slot = usize::try_from(draw).ok();
        if let Some(slot) = slot.and_then(|slot| self.slots.get_mut(slot)) {
            *slot = Some(value);
        }
    }

    /// Returns the number of slots holding a value.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Takes all values out of the reservoir, leaving the append index in place.
    pub fn drain(&mut self) -> impl Iterator<Item = f64> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }

    /// Starts appending from the first slot again.
    pub fn rewind(&mut self) {
        self.index = 0;
    }

    #[cfg(test)]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// State specific to the type of a metric.
#[derive(Clone, Debug)]
pub(crate) enum BucketKind {
    Counter,
    Timer(TimerState),
}

/// Extrema and reservoir of a sampled timer.
#[derive(Clone, Debug)]
pub(crate) struct TimerState {
    pub upper: Extremum,
    pub lower: Extremum,
    pub reservoir: Reservoir,
}

/// The sampler's state for a single metric name.
#[derive(Clone, Debug)]
pub(crate) struct SampleBucket {
    /// Whether events are currently aggregated instead of forwarded.
    pub sampling: bool,
    /// Events received since the last window evaluation.
    pub last_window_count: u64,
    /// Re-weighted sum of sampled values.
    pub sum: f64,
    /// Re-weighted number of sampled events.
    pub count: f64,
    pub kind: BucketKind,
}

impl SampleBucket {
    /// Creates the bucket for the first event of a counter.
    pub fn counter() -> Self {
        Self::new(BucketKind::Counter)
    }

    /// Creates the bucket for the first event of a timer.
    pub fn timer(reservoir_size: usize) -> Self {
        Self::new(BucketKind::Timer(TimerState {
            upper: Extremum::Unset,
            lower: Extremum::Unset,
            reservoir: Reservoir::new(reservoir_size),
        }))
    }

    fn new(kind: BucketKind) -> Self {
        Self {
            sampling: false,
            last_window_count: 1,
            sum: 0.0,
            count: 0.0,
            kind,
        }
    }

    /// Returns the metric type this bucket was created for.
    pub fn ty(&self) -> MetricType {
        match self.kind {
            BucketKind::Counter => MetricType::Counter,
            BucketKind::Timer(_) => MetricType::Timer,
        }
    }

    /// Adds a sampled event to the sum and count.
    ///
    /// Both are scaled up by the inverse of the presampling rate if that rate is in `(0, 1)`.
    pub fn accumulate(&mut self, value: f64, presampling_rate: f64) {
        let weight = if presampling_rate > 0.0 && presampling_rate < 1.0 {
            1.0 / presampling_rate
        } else {
            1.0
        };

        self.sum += value * weight;
        self.count += weight;
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    use super::*;

    fn sample(value: f64, sample_rate: f64) -> Sample {
        Sample { value, sample_rate }
    }

    #[test]
    fn test_extremum_absorbs_first_value() {
        let mut upper = Extremum::Unset;
        assert_eq!(upper.offer_upper(3.0, 1.0), None);
        assert_eq!(upper, Extremum::Set(sample(3.0, 1.0)));
    }

    #[test]
    fn test_extremum_displaces_previous() {
        let mut upper = Extremum::Set(sample(3.0, 0.5));
        assert_eq!(upper.offer_upper(5.0, 1.0), Some(3.0));
        assert_eq!(upper.offer_upper(4.0, 1.0), Some(4.0));
        // Ties do not displace.
        assert_eq!(upper.offer_upper(5.0, 0.1), Some(5.0));
        assert_eq!(upper.take(), Some(sample(5.0, 1.0)));
        assert_eq!(upper, Extremum::Unset);
        assert_eq!(upper.take(), None);
    }

    #[test]
    fn test_extremum_lower() {
        let mut lower = Extremum::Unset;
        assert_eq!(lower.offer_lower(-1.0, 1.0), None);
        assert_eq!(lower.offer_lower(-2.0, 1.0), Some(-1.0));
        assert_eq!(lower.offer_lower(0.0, 1.0), Some(0.0));
    }

    #[test]
    fn test_extremum_takes_rate_of_current_event() {
        let mut lower = Extremum::Set(sample(4.0, 1.0));
        // A value displaced from the maximum arrives with the rate of the displacing event.
        assert_eq!(lower.offer_lower(2.0, 0.25), Some(4.0));
        assert_eq!(lower.take(), Some(sample(2.0, 0.25)));
    }

    #[test]
    fn test_reservoir_appends_until_full() {
        let mut rng = Pcg32::seed_from_u64(0);
        let mut reservoir = Reservoir::new(2);

        reservoir.insert(1.0, 1, &mut rng);
        reservoir.insert(2.0, 2, &mut rng);
        assert_eq!(reservoir.occupied(), 2);
        assert_eq!(reservoir.index(), 2);

        for _ in 0..100 {
            reservoir.insert(3.0, 1_000, &mut rng);
        }
        assert_eq!(reservoir.occupied(), 2);

        let values: Vec<_> = reservoir.drain().collect();
        assert_eq!(values.len(), 2);
        assert_eq!(reservoir.occupied(), 0);
        // Draining keeps the append position.
        assert_eq!(reservoir.index(), 2);

        reservoir.rewind();
        assert_eq!(reservoir.index(), 0);
    }

    #[test]
    fn test_reservoir_replacement_within_window() {
        let mut rng = Pcg32::seed_from_u64(42);
        let mut reservoir = Reservoir::new(3);
        for value in [1.0, 2.0, 3.0] {
            reservoir.insert(value, 3, &mut rng);
        }

        // With a window of three events, every draw hits a slot.
        reservoir.insert(10.0, 3, &mut rng);
        let values: Vec<_> = reservoir.drain().collect();
        assert_eq!(values.iter().filter(|&&v| v == 10.0).count(), 1);
    }

    #[test]
    fn test_reservoir_empty() {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut reservoir = Reservoir::new(0);
        reservoir.insert(1.0, 10, &mut rng);
        assert_eq!(reservoir.occupied(), 0);
    }

    #[test]
    fn test_accumulate_reweights() {
        let mut bucket = SampleBucket::counter();
        bucket.accumulate(2.0, 0.5);
        bucket.accumulate(2.0, 1.0);
        // Rates outside of (0, 1) count once.
        bucket.accumulate(2.0, 0.0);
        bucket.accumulate(2.0, 2.0);

        assert_eq!(bucket.sum, 10.0);
        assert_eq!(bucket.count, 5.0);
    }

    #[test]
    fn test_bucket_type() {
        assert_eq!(SampleBucket::counter().ty(), MetricType::Counter);
        assert_eq!(SampleBucket::timer(4).ty(), MetricType::Timer);
        assert_eq!(SampleBucket::timer(4).last_window_count, 1);
    }
}
