use rand::SeedableRng;
use rand_pcg::Pcg32;

use crate::bucket::{BucketKind, SampleBucket};
use crate::config::SamplerConfig;
use crate::index::MetricIndex;
use crate::protocol::{MetricType, ParsedLine, format_line};

/// Tells the caller what to do with an event it passed to the [`Sampler`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SamplingResult {
    /// The event was absorbed. The sampler will emit an aggregate on the next flush.
    Sampling,
    /// The event was not absorbed and must be forwarded as it is.
    NotSampling,
}

/// Decides per metric name whether events are forwarded or summarized.
///
/// Every name starts out forwarded. Once a name receives more than
/// [`threshold`](SamplerConfig::threshold) events within a window, its events are absorbed:
///
/// - Counters are reduced to their mean, emitted with a sample rate of `1 / count`.
/// - Timers keep their maximum and minimum, plus a bounded reservoir of the remaining values.
///
/// The caller drives windows by calling [`flush`](Self::flush) periodically. Each flush emits the
/// aggregates of the past window and re-evaluates which names are sampled. A name that stays at or
/// below the threshold for a full window is forwarded again.
///
/// Only counters and timers are sampled. All other metric types are always forwarded.
///
/// The sampler does no synchronization. Callers that need several threads shard metric names
/// across independent samplers.
#[derive(Debug)]
pub struct Sampler {
    config: SamplerConfig,
    rng: Pcg32,
    buckets: MetricIndex<SampleBucket>,
}

impl Sampler {
    /// Creates a new sampler with the given configuration.
    pub fn new(config: SamplerConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);

        Self {
            rng: Pcg32::seed_from_u64(seed),
            buckets: MetricIndex::with_capacity(config.index_capacity),
            config,
        }
    }

    /// Returns the configuration of this sampler.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// The number of events per window above which a name is sampled.
    pub fn threshold(&self) -> u64 {
        self.config.threshold
    }

    /// The window length in seconds.
    pub fn window(&self) -> u64 {
        self.config.window
    }

    /// The number of timer values retained per name and window.
    pub fn reservoir_size(&self) -> usize {
        self.config.reservoir_size
    }

    /// Returns the number of tracked metric names.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no metric names are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Returns `true` if events for `name` are currently absorbed.
    pub fn is_sampling(&self, name: &str) -> bool {
        self.buckets.get(name).is_some_and(|bucket| bucket.sampling)
    }

    /// Accounts a validated event.
    ///
    /// Counters and timers are dispatched to [`consider_counter`](Self::consider_counter) and
    /// [`consider_timer`](Self::consider_timer). Everything else is never sampled.
    pub fn consider(&mut self, name: &str, line: &ParsedLine<'_>) -> SamplingResult {
        match line.ty {
            MetricType::Counter => self.consider_counter(name, line),
            MetricType::Timer => self.consider_timer(name, line),
            MetricType::KeyValue | MetricType::Gauge | MetricType::Histogram | MetricType::Set => {
                SamplingResult::NotSampling
            }
        }
    }

    /// Accounts a counter event.
    ///
    /// Returns [`SamplingResult::NotSampling`] if the line is not a counter, or if `name` was
    /// first seen with a different type.
    pub fn consider_counter(&mut self, name: &str, line: &ParsedLine<'_>) -> SamplingResult {
        if line.ty != MetricType::Counter {
            return SamplingResult::NotSampling;
        }

        let Some(bucket) = self.buckets.get_mut(name) else {
            self.buckets.insert(name, SampleBucket::counter());
            return SamplingResult::NotSampling;
        };

        if bucket.ty() != MetricType::Counter || !count_event(name, bucket, self.config.threshold)
        {
            return SamplingResult::NotSampling;
        }

        bucket.accumulate(line.value, line.presampling_rate);
        SamplingResult::Sampling
    }

    /// Accounts a timer event.
    ///
    /// Returns [`SamplingResult::NotSampling`] if the line is not a timer, or if `name` was first
    /// seen with a different type.
    pub fn consider_timer(&mut self, name: &str, line: &ParsedLine<'_>) -> SamplingResult {
        if line.ty != MetricType::Timer {
            return SamplingResult::NotSampling;
        }

        let Some(bucket) = self.buckets.get_mut(name) else {
            let bucket = SampleBucket::timer(self.config.reservoir_size);
            self.buckets.insert(name, bucket);
            return SamplingResult::NotSampling;
        };

        if bucket.ty() != MetricType::Timer || !count_event(name, bucket, self.config.threshold) {
            return SamplingResult::NotSampling;
        }

        let rate = line.presampling_rate;
        let window_count = bucket.last_window_count;
        let candidate = match &mut bucket.kind {
            BucketKind::Timer(timer) => {
                // A value only reaches the reservoir if it is neither a new maximum nor minimum,
                // or if it displaced one of them. Values absorbed by an unset extremum are not
                // accumulated.
                let candidate = timer
                    .upper
                    .offer_upper(line.value, rate)
                    .and_then(|value| timer.lower.offer_lower(value, rate));

                if let Some(value) = candidate {
                    timer.reservoir.insert(value, window_count, &mut self.rng);
                }
                candidate
            }
            BucketKind::Counter => None,
        };

        if let Some(value) = candidate {
            bucket.accumulate(value, rate);
        }

        SamplingResult::Sampling
    }

    /// Re-evaluates the sampling state of every name and starts a new window.
    ///
    /// Names that received more than `threshold` events in the past window are sampled, all
    /// others are forwarded again. This is also the last step of [`flush`](Self::flush).
    pub fn update_flags(&mut self) {
        let threshold = self.config.threshold;
        for (name, bucket) in &mut self.buckets {
            update_bucket(name, bucket, threshold);
        }
    }

    /// Emits the aggregates of all sampled names and starts a new window.
    ///
    /// `emit` is invoked with the metric name and a line of the form `name:value|type@rate`
    /// without trailing newline.
    pub fn flush<F>(&mut self, mut emit: F)
    where
        F: FnMut(&str, &str),
    {
        let threshold = self.config.threshold;
        for (name, bucket) in &mut self.buckets {
            if bucket.sampling && bucket.count > 0.0 {
                flush_bucket(name, bucket, &mut emit);
            }
            update_bucket(name, bucket, threshold);
        }
    }
}

/// Counts an event in the current window and returns whether the name is sampled.
fn count_event(name: &str, bucket: &mut SampleBucket, threshold: u64) -> bool {
    bucket.last_window_count += 1;

    if !bucket.sampling && bucket.last_window_count > threshold {
        statsrelay_log::debug!(metric = name, ty = %bucket.ty(), "started sampling");
        bucket.sampling = true;
    }

    bucket.sampling
}

fn update_bucket(name: &str, bucket: &mut SampleBucket, threshold: u64) {
    if bucket.last_window_count > threshold {
        bucket.sampling = true;
    } else if bucket.sampling {
        bucket.sampling = false;
        if let BucketKind::Timer(timer) = &mut bucket.kind {
            timer.reservoir.rewind();
        }
        statsrelay_log::debug!(metric = name, ty = %bucket.ty(), "stopped sampling");
    }

    bucket.last_window_count = 0;
}

fn flush_bucket<F>(name: &str, bucket: &mut SampleBucket, emit: &mut F)
where
    F: FnMut(&str, &str),
{
    let count = bucket.count;

    match &mut bucket.kind {
        BucketKind::Counter => {
            let line = format_line(name, bucket.sum / count, MetricType::Counter, 1.0 / count);
            emit(name, &line);
        }
        BucketKind::Timer(timer) => {
            for extremum in [timer.upper.take(), timer.lower.take()].into_iter().flatten() {
                let line = format_line(name, extremum.value, MetricType::Timer, extremum.sample_rate);
                emit(name, &line);
            }

            let sample_rate = timer.reservoir.occupied() as f64 / count;
            for value in timer.reservoir.drain() {
                emit(name, &format_line(name, value, MetricType::Timer, sample_rate));
            }
        }
    }

    bucket.sum = 0.0;
    bucket.count = 0.0;
}
