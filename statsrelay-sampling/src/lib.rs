//! Sampling and aggregation of statsd lines.
//!
//! A statsd relay forwards every line it receives to a downstream collector. For metric names that
//! are reported at a high rate, this crate reduces the stream: instead of the raw events, the
//! collector receives a summary once per window that statistically represents them.
//!
//! # Components
//!
//! - [`ParsedLine`]: validates a raw statsd line and extracts name, value, type and presampling
//!   rate. Malformed lines are rejected with a [`ParseLineError`] and never reach the sampler.
//! - [`Sampler`]: tracks the event rate per metric name. Names above the configured threshold are
//!   sampled: their events are absorbed and summarized on [`Sampler::flush`].
//! - [`Elider`]: optionally drops repeated zero-valued counters.
//! - [`MetricIndex`]: the string-keyed hash table that holds per-name state for the above.
//!
//! # How It Works
//!
//! ```
//! use statsrelay_sampling::{ParsedLine, Sampler, SamplerConfig, SamplingResult};
//!
//! let mut sampler = Sampler::new(SamplerConfig {
//!     threshold: 2,
//!     ..Default::default()
//! });
//!
//! let mut forwarded = Vec::new();
//! for raw in ["api.hits:1|c"; 5] {
//!     let line = ParsedLine::parse(raw).unwrap();
//!     if sampler.consider(line.name, &line) == SamplingResult::NotSampling {
//!         forwarded.push(raw.to_owned());
//!     }
//! }
//!
//! // The first two events are forwarded, the remaining three are summarized.
//! assert_eq!(forwarded.len(), 2);
//!
//! let mut flushed = Vec::new();
//! sampler.flush(|_name, line| flushed.push(line.to_owned()));
//! assert_eq!(flushed, ["api.hits:1|c@0.3333333333333333"]);
//! ```
//!
//! All types in this crate are single-threaded. To use multiple threads, shard metric names across
//! independent [`Sampler`] instances.

#![warn(missing_docs)]

mod bucket;
mod config;
mod elide;
mod index;
mod protocol;
mod sampler;

pub use self::config::*;
pub use self::elide::*;
pub use self::index::{DEFAULT_CAPACITY, Iter, IterMut, MetricIndex};
pub use self::protocol::*;
pub use self::sampler::*;
