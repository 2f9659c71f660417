use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters used by the [`Sampler`](crate::Sampler).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SamplerConfig {
    /// The number of events per window above which a metric is sampled.
    ///
    /// Defaults to `5`. A metric that receives more than this many events within one window
    /// switches to sampling immediately, and stays sampled until a window passes in which it
    /// receives at most `threshold` events.
    pub threshold: u64,

    /// The length of an accounting window in seconds.
    ///
    /// Defaults to `10` seconds. The sampler itself does not keep time: the owner is expected to
    /// call [`Sampler::flush`](crate::Sampler::flush) once per window.
    pub window: u64,

    /// The number of timer values retained per metric and window.
    ///
    /// Defaults to `100`. The extrema of a window are tracked separately and do not count
    /// against this.
    pub reservoir_size: usize,

    /// The initial capacity of the per-metric index.
    ///
    /// Defaults to `32768`. The index grows beyond this when needed.
    pub index_capacity: usize,

    /// Seed for the reservoir replacement RNG.
    ///
    /// Defaults to `None`, which seeds from system randomness.
    pub seed: Option<u64>,
}

impl SamplerConfig {
    /// Returns the window as [`Duration`].
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: 10,
            reservoir_size: 100,
            index_capacity: 32768,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: SamplerConfig =
            serde_json::from_str(r#"{"threshold": 20, "seed": 7}"#).unwrap();

        assert_eq!(
            config,
            SamplerConfig {
                threshold: 20,
                seed: Some(7),
                ..Default::default()
            }
        );
        assert_eq!(config.window_duration(), Duration::from_secs(10));
    }
}
