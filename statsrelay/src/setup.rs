use anyhow::Result;
use statsrelay_log::LogConfig;

use crate::service::RelayConfig;

/// Validates the combination of settings before anything is started.
pub fn check_config(config: &RelayConfig) -> Result<()> {
    if config.sampler.window == 0 {
        anyhow::bail!("the sampling window must be at least one second");
    }

    if config.sampler.index_capacity > isize::MAX as usize / 2 {
        anyhow::bail!(
            "index capacity {} is too large",
            config.sampler.index_capacity
        );
    }

    Ok(())
}

/// Initializes logging to stderr.
pub fn init_logging(config: &LogConfig) {
    statsrelay_log::init(config);
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &RelayConfig) {
    let sampler = &config.sampler;

    statsrelay_log::info!("relaying statsd lines from stdin");
    statsrelay_log::info!("  threshold: {} events", sampler.threshold);
    statsrelay_log::info!("  window: {}s", sampler.window);
    statsrelay_log::info!("  reservoir size: {}", sampler.reservoir_size);

    match config.elide_skip {
        Some(skip) => statsrelay_log::info!("  eliding zero counters (skip: {skip})"),
        None => statsrelay_log::info!("  eliding zero counters: disabled"),
    }

    statsrelay_log::debug!("  index capacity: {}", sampler.index_capacity);
    match sampler.seed {
        Some(seed) => statsrelay_log::debug!("  seed: {seed}"),
        None => statsrelay_log::debug!("  seed: random"),
    }
}
