use anyhow::{Context, Result};
use clap::ArgMatches;
use statsrelay_log::{LogConfig, LogFormat, LogLevel};
use statsrelay_sampling::SamplerConfig;

use crate::cliapp::make_app;
use crate::service::{self, RelayConfig};
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config = extract_config(&matches)?;

    setup::check_config(&config)?;
    setup::init_logging(&config.log);
    setup::dump_spawn_infos(&config);

    service::run(config)
}

/// Builds the relay configuration from command line arguments and environment variables.
fn extract_config(matches: &ArgMatches) -> Result<RelayConfig> {
    let defaults = SamplerConfig::default();
    let sampler = SamplerConfig {
        threshold: get_or(matches, "threshold", defaults.threshold),
        window: get_or(matches, "window", defaults.window),
        reservoir_size: get_or(matches, "reservoir_size", defaults.reservoir_size),
        index_capacity: get_or(matches, "index_capacity", defaults.index_capacity),
        seed: matches.get_one::<u64>("seed").copied(),
    };

    let elide_skip = if matches.get_flag("elide") {
        Some(get_or(matches, "elide_skip", 0))
    } else {
        None
    };

    let mut log = LogConfig::default();
    if let Some(level) = matches.get_one::<String>("log_level") {
        log.level = level.parse::<LogLevel>().context("invalid log level")?;
    }
    if let Some(format) = matches.get_one::<String>("log_format") {
        log.format = format.parse::<LogFormat>().context("invalid log format")?;
    }
    log.enable_backtraces = matches.get_flag("enable_backtraces");

    Ok(RelayConfig {
        sampler,
        elide_skip,
        log,
    })
}

fn get_or<T>(matches: &ArgMatches, id: &str, default: T) -> T
where
    T: Clone + Send + Sync + 'static,
{
    matches.get_one::<T>(id).cloned().unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RelayConfig {
        let matches = make_app()
            .try_get_matches_from(std::iter::once("statsrelay").chain(args.iter().copied()))
            .unwrap();
        extract_config(&matches).unwrap()
    }

    #[test]
    fn test_app() {
        make_app().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.sampler, SamplerConfig::default());
        assert_eq!(config.elide_skip, None);
        assert_eq!(config.log.level, LogLevel::Info);
        assert_eq!(config.log.format, LogFormat::Auto);
        assert!(!config.log.enable_backtraces);
    }

    #[test]
    fn test_arguments() {
        let config = parse(&[
            "--threshold",
            "50",
            "--window",
            "2",
            "--reservoir-size",
            "8",
            "--seed",
            "3",
            "--elide",
            "--elide-skip",
            "1",
            "--log-level",
            "debug",
            "--log-format",
            "json",
            "--enable-backtraces",
        ]);

        assert_eq!(
            config.sampler,
            SamplerConfig {
                threshold: 50,
                window: 2,
                reservoir_size: 8,
                seed: Some(3),
                ..Default::default()
            }
        );
        assert_eq!(config.elide_skip, Some(1));
        assert_eq!(config.log.level, LogLevel::Debug);
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.log.enable_backtraces);
    }

    #[test]
    fn test_rejects_zero_window() {
        let result = make_app().try_get_matches_from(["statsrelay", "--window", "0"]);
        assert!(result.is_err());
    }
}
