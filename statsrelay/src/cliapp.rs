// This module implements the definition of the command line app.
//
// It must not import anything but clap, so that it stays a plain description of the interface.
use clap::{Arg, ArgAction, Command, value_parser};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Relays statsd lines from stdin to stdout, sampling busy metrics.";

pub fn make_app() -> Command {
    Command::new("statsrelay")
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .after_help(
            "Every line read from stdin is validated and then either written to stdout as it \
             is, or absorbed by the sampler.  A metric name is sampled once it receives more \
             than THRESHOLD events within one window.  At the end of each window, sampled \
             counters are written as their mean and sampled timers as their extremes plus a \
             reservoir of values.  Malformed lines are dropped.",
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .value_name("COUNT")
                .env("STATSRELAY_THRESHOLD")
                .value_parser(value_parser!(u64))
                .default_value("5")
                .help("Events per window above which a metric is sampled."),
        )
        .arg(
            Arg::new("window")
                .long("window")
                .value_name("SECONDS")
                .env("STATSRELAY_WINDOW")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("10")
                .help("Length of a sampling window in seconds."),
        )
        .arg(
            Arg::new("reservoir_size")
                .long("reservoir-size")
                .value_name("COUNT")
                .env("STATSRELAY_RESERVOIR_SIZE")
                .value_parser(value_parser!(usize))
                .default_value("100")
                .help("Timer values retained per metric and window."),
        )
        .arg(
            Arg::new("index_capacity")
                .long("index-capacity")
                .value_name("COUNT")
                .env("STATSRELAY_INDEX_CAPACITY")
                .value_parser(value_parser!(usize))
                .default_value("32768")
                .help("Initial capacity of the metric index."),
        )
        .arg(
            Arg::new("elide")
                .long("elide")
                .env("STATSRELAY_ELIDE")
                .action(ArgAction::SetTrue)
                .help("Drop repeated zero-valued counters."),
        )
        .arg(
            Arg::new("elide_skip")
                .long("elide-skip")
                .value_name("GENERATION")
                .env("STATSRELAY_ELIDE_SKIP")
                .value_parser(value_parser!(u64))
                .default_value("0")
                .help("Generation at which a counter starts after a non-zero value."),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .env("STATSRELAY_SEED")
                .value_parser(value_parser!(u64))
                .help("Seed for reservoir sampling. Random if not set."),
        )
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .env("STATSRELAY_LOG_LEVEL")
                .value_parser(["off", "error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("The log level for statsrelay."),
        )
        .arg(
            Arg::new("log_format")
                .long("log-format")
                .value_name("FORMAT")
                .env("STATSRELAY_LOG_FORMAT")
                .value_parser(["auto", "pretty", "simplified", "json"])
                .default_value("auto")
                .help("The format of log output on stderr."),
        )
        .arg(
            Arg::new("enable_backtraces")
                .long("enable-backtraces")
                .env("STATSRELAY_ENABLE_BACKTRACES")
                .action(ArgAction::SetTrue)
                .help("Capture and log backtraces of fatal errors."),
        )
}
