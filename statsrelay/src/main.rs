//! The statsrelay binary.
//!
//! Reads statsd lines from stdin and writes them to stdout. Metric names that are reported more
//! often than the configured threshold within a window are sampled: instead of their raw lines, a
//! summary is written once per window. See `statsrelay --help` for the options.
//!
//! Logs are written to stderr, so that stdout only carries metric lines.

mod cli;
mod cliapp;
mod service;
mod setup;

use std::backtrace::BacktraceStatus;
use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            statsrelay_log::ensure_error(&*err);
            if err.backtrace().status() == BacktraceStatus::Captured {
                statsrelay_log::error!("backtrace:\n{}", err.backtrace());
            }
            1
        }
    };

    process::exit(exit_code);
}
