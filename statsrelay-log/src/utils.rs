use std::error::Error;
use std::fmt;

/// Iterates over an error and its sources, starting with the error itself.
///
/// # Example
///
/// ```
/// use std::io;
///
/// let error = io::Error::other("pipe closed");
/// assert_eq!(statsrelay_log::error_chain(&error).count(), 1);
/// ```
pub fn error_chain<'a>(
    error: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(error), |&error| error.source())
}

/// Logs a fatal error, falling back to `stderr` if no logger accepts it.
///
/// The relay calls this on exit, which may happen before logging was initialized, for instance
/// when the command line arguments cannot be parsed into a configuration.
///
/// # Example
///
/// ```
/// let error: Box<dyn std::error::Error> = "invalid window".into();
/// statsrelay_log::ensure_error(error.as_ref());
/// ```
#[allow(clippy::print_stderr)]
pub fn ensure_error(error: &(dyn Error + 'static)) {
    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!("{}", LogError(error));
    } else {
        eprintln!("error: {}", LogError(error));
    }
}

/// Displays an error followed by one `caused by` line per source.
///
/// # Example
///
/// ```
/// use statsrelay_log::LogError;
///
/// let error = std::io::Error::other("oh no!");
/// statsrelay_log::error!("write failed: {}", LogError(&error));
/// ```
pub struct LogError<'a>(pub &'a (dyn Error + 'static));

impl fmt::Display for LogError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, error) in error_chain(self.0).enumerate() {
            if depth > 0 {
                f.write_str("\n  caused by: ")?;
            }
            write!(f, "{error}")?;
        }

        Ok(())
    }
}
