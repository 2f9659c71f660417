//! Validation and parsing of statsd lines.
//!
//! # Submission Protocol
//!
//! ```text
//! <name>:<value>|<type>[|@<presampling_rate>]
//! ```
//!
//! The name is everything up to the **last** colon of the line, which allows colons inside metric
//! names, for example in tag notation:
//!
//! ```text
//! api.latency.__route=user:index:42.5|ms
//! ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^
//! name                           value
//! ```
//!
//! Parsing a line either yields a [`ParsedLine`] that borrows the name from the input, or a
//! [`ParseLineError`] naming the reason of the rejection. Rejected lines must not be passed on to
//! the [`Sampler`](crate::Sampler).

use std::fmt;

/// All metric types of the protocol, keyed by their wire token.
///
/// Tokens are matched case-sensitively.
const METRIC_TYPES: [(&str, MetricType); 6] = [
    ("c", MetricType::Counter),
    ("ms", MetricType::Timer),
    ("kv", MetricType::KeyValue),
    ("g", MetricType::Gauge),
    ("h", MetricType::Histogram),
    ("s", MetricType::Set),
];

/// The type of a statsd metric, given by the token after the first `|`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MetricType {
    /// Counts instances of an event (`c`).
    Counter,
    /// Durations of an operation (`ms`).
    Timer,
    /// Arbitrary key/value samples (`kv`).
    KeyValue,
    /// Absolute snapshots of a value (`g`).
    Gauge,
    /// Statistical distribution over reported values (`h`).
    Histogram,
    /// Counts unique reported values (`s`).
    Set,
}

impl MetricType {
    /// Returns the wire token for this metric type.
    pub fn as_str(&self) -> &'static str {
        METRIC_TYPES
            .iter()
            .find(|(_, ty)| ty == self)
            .map_or("", |(token, _)| *token)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricType {
    type Err = ParseLineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        METRIC_TYPES
            .iter()
            .find(|(token, _)| *token == s)
            .map(|(_, ty)| *ty)
            .ok_or(ParseLineError::UnknownType)
    }
}

/// The reason a statsd line was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseLineError {
    /// The line is not valid UTF-8.
    #[error("line is not valid utf-8")]
    InvalidUtf8,
    /// There is no `:` separating the name from the value.
    #[error("missing ':' before the value")]
    MissingValueSeparator,
    /// Nothing precedes the last `:` of the line.
    #[error("zero length metric name")]
    EmptyName,
    /// The value is not a finite number.
    #[error("unable to parse value as a number")]
    InvalidValue,
    /// There is no `|` separating the value from the type.
    #[error("missing '|' before the metric type")]
    MissingTypeSeparator,
    /// The type token is not one of the known metric types.
    #[error("unknown metric type")]
    UnknownType,
    /// A segment follows the type, but it does not start with `@`.
    #[error("missing '@' before the sample rate")]
    MissingSampleRatePrefix,
    /// Nothing follows the `@`.
    #[error("'@' without a sample rate")]
    EmptySampleRate,
    /// The sample rate is not a finite number.
    #[error("unable to parse sample rate as a number")]
    InvalidSampleRate,
}

/// A validated statsd line.
///
/// The name is borrowed from the raw line. The record is transient: callers hand it to the
/// [`Sampler`](crate::Sampler) and drop it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParsedLine<'a> {
    /// The metric name, everything before the last `:` of the line.
    pub name: &'a str,
    /// The numeric value.
    pub value: f64,
    /// The metric type.
    pub ty: MetricType,
    /// The rate at which the producer sampled this metric before sending it.
    ///
    /// Defaults to `1.0` if the line has no `|@<rate>` segment.
    pub presampling_rate: f64,
}

impl<'a> ParsedLine<'a> {
    /// Parses a single statsd line.
    ///
    /// The line must not contain the trailing newline.
    ///
    /// # Example
    ///
    /// ```
    /// use statsrelay_sampling::{MetricType, ParsedLine};
    ///
    /// let line = ParsedLine::parse("test.srv.req:2.5|ms|@0.2").unwrap();
    /// assert_eq!(line.name, "test.srv.req");
    /// assert_eq!(line.value, 2.5);
    /// assert_eq!(line.ty, MetricType::Timer);
    /// assert_eq!(line.presampling_rate, 0.2);
    /// ```
    pub fn parse(line: &'a str) -> Result<Self, ParseLineError> {
        // Search backwards, the name may contain colons itself.
        let colon = line.rfind(':').ok_or(ParseLineError::MissingValueSeparator)?;
        if colon == 0 {
            return Err(ParseLineError::EmptyName);
        }

        let name = &line[..colon];
        let rest = &line[colon + 1..];

        let (raw_value, rest) = match rest.find('|') {
            Some(pipe) => (&rest[..pipe], Some(&rest[pipe + 1..])),
            None => (rest, None),
        };
        let value = parse_number(raw_value).ok_or(ParseLineError::InvalidValue)?;
        let rest = rest.ok_or(ParseLineError::MissingTypeSeparator)?;

        let (raw_type, rest) = match rest.find('|') {
            Some(pipe) => (&rest[..pipe], Some(&rest[pipe + 1..])),
            None => (rest, None),
        };
        let ty = raw_type.parse()?;

        let presampling_rate = match rest {
            Some(segment) => parse_sample_rate(segment)?,
            None => 1.0,
        };

        Ok(Self {
            name,
            value,
            ty,
            presampling_rate,
        })
    }

    /// Parses a single statsd line from raw bytes.
    ///
    /// Returns [`ParseLineError::InvalidUtf8`] if the bytes are not valid UTF-8.
    pub fn parse_bytes(line: &'a [u8]) -> Result<Self, ParseLineError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseLineError::InvalidUtf8)?;
        Self::parse(line)
    }
}

/// Parses the segment after the type, which must be `@<rate>`.
///
/// Anything after a further `|` is ignored.
fn parse_sample_rate(segment: &str) -> Result<f64, ParseLineError> {
    let raw_rate = segment
        .strip_prefix('@')
        .ok_or(ParseLineError::MissingSampleRatePrefix)?;
    let raw_rate = match raw_rate.find('|') {
        Some(pipe) => &raw_rate[..pipe],
        None => raw_rate,
    };

    if raw_rate.is_empty() {
        return Err(ParseLineError::EmptySampleRate);
    }

    parse_number(raw_rate).ok_or(ParseLineError::InvalidSampleRate)
}

/// Parses a finite decimal number that spans the entire string.
///
/// An empty string never parses, so a zero is only returned if the input actually spells one.
fn parse_number(string: &str) -> Option<f64> {
    string.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Iterator over the lines of a buffer returned from [`parse_lines`].
#[derive(Clone, Debug)]
pub struct ParseLines<'a> {
    slice: &'a [u8],
}

impl<'a> Iterator for ParseLines<'a> {
    type Item = Result<ParsedLine<'a>, ParseLineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut line = match self.slice.iter().position(|&b| b == b'\n') {
                Some(index) => {
                    let (line, rest) = self.slice.split_at(index);
                    self.slice = &rest[1..];
                    line
                }
                None => std::mem::take(&mut self.slice),
            };

            if let Some((b'\r', rest)) = line.split_last() {
                line = rest;
            }

            if !line.is_empty() {
                return Some(ParsedLine::parse_bytes(line));
            }
        }
    }
}

impl std::iter::FusedIterator for ParseLines<'_> {}

/// Parses a buffer of newline separated statsd lines.
///
/// Returns a result for each line in `slice`, ignoring empty lines. Both UNIX newlines (`\n`) and
/// Windows newlines (`\r\n`) are supported. It is possible to continue consuming the iterator
/// after an `Err` is yielded.
///
/// # Example
///
/// ```
/// use statsrelay_sampling::parse_lines;
///
/// let data = b"api.hits:1|c\r\napi.latency:57|ms\n\nbroken\n";
/// let results: Vec<_> = parse_lines(data).collect();
///
/// assert_eq!(results.len(), 3);
/// assert!(results[0].is_ok());
/// assert!(results[1].is_ok());
/// assert!(results[2].is_err());
/// ```
pub fn parse_lines(slice: &[u8]) -> ParseLines<'_> {
    ParseLines { slice }
}

/// Renders a line in the form `<name>:<value>|<type>@<rate>`.
///
/// This is the form in which the [`Sampler`](crate::Sampler) emits aggregated values. Numbers use
/// the shortest representation that parses back to the same value.
pub fn format_line(name: &str, value: f64, ty: MetricType, rate: f64) -> String {
    format!("{name}:{value}|{ty}@{rate}")
}
