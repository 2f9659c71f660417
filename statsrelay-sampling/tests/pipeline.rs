use std::time::Instant;

use similar_asserts::assert_eq;
use statsrelay_sampling::{
    Elider, ParseLineError, Sampler, SamplerConfig, SamplingResult, parse_lines,
};

/// Runs a buffer through parse, elide and sample and returns the forwarded lines.
fn relay(
    sampler: &mut Sampler,
    elider: &mut Elider,
    buffer: &[u8],
    now: Instant,
) -> (Vec<String>, Vec<ParseLineError>) {
    let mut forwarded = Vec::new();
    let mut rejected = Vec::new();

    let raw_lines = buffer
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty());

    for (raw, parsed) in raw_lines.zip(parse_lines(buffer)) {
        let line = match parsed {
            Ok(line) => line,
            Err(error) => {
                rejected.push(error);
                continue;
            }
        };

        if elider.should_elide(line.name, &line, now) {
            continue;
        }

        if sampler.consider(line.name, &line) == SamplingResult::NotSampling {
            forwarded.push(String::from_utf8_lossy(raw).into_owned());
        }
    }

    (forwarded, rejected)
}

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| (*line).to_owned()).collect()
}

fn flush(sampler: &mut Sampler) -> Vec<String> {
    let mut lines = Vec::new();
    sampler.flush(|_, line| lines.push(line.to_owned()));
    lines
}

#[test]
fn test_pipeline() {
    statsrelay_log::init_test!();

    let mut sampler = Sampler::new(SamplerConfig {
        threshold: 2,
        reservoir_size: 10,
        seed: Some(1),
        ..Default::default()
    });
    let mut elider = Elider::new(0);
    let now = Instant::now();

    let buffer = b"\
api.hits:1|c
api.hits:1|c
api.hits:1|c
api.hits:3|c|@0.5
api.latency:12|ms
api.latency:40|ms
api.latency:7|ms
api.latency:25|ms|@0.1
api.latency:19|ms
queue.depth:4|g
queue.depth:4|g
queue.depth:4|g
idle:0|c\r
idle:0|c
idle:0|c
broken:1
";

    let (forwarded, rejected) = relay(&mut sampler, &mut elider, buffer, now);

    assert_eq!(
        forwarded,
        owned(&[
            "api.hits:1|c",
            "api.hits:1|c",
            "api.latency:12|ms",
            "api.latency:40|ms",
            "queue.depth:4|g",
            "queue.depth:4|g",
            "queue.depth:4|g",
            "idle:0|c",
        ])
    );
    assert_eq!(rejected, vec![ParseLineError::MissingTypeSeparator]);

    // api.hits: sum = 1 + 3 * 2 = 7, count = 1 + 2 = 3
    // api.latency: 25 displaces 7 into the minimum, so both carry the rate 0.1 of that event.
    // Only 19 is counted and it fills the reservoir.
    let mut flushed = flush(&mut sampler);
    flushed.sort();
    assert_eq!(
        flushed,
        owned(&[
            "api.hits:2.3333333333333335|c@0.3333333333333333",
            "api.latency:19|ms@1",
            "api.latency:25|ms@0.1",
            "api.latency:7|ms@0.1",
        ])
    );

    assert!(flush(&mut sampler).is_empty());
    assert_eq!(sampler.len(), 3);
}

#[test]
fn test_quiet_names_are_forwarded_again() {
    let mut sampler = Sampler::new(SamplerConfig {
        threshold: 1,
        seed: Some(1),
        ..Default::default()
    });
    let mut elider = Elider::new(0);
    let now = Instant::now();

    let (forwarded, _) = relay(&mut sampler, &mut elider, b"a:1|c\na:1|c\na:1|c\n", now);
    assert_eq!(forwarded, owned(&["a:1|c"]));
    assert_eq!(flush(&mut sampler), owned(&["a:1|c@0.5"]));

    // Still sampled in the next window, since the last one was busy.
    let (forwarded, _) = relay(&mut sampler, &mut elider, b"a:5|c\n", now);
    assert!(forwarded.is_empty());
    assert_eq!(flush(&mut sampler), owned(&["a:5|c@1"]));

    // That window did not exceed the threshold, so sampling ended with its flush.
    assert!(!sampler.is_sampling("a"));
    assert!(flush(&mut sampler).is_empty());
    let (forwarded, _) = relay(&mut sampler, &mut elider, b"a:5|c\n", now);
    assert_eq!(forwarded, owned(&["a:5|c"]));
}
