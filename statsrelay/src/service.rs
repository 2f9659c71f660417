use std::time::Duration;

use anyhow::{Context, Result};
use statsrelay_log::LogConfig;
use statsrelay_sampling::{Elider, ParsedLine, Sampler, SamplerConfig, SamplingResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::time::{Instant, MissedTickBehavior};

/// Windows after which the elider forgets a metric name.
const ELIDE_EXPIRY_WINDOWS: u32 = 2;

/// Complete configuration of the relay.
#[derive(Clone, Debug, Default)]
pub struct RelayConfig {
    /// Sampling parameters, including the window length.
    pub sampler: SamplerConfig,
    /// The initial elider generation, if zero-valued counters are elided.
    pub elide_skip: Option<u64>,
    /// Logging to stderr.
    pub log: LogConfig,
}

/// Counters of a relay run, logged on exit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub rejected: u64,
    pub elided: u64,
    pub forwarded: u64,
    pub sampled: u64,
    pub flushed: u64,
}

/// Owns the sampler and elider and routes every input line through them.
struct Relay {
    sampler: Sampler,
    elider: Option<Elider>,
    window: Duration,
    stats: RelayStats,
}

impl Relay {
    fn new(config: RelayConfig) -> Self {
        Self {
            window: config.sampler.window_duration(),
            elider: config.elide_skip.map(Elider::new),
            sampler: Sampler::new(config.sampler),
            stats: RelayStats::default(),
        }
    }

    /// Relays lines from `input` to `output` until `input` is exhausted.
    async fn serve<R, W>(mut self, input: R, mut output: W) -> Result<RelayStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut segments = input.split(b'\n');
        let mut ticker = tokio::time::interval_at(Instant::now() + self.window, self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Set while forwarded lines may still sit in the output buffer.
        let mut unflushed = false;

        loop {
            tokio::select! {
                biased;
                _ = ticker.tick() => {
                    self.flush(&mut output).await?;
                    unflushed = false;
                }
                segment = segments.next_segment() => {
                    match segment.context("failed to read input")? {
                        Some(line) => {
                            self.handle_line(&line, &mut output).await?;
                            unflushed = true;
                        }
                        None => break,
                    }
                }
                // Only reached once no input is readable without waiting.
                () = std::future::ready(()), if unflushed => {
                    output.flush().await.context("failed to flush output")?;
                    unflushed = false;
                }
            }
        }

        self.flush(&mut output).await?;
        Ok(self.stats)
    }

    async fn handle_line<W>(&mut self, raw: &[u8], output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            return Ok(());
        }

        self.stats.received += 1;

        let line = match ParsedLine::parse_bytes(raw) {
            Ok(line) => line,
            Err(error) => {
                self.stats.rejected += 1;
                statsrelay_log::debug!(
                    line = %String::from_utf8_lossy(raw),
                    "dropping invalid line: {error}"
                );
                return Ok(());
            }
        };

        let now = Instant::now().into_std();
        let elided = match self.elider.as_mut() {
            Some(elider) => elider.should_elide(line.name, &line, now),
            None => false,
        };
        if elided {
            self.stats.elided += 1;
            return Ok(());
        }

        match self.sampler.consider(line.name, &line) {
            SamplingResult::Sampling => self.stats.sampled += 1,
            SamplingResult::NotSampling => {
                self.stats.forwarded += 1;
                output.write_all(raw).await.context("failed to write line")?;
                output.write_all(b"\n").await.context("failed to write line")?;
            }
        }

        Ok(())
    }

    async fn flush<W>(&mut self, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut lines = Vec::new();
        self.sampler.flush(|_, line| lines.push(line.to_owned()));

        for line in &lines {
            output.write_all(line.as_bytes()).await.context("failed to write line")?;
            output.write_all(b"\n").await.context("failed to write line")?;
        }
        output.flush().await.context("failed to flush output")?;
        self.stats.flushed += lines.len() as u64;

        let mut expired = 0;
        if let Some(ref mut elider) = self.elider {
            let now = Instant::now().into_std();
            if let Some(cutoff) = now.checked_sub(self.window * ELIDE_EXPIRY_WINDOWS) {
                expired = elider.gc(cutoff);
            }
        }

        statsrelay_log::trace!(
            lines = lines.len(),
            metrics = self.sampler.len(),
            expired,
            "flushed sampler"
        );

        Ok(())
    }
}

/// Runs the relay on stdin and stdout until stdin is closed.
pub fn run(config: RelayConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start the runtime")?;

    let stats = runtime.block_on(async {
        let input = BufReader::new(tokio::io::stdin());
        let output = BufWriter::new(tokio::io::stdout());
        Relay::new(config).serve(input, output).await
    })?;

    statsrelay_log::info!(
        received = stats.received,
        rejected = stats.rejected,
        elided = stats.elided,
        forwarded = stats.forwarded,
        sampled = stats.sampled,
        flushed = stats.flushed,
        "input closed, shutting down"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u64, elide_skip: Option<u64>) -> RelayConfig {
        RelayConfig {
            sampler: SamplerConfig {
                threshold,
                window: 10,
                index_capacity: 16,
                seed: Some(0),
                ..Default::default()
            },
            elide_skip,
            log: LogConfig::default(),
        }
    }

    async fn relay(config: RelayConfig, input: &[u8]) -> (String, RelayStats) {
        let mut output = Vec::new();
        let stats = Relay::new(config).serve(input, &mut output).await.unwrap();
        (String::from_utf8(output).unwrap(), stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_and_flushes_on_eof() {
        let input = b"a:1|c\na:1|c\r\na:2|c\n\nbad line\ng:5|g\n";
        let (output, stats) = relay(config(1, None), input).await;

        assert_eq!(output, "a:1|c\ng:5|g\na:1.5|c@0.5\n");
        assert_eq!(
            stats,
            RelayStats {
                received: 5,
                rejected: 1,
                elided: 0,
                forwarded: 2,
                sampled: 2,
                flushed: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_elides_zero_counters() {
        let input = b"idle:0|c\nidle:0|c\nidle:0|c\nidle:3|c\nidle:0|c\n";
        let (output, stats) = relay(config(100, Some(0)), input).await;

        assert_eq!(output, "idle:0|c\nidle:3|c\nidle:0|c\n");
        assert_eq!(stats.elided, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_without_waiting_for_window() {
        let (input, mut producer) = tokio::io::duplex(1024);
        let (output, consumer) = tokio::io::duplex(1024);
        let relay = Relay::new(config(100, None));
        let task = tokio::spawn(relay.serve(BufReader::new(input), BufWriter::new(output)));

        let started = Instant::now();
        producer.write_all(b"a:1|c\n").await.unwrap();

        let mut consumer = BufReader::new(consumer);
        let mut line = String::new();
        consumer.read_line(&mut line).await.unwrap();
        assert_eq!(line, "a:1|c\n");
        assert!(started.elapsed() < Duration::from_secs(10));

        drop(producer);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.forwarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_every_window() {
        let (reader, mut writer) = tokio::io::duplex(1024);

        let producer = tokio::spawn(async move {
            writer.write_all(b"a:1|c\na:1|c\na:1|c\n").await.unwrap();
            tokio::time::sleep(Duration::from_secs(15)).await;
            writer.write_all(b"a:4|c\n").await.unwrap();
        });

        let mut output = Vec::new();
        let stats = Relay::new(config(1, None))
            .serve(BufReader::new(reader), &mut output)
            .await
            .unwrap();
        producer.await.unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "a:1|c\na:1|c@0.5\na:4|c@1\n"
        );
        assert_eq!(stats.flushed, 2);
    }
}
