// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher loop
//!
//! Reads the source feed sequentially and publishes one message per reading.
//!
//! # Operation
//!
//! 1. Read the next line (header already consumed by the feed)
//! 2. Decode it; malformed lines are logged and skipped
//! 3. Encode to a named-field payload and hand it to the channel
//! 4. Pause for the configured pace before the next publish
//!
//! The channel is flushed on every exit path.

use crate::channel::MessagePublisher;
use crate::codec;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::record::SourceFeed;
use crate::RunState;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Longest uninterrupted sleep while pacing, so a stop request is noticed.
const PACE_SLICE: Duration = Duration::from_millis(100);

/// Publisher statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublisherStats {
    /// Data lines read from the source (header excluded)
    pub lines_read: u64,
    /// Messages accepted by the channel
    pub published: u64,
    /// Lines skipped because they could not be decoded
    pub malformed: u64,
    /// Messages the channel refused
    pub publish_failures: u64,
}

/// Source-to-channel loop
pub struct PublishLoop {
    topic: String,
    pace: Duration,
    flush_timeout: Duration,
    run_state: RunState,
    stats: PublisherStats,
}

impl PublishLoop {
    /// Create a loop from the pipeline configuration
    pub fn new(config: &PipelineConfig, run_state: RunState) -> Self {
        Self {
            topic: config.channel.topic.clone(),
            pace: config.producer.pace(),
            flush_timeout: config.producer.flush_timeout(),
            run_state,
            stats: PublisherStats::default(),
        }
    }

    /// Get publisher statistics
    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    /// Publish every reading in `feed` until it is exhausted or a stop is requested.
    ///
    /// Returns an error only for connection-level failures (or a failed
    /// final flush); per-line problems are logged and counted.
    pub fn run<R: Read, P: MessagePublisher>(
        &mut self,
        feed: &mut SourceFeed<R>,
        channel: &P,
    ) -> Result<()> {
        info!(
            "Publisher started: topic={}, pace={}ms",
            self.topic,
            self.pace.as_millis()
        );

        let result = self.publish_all(feed, channel);

        let flushed = channel.flush(self.flush_timeout);
        if let Err(ref e) = flushed {
            error!("Flush failed: {}", e);
        }

        info!(
            "Publisher stopped: read={}, published={}, malformed={}, failed={}",
            self.stats.lines_read,
            self.stats.published,
            self.stats.malformed,
            self.stats.publish_failures
        );

        result.and(flushed)
    }

    fn publish_all<R: Read, P: MessagePublisher>(
        &mut self,
        feed: &mut SourceFeed<R>,
        channel: &P,
    ) -> Result<()> {
        let mut first = true;

        while self.run_state.is_running() {
            let (line, decoded) = match feed.next_reading() {
                Ok(Some(next)) => next,
                Ok(None) => {
                    info!("Source exhausted");
                    break;
                }
                Err(PipelineError::Csv(e)) if !e.is_io_error() => {
                    // Undecodable bytes; the reader has already moved past them.
                    self.stats.lines_read += 1;
                    self.stats.malformed += 1;
                    warn!("Skipping unreadable line: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.stats.lines_read += 1;

            let reading = match decoded {
                Ok(reading) => reading,
                Err(e) => {
                    self.stats.malformed += 1;
                    warn!("Skipping line {}: {}", line, e);
                    continue;
                }
            };

            if !first && !self.pause() {
                break;
            }
            first = false;

            let payload = codec::encode(&reading);
            match channel.publish(&self.topic, payload.as_bytes()) {
                Ok(()) => {
                    self.stats.published += 1;
                    info!("Sent -> {}", payload);
                }
                Err(e) if e.is_fatal() => {
                    error!("Channel lost at line {}: {}", line, e);
                    return Err(e);
                }
                Err(e) => {
                    self.stats.publish_failures += 1;
                    error!("Publish failed for line {}: {}", line, e);
                }
            }
        }

        Ok(())
    }

    /// Sleep for the configured pace. Returns false if a stop was requested meanwhile.
    fn pause(&self) -> bool {
        let deadline = Instant::now() + self.pace;
        loop {
            if !self.run_state.is_running() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            std::thread::sleep(remaining.min(PACE_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryBroker, MessageSubscriber};
    use crate::config::{CommitPolicy, OffsetReset};
    use std::cell::RefCell;
    use std::io::Cursor;

    const HEADER: &str = "patient_id,recorded_time,heart_rate,spo2,systolic_bp,diastolic_bp,body_temperature,alert_flag";

    fn feed(lines: &[&str]) -> SourceFeed<Cursor<Vec<u8>>> {
        let mut text = String::from(HEADER);
        for line in lines {
            text.push('\n');
            text.push_str(line);
        }
        text.push('\n');
        SourceFeed::from_reader(Cursor::new(text.into_bytes()), b',', true)
    }

    fn config(pace_ms: u64) -> PipelineConfig {
        PipelineConfig::builder().pace_ms(pace_ms).build()
    }

    fn drain(broker: &MemoryBroker) -> Vec<String> {
        let mut sub = broker.subscriber(
            "test",
            "patient_vitals",
            OffsetReset::Earliest,
            CommitPolicy::AutoAfterDelivery,
            100,
        );
        sub.poll_batch(Duration::from_millis(10))
            .unwrap()
            .into_iter()
            .map(|d| String::from_utf8(d.payload).unwrap())
            .collect()
    }

    /// Publisher that refuses payloads for one patient.
    struct RefusingPublisher {
        refuse: &'static str,
        accepted: RefCell<Vec<String>>,
    }

    impl MessagePublisher for RefusingPublisher {
        fn publish(&self, _topic: &str, payload: &[u8]) -> Result<()> {
            let text = String::from_utf8_lossy(payload).into_owned();
            if text.contains(self.refuse) {
                return Err(PipelineError::PublishFailure("queue full".into()));
            }
            self.accepted.borrow_mut().push(text);
            Ok(())
        }

        fn flush(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_publishes_every_line() {
        let broker = MemoryBroker::new();
        let mut feed = feed(&[
            "P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal",
            "P002,2024-01-01 10:00:01,131,88,162,101,39.1,critical",
            "P003,2024-01-01 10:00:02,72,99,118,76,36.4,normal",
        ]);

        let mut publisher = PublishLoop::new(&config(0), RunState::new());
        publisher.run(&mut feed, &broker.publisher()).unwrap();

        assert_eq!(broker.topic_len("patient_vitals"), 3);
        assert_eq!(publisher.stats().published, 3);
        assert_eq!(publisher.stats().lines_read, 3);

        let payloads = drain(&broker);
        let first = codec::decode(payloads[0].as_bytes()).unwrap();
        assert_eq!(first.patient_id, "P001");
        assert_eq!(first.heart_rate, 88);
    }

    #[test]
    fn test_malformed_line_does_not_halt() {
        let broker = MemoryBroker::new();
        let mut feed = feed(&[
            "P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal",
            "P002,2024-01-01 10:00:01,131,88",
            "P003,2024-01-01 10:00:02,72,99,118,76,36.4,normal",
        ]);

        let mut publisher = PublishLoop::new(&config(0), RunState::new());
        publisher.run(&mut feed, &broker.publisher()).unwrap();

        let stats = publisher.stats();
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.published, 2);

        let ids: Vec<String> = drain(&broker)
            .iter()
            .map(|p| codec::decode(p.as_bytes()).unwrap().patient_id)
            .collect();
        assert_eq!(ids, vec!["P001", "P003"]);
    }

    #[test]
    fn test_pacing_between_publishes() {
        let broker = MemoryBroker::new();
        let mut feed = feed(&[
            "P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal",
            "P002,2024-01-01 10:00:01,90,97,120,80,36.6,normal",
            "P003,2024-01-01 10:00:02,92,97,120,80,36.6,normal",
        ]);

        let start = Instant::now();
        let mut publisher = PublishLoop::new(&config(30), RunState::new());
        publisher.run(&mut feed, &broker.publisher()).unwrap();

        // Two pauses for three messages.
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(broker.topic_len("patient_vitals"), 3);
    }

    #[test]
    fn test_stop_request_ends_loop() {
        let broker = MemoryBroker::new();
        let mut feed = feed(&["P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal"]);

        let state = RunState::new();
        state.stop();
        let mut publisher = PublishLoop::new(&config(0), state);
        publisher.run(&mut feed, &broker.publisher()).unwrap();

        assert_eq!(broker.topic_len("patient_vitals"), 0);
    }

    #[test]
    fn test_publish_failure_is_counted_and_skipped() {
        let channel = RefusingPublisher {
            refuse: "P002",
            accepted: RefCell::new(Vec::new()),
        };
        let mut feed = feed(&[
            "P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal",
            "P002,2024-01-01 10:00:01,90,97,120,80,36.6,normal",
            "P003,2024-01-01 10:00:02,92,97,120,80,36.6,normal",
        ]);

        let mut publisher = PublishLoop::new(&config(0), RunState::new());
        publisher.run(&mut feed, &channel).unwrap();

        assert_eq!(publisher.stats().publish_failures, 1);
        assert_eq!(publisher.stats().published, 2);
        assert_eq!(channel.accepted.borrow().len(), 2);
    }

    #[test]
    fn test_lost_channel_terminates() {
        let broker = MemoryBroker::new();
        broker.disconnect();
        let mut feed = feed(&["P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal"]);

        let mut publisher = PublishLoop::new(&config(0), RunState::new());
        let err = publisher.run(&mut feed, &broker.publisher()).unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(publisher.stats().published, 0);
    }
}
