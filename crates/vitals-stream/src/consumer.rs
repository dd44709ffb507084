// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Poll loop
//!
//! Requests batches from the channel with a bounded wait and writes each
//! decoded reading to the sink, in delivery order.
//!
//! # Position handling
//!
//! - `CommitPolicy::AutoAfterDelivery`: the channel advances the group
//!   position when a batch is handed over. A reading whose insert is then
//!   rejected is logged and lost from a replay standpoint.
//! - `CommitPolicy::AfterWrite`: each message is committed once it has been
//!   inserted (or found undecodable). A rejected insert stops the loop and
//!   leaves that message uncommitted, so the group sees it again on restart.

use crate::channel::{Delivery, MessageSubscriber};
use crate::codec;
use crate::config::{CommitPolicy, PipelineConfig};
use crate::error::Result;
use crate::sink::ReadingSink;
use crate::RunState;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Consumer statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Poll requests issued
    pub polls: u64,
    /// Polls that returned no messages
    pub empty_polls: u64,
    /// Messages delivered by the channel
    pub received: u64,
    /// Rows written to the sink
    pub inserted: u64,
    /// Payloads skipped because they could not be decoded
    pub decode_failures: u64,
    /// Inserts the sink rejected
    pub write_failures: u64,
}

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The wait elapsed with nothing to deliver
    Empty,
    /// A batch was delivered and fully handled
    Processed { delivered: usize, inserted: usize },
}

/// Channel-to-sink loop
pub struct PollLoop {
    poll_timeout: Duration,
    stats_interval: Option<Duration>,
    run_state: RunState,
    stats: ConsumerStats,
}

impl PollLoop {
    /// Create a loop from the pipeline configuration
    pub fn new(config: &PipelineConfig, run_state: RunState) -> Self {
        let secs = config.consumer.stats_interval_secs;
        Self {
            poll_timeout: config.consumer.poll_timeout(),
            stats_interval: (secs > 0).then(|| Duration::from_secs(secs)),
            run_state,
            stats: ConsumerStats::default(),
        }
    }

    /// Get consumer statistics
    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Poll until a stop is requested or a connection-level error occurs.
    ///
    /// Under `CommitPolicy::AfterWrite` a rejected insert also ends the loop.
    pub fn run<C: MessageSubscriber, S: ReadingSink>(
        &mut self,
        channel: &mut C,
        sink: &mut S,
    ) -> Result<()> {
        info!(
            "Consumer started: poll_timeout={}ms, commit_policy={:?}",
            self.poll_timeout.as_millis(),
            channel.commit_policy()
        );

        let mut last_report = Instant::now();
        let result = loop {
            if !self.run_state.is_running() {
                break Ok(());
            }

            if let Err(e) = self.poll_once(channel, sink) {
                break Err(e);
            }

            if let Some(interval) = self.stats_interval {
                if last_report.elapsed() >= interval {
                    self.log_stats("Consumer progress");
                    last_report = Instant::now();
                }
            }
        };

        if let Err(ref e) = result {
            error!("Consumer terminating: {}", e);
        }
        self.log_stats("Consumer stopped");
        result
    }

    /// Request one batch and process every message in it.
    ///
    /// An empty batch is a normal outcome. Decode failures are skipped.
    pub fn poll_once<C: MessageSubscriber, S: ReadingSink>(
        &mut self,
        channel: &mut C,
        sink: &mut S,
    ) -> Result<PollOutcome> {
        let batch = channel.poll_batch(self.poll_timeout)?;
        self.stats.polls += 1;

        if batch.is_empty() {
            self.stats.empty_polls += 1;
            debug!("Empty poll");
            return Ok(PollOutcome::Empty);
        }

        let after_write = channel.commit_policy() == CommitPolicy::AfterWrite;
        let mut inserted = 0;

        for delivery in &batch {
            self.stats.received += 1;

            let reading = match codec::decode(&delivery.payload) {
                Ok(reading) => reading,
                Err(e) => {
                    self.stats.decode_failures += 1;
                    warn!("Skipping message at offset {}: {}", delivery.offset, e);
                    if after_write {
                        commit(channel, delivery)?;
                    }
                    continue;
                }
            };

            match sink.insert(&reading) {
                Ok(()) => {
                    inserted += 1;
                    self.stats.inserted += 1;
                    info!("Inserted patient: {}", reading.patient_id);
                    if after_write {
                        commit(channel, delivery)?;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if after_write => {
                    self.stats.write_failures += 1;
                    error!(
                        "Insert failed for patient {} at offset {}, left uncommitted: {}",
                        reading.patient_id, delivery.offset, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    self.stats.write_failures += 1;
                    error!(
                        "Insert failed for patient {} at offset {}, message will not be redelivered: {}",
                        reading.patient_id, delivery.offset, e
                    );
                }
            }
        }

        Ok(PollOutcome::Processed {
            delivered: batch.len(),
            inserted,
        })
    }

    fn log_stats(&self, label: &str) {
        info!(
            "{}: polls={}, received={}, inserted={}, decode_failures={}, write_failures={}",
            label,
            self.stats.polls,
            self.stats.received,
            self.stats.inserted,
            self.stats.decode_failures,
            self.stats.write_failures
        );
    }
}

/// Commit one message. A refused commit only risks a duplicate, so it is not fatal.
fn commit<C: MessageSubscriber>(channel: &mut C, delivery: &Delivery) -> Result<()> {
    match channel.commit(delivery) {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Commit failed at offset {}: {}", delivery.offset, e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
