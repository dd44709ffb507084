// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message channel abstraction
//!
//! The publisher and poll loops only talk to the broker through these
//! traits, so they run unchanged against Kafka or the in-process broker.
//!
//! # Implementations
//!
//! - `MemoryBroker` -- in-process broker with per-group positions
//! - `KafkaPublisher` / `KafkaSubscriber` -- rdkafka clients (feature `kafka`)

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

use crate::config::CommitPolicy;
use crate::error::Result;
use std::time::Duration;

pub use memory::{MemoryBroker, MemoryPublisher, MemorySubscriber};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaPublisher, KafkaSubscriber};

/// A message handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic name
    pub topic: String,
    /// Partition the message was read from
    pub partition: i32,
    /// Position of the message within the partition
    pub offset: i64,
    /// Raw payload
    pub payload: Vec<u8>,
}

/// Producer side of the channel.
pub trait MessagePublisher {
    /// Hand a payload to the channel without waiting for acknowledgment.
    ///
    /// Fails with `PublishFailure` when the message cannot be queued and
    /// `ChannelUnavailable` when the connection is gone.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for queued messages to be acknowledged.
    fn flush(&self, timeout: Duration) -> Result<()>;
}

/// Consumer side of the channel.
pub trait MessageSubscriber {
    /// Fetch the next batch of undelivered messages.
    ///
    /// Waits at most `timeout`. An empty batch is a normal outcome.
    fn poll_batch(&mut self, timeout: Duration) -> Result<Vec<Delivery>>;

    /// Advance the group position past `delivery`.
    ///
    /// Only meaningful under `CommitPolicy::AfterWrite`; with automatic
    /// commits the position has already advanced.
    fn commit(&mut self, delivery: &Delivery) -> Result<()>;

    /// Position policy this subscriber was created with.
    fn commit_policy(&self) -> CommitPolicy;
}
