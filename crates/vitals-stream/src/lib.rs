// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Patient vital-sign streaming pipeline
//!
//! Moves vital-sign readings from a delimited text feed, through a durable
//! message topic, into a relational table.
//!
//! # Architecture
//!
//! ```text
//! SourceFeed --> PublishLoop --> MessagePublisher ==topic==> MessageSubscriber --> PollLoop --> ReadingSink
//!  (record)       (encode)       (Kafka / memory)            (Kafka / memory)      (decode)      (SQLite)
//! ```
//!
//! The two loops share no state; each owns its own connection and may run
//! in separate processes.
//!
//! # Example
//!
//! ```ignore
//! use vitals_stream::{MemoryBroker, PipelineConfig, PollLoop, PublishLoop, RunState, SourceFeed, SqliteStore};
//!
//! let config = PipelineConfig::builder().pace_ms(0).build();
//! let broker = MemoryBroker::new();
//!
//! let mut feed = SourceFeed::open(&config.source.path, b',', true)?;
//! PublishLoop::new(&config, RunState::new()).run(&mut feed, &broker.publisher())?;
//!
//! let store = SqliteStore::open_in_memory("patient_vitals")?;
//! let mut sink = store.writer()?;
//! let mut channel = broker.subscriber("group", "patient_vitals", config.channel.offset_reset,
//!     config.consumer.commit_policy, 500);
//! PollLoop::new(&config, RunState::new()).poll_once(&mut channel, &mut sink)?;
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod publisher;
pub mod reading;
pub mod record;
pub mod sink;

pub use channel::{Delivery, MemoryBroker, MessagePublisher, MessageSubscriber};
pub use config::{CommitPolicy, ConfigError, OffsetReset, PipelineConfig};
pub use consumer::{ConsumerStats, PollLoop, PollOutcome};
pub use error::{PipelineError, Result};
pub use publisher::{PublishLoop, PublisherStats};
pub use reading::Reading;
pub use record::SourceFeed;
pub use sink::{ReadingSink, SqliteStore, SqliteWriter};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag for the long-running loops.
///
/// Clones observe the same flag, so a signal handler can stop a loop
/// running on another thread.
#[derive(Debug, Clone)]
pub struct RunState {
    running: Arc<AtomicBool>,
}

impl RunState {
    /// Create a flag in the running state
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Request a stop; loops exit at their next check.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
