// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! [source]
//! path = "patient_vitals.csv"
//!
//! [channel]
//! bootstrap_servers = "localhost:9092"
//! topic = "patient_vitals"
//! group_id = "healthcare-group"
//! offset_reset = "earliest"
//!
//! [producer]
//! pace_ms = 1000
//!
//! [consumer]
//! poll_timeout_ms = 1000
//! commit_policy = "auto"
//!
//! [sink]
//! database = "healthcare_monitoring.db"
//! table = "patient_vitals"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Broker acknowledgment level for published messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    /// No acknowledgment (rejected by validation).
    None,
    /// Leader acknowledgment.
    Leader,
    /// All in-sync replicas.
    All,
}

impl Acks {
    /// Kafka client configuration value.
    pub fn as_client_str(&self) -> &'static str {
        match self {
            Self::None => "0",
            Self::Leader => "1",
            Self::All => "all",
        }
    }
}

/// Initial position for a group with no committed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    /// Kafka client configuration value.
    pub fn as_client_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

/// When the consumer group position advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitPolicy {
    /// Position advances as soon as a batch is delivered.
    ///
    /// A message whose insert fails after delivery is not redelivered.
    #[serde(rename = "auto")]
    AutoAfterDelivery,
    /// Position advances per message, only after the sink accepted it.
    ///
    /// A rejected write stops the consumer with the message uncommitted.
    AfterWrite,
}

/// Source feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Delimited text file to read.
    pub path: PathBuf,
    /// Field delimiter (single ASCII character).
    pub delimiter: char,
    /// Skip the first line.
    pub has_header: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("patient_vitals.csv"),
            delimiter: ',',
            has_header: true,
        }
    }
}

impl SourceConfig {
    /// Delimiter as a byte for the CSV reader.
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }
}

/// Message channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Broker addresses (comma-separated).
    pub bootstrap_servers: String,
    /// Topic carrying readings.
    pub topic: String,
    /// Consumer group name.
    pub group_id: String,
    /// Producer acknowledgment level.
    pub acks: Acks,
    /// Initial position policy.
    pub offset_reset: OffsetReset,
    /// Maximum time a produced message may wait for delivery.
    pub message_timeout_ms: u64,
    /// Additional client properties (pass-through).
    pub properties: HashMap<String, String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            topic: "patient_vitals".to_string(),
            group_id: "healthcare-group".to_string(),
            acks: Acks::Leader,
            offset_reset: OffsetReset::Earliest,
            message_timeout_ms: 30_000,
            properties: HashMap::new(),
        }
    }
}

/// Publisher loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Pause between successive publishes (milliseconds).
    pub pace_ms: u64,
    /// Maximum wait for outstanding deliveries at shutdown (milliseconds).
    pub flush_timeout_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            pace_ms: 1000,
            flush_timeout_ms: 10_000,
        }
    }
}

impl ProducerConfig {
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Bounded wait per poll (milliseconds).
    pub poll_timeout_ms: u64,
    /// Upper bound on messages returned by one poll.
    pub max_poll_records: usize,
    /// Position advancement policy.
    pub commit_policy: CommitPolicy,
    /// Statistics reporting interval (seconds, 0 = disabled).
    pub stats_interval_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            max_poll_records: 500,
            commit_policy: CommitPolicy::AutoAfterDelivery,
            stats_interval_secs: 60,
        }
    }
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Destination store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// SQLite database file.
    pub database: PathBuf,
    /// Destination table.
    pub table: String,
    /// Create the table at startup if it does not exist.
    pub create_table: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("healthcare_monitoring.db"),
            table: "patient_vitals".to_string(),
            create_table: true,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub channel: ChannelConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    pub sink: SinkConfig,
}

impl PipelineConfig {
    /// Create a new config builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let delimiter = self.source.delimiter;
        if !delimiter.is_ascii() || (delimiter.is_ascii_control() && delimiter != '\t') {
            return Err(ConfigError::Invalid(format!(
                "Delimiter must be a printable ASCII character or tab, got {:?}",
                delimiter
            )));
        }

        if self.channel.topic.is_empty() {
            return Err(ConfigError::Invalid("Topic must not be empty".into()));
        }

        if self.channel.group_id.is_empty() {
            return Err(ConfigError::Invalid("Group id must not be empty".into()));
        }

        if self.channel.acks == Acks::None {
            return Err(ConfigError::Invalid(
                "acks = none cannot guarantee broker receipt; use leader or all".into(),
            ));
        }

        if self.consumer.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Poll timeout must be greater than zero".into(),
            ));
        }

        if self.consumer.max_poll_records == 0 {
            return Err(ConfigError::Invalid(
                "max_poll_records must be greater than zero".into(),
            ));
        }

        validate_identifier(&self.sink.table)?;

        Ok(())
    }
}

/// Reject table names that are not plain SQL identifiers.
pub fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "Table name '{}' is not a plain identifier",
            name
        )))
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.source.path = path.into();
        self
    }

    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.config.channel.bootstrap_servers = servers.into();
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.channel.topic = topic.into();
        self
    }

    pub fn group_id(mut self, group: impl Into<String>) -> Self {
        self.config.channel.group_id = group.into();
        self
    }

    pub fn offset_reset(mut self, reset: OffsetReset) -> Self {
        self.config.channel.offset_reset = reset;
        self
    }

    pub fn pace_ms(mut self, ms: u64) -> Self {
        self.config.producer.pace_ms = ms;
        self
    }

    pub fn poll_timeout_ms(mut self, ms: u64) -> Self {
        self.config.consumer.poll_timeout_ms = ms;
        self
    }

    pub fn max_poll_records(mut self, max: usize) -> Self {
        self.config.consumer.max_poll_records = max;
        self
    }

    pub fn commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.config.consumer.commit_policy = policy;
        self
    }

    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sink.database = path.into();
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.sink.table = table.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
