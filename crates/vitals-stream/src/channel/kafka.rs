// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kafka channel backend.
//!
//! [`KafkaPublisher`] wraps a `BaseProducer`: `publish` only enqueues, and
//! broker acknowledgments are reported through the delivery callback.
//! [`KafkaSubscriber`] wraps a `BaseConsumer` subscribed to one topic.

use super::{Delivery, MessagePublisher, MessageSubscriber};
use crate::config::{ChannelConfig, CommitPolicy, ConsumerConfig};
use crate::error::{PipelineError, Result};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Producer context that logs delivery reports.
#[derive(Default)]
pub struct DeliveryReporter {
    acknowledged: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl ClientContext for DeliveryReporter {}

impl ProducerContext for DeliveryReporter {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match result {
            Ok(msg) => {
                self.acknowledged.fetch_add(1, Ordering::Relaxed);
                debug!(
                    topic = msg.topic(),
                    partition = msg.partition(),
                    offset = msg.offset(),
                    "Delivery acknowledged"
                );
            }
            Err((err, msg)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(topic = msg.topic(), error = %err, "Delivery failed");
            }
        }
    }
}

fn base_config(channel: &ChannelConfig) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &channel.bootstrap_servers);
    config
}

fn apply_properties(config: &mut ClientConfig, channel: &ChannelConfig) {
    // Pass-through properties can override any of the above.
    for (key, value) in &channel.properties {
        config.set(key, value);
    }
}

fn is_connection_error(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::Fatal
                | RDKafkaErrorCode::Authentication
        )
    )
}

/// Kafka producer handle.
pub struct KafkaPublisher {
    producer: BaseProducer<DeliveryReporter>,
    acknowledged: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl KafkaPublisher {
    /// Build the producer client.
    pub fn new(channel: &ChannelConfig) -> Result<Self> {
        let mut config = base_config(channel);
        config
            .set("acks", channel.acks.as_client_str())
            .set("message.timeout.ms", channel.message_timeout_ms.to_string());
        apply_properties(&mut config, channel);

        let reporter = DeliveryReporter::default();
        let acknowledged = Arc::clone(&reporter.acknowledged);
        let failed = Arc::clone(&reporter.failed);

        let producer: BaseProducer<DeliveryReporter> = config
            .create_with_context(reporter)
            .map_err(|e| PipelineError::ChannelUnavailable(format!("producer: {e}")))?;

        info!(
            brokers = %channel.bootstrap_servers,
            acks = channel.acks.as_client_str(),
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            acknowledged,
            failed,
        })
    }

    /// Deliveries acknowledged by the broker so far.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    /// Deliveries reported as failed so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl MessagePublisher for KafkaPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let record: BaseRecord<'_, (), [u8]> = BaseRecord::to(topic).payload(payload);

        let sent = self.producer.send(record).map_err(|(err, _)| {
            if is_connection_error(&err) {
                PipelineError::ChannelUnavailable(err.to_string())
            } else {
                PipelineError::PublishFailure(err.to_string())
            }
        });

        // Serve delivery callbacks without blocking.
        self.producer.poll(Duration::ZERO);
        sent
    }

    fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| PipelineError::PublishFailure(format!("flush: {e}")))
    }
}

impl Drop for KafkaPublisher {
    fn drop(&mut self) {
        let pending = self.producer.in_flight_count();
        if pending > 0 {
            warn!(pending, "Dropping Kafka producer with undelivered messages");
        }
    }
}

/// Kafka consumer handle.
pub struct KafkaSubscriber {
    consumer: BaseConsumer,
    commit_policy: CommitPolicy,
    max_poll_records: usize,
}

impl KafkaSubscriber {
    /// Build the consumer client and subscribe to the configured topic.
    pub fn new(channel: &ChannelConfig, consumer_config: &ConsumerConfig) -> Result<Self> {
        let auto_commit = consumer_config.commit_policy == CommitPolicy::AutoAfterDelivery;

        let mut config = base_config(channel);
        config
            .set("group.id", &channel.group_id)
            .set("auto.offset.reset", channel.offset_reset.as_client_str())
            .set("enable.auto.commit", auto_commit.to_string())
            .set("enable.partition.eof", "false");
        apply_properties(&mut config, channel);

        let consumer: BaseConsumer = config
            .create()
            .map_err(|e| PipelineError::ChannelUnavailable(format!("consumer: {e}")))?;

        consumer
            .subscribe(&[channel.topic.as_str()])
            .map_err(|e| PipelineError::ChannelUnavailable(format!("subscribe: {e}")))?;

        info!(
            brokers = %channel.bootstrap_servers,
            topic = %channel.topic,
            group_id = %channel.group_id,
            auto_commit,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            commit_policy: consumer_config.commit_policy,
            max_poll_records: consumer_config.max_poll_records.max(1),
        })
    }

    fn to_delivery(msg: &BorrowedMessage<'_>) -> Delivery {
        Delivery {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            payload: msg.payload().unwrap_or_default().to_vec(),
        }
    }
}

impl MessageSubscriber for KafkaSubscriber {
    fn poll_batch(&mut self, timeout: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + timeout;
        let mut batch = Vec::new();

        while batch.len() < self.max_poll_records {
            // Once something arrived, only drain what is already buffered.
            let wait = if batch.is_empty() {
                deadline.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            };

            match self.consumer.poll(wait) {
                None => break,
                Some(Ok(msg)) => batch.push(Self::to_delivery(&msg)),
                Some(Err(err)) if is_connection_error(&err) => {
                    return Err(PipelineError::ChannelUnavailable(err.to_string()));
                }
                Some(Err(err)) => {
                    warn!(error = %err, "Kafka consumer error");
                    break;
                }
            }
        }

        Ok(batch)
    }

    fn commit(&mut self, delivery: &Delivery) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &delivery.topic,
            delivery.partition,
            Offset::Offset(delivery.offset + 1),
        )
        .map_err(|e| PipelineError::ChannelUnavailable(e.to_string()))?;

        self.consumer.commit(&tpl, CommitMode::Sync).map_err(|e| {
            if is_connection_error(&e) {
                PipelineError::ChannelUnavailable(e.to_string())
            } else {
                PipelineError::PublishFailure(format!("commit: {e}"))
            }
        })
    }

    fn commit_policy(&self) -> CommitPolicy {
        self.commit_policy
    }
}

impl Drop for KafkaSubscriber {
    fn drop(&mut self) {
        self.consumer.unsubscribe();
    }
}
