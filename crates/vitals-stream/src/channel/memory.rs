// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process broker
//!
//! A single-partition log per topic plus a committed position per
//! (group, topic). Used for tests and for running both loops in one
//! process without Kafka.

use super::{Delivery, MessagePublisher, MessageSubscriber};
use crate::config::{CommitPolicy, OffsetReset};
use crate::error::{PipelineError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<u8>>>,
    committed: HashMap<(String, String), i64>,
    disconnected: bool,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    arrivals: Condvar,
}

/// Thread-safe in-process broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a publisher handle
    pub fn publisher(&self) -> MemoryPublisher {
        MemoryPublisher {
            broker: self.clone(),
        }
    }

    /// Create a subscriber for `topic` in consumer group `group`.
    pub fn subscriber(
        &self,
        group: &str,
        topic: &str,
        offset_reset: OffsetReset,
        commit_policy: CommitPolicy,
        max_poll_records: usize,
    ) -> MemorySubscriber {
        MemorySubscriber {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            offset_reset,
            commit_policy,
            max_poll_records: max_poll_records.max(1),
            position: None,
        }
    }

    /// Number of messages ever published to `topic`.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, Vec::len)
    }

    /// Committed position of `group` on `topic` (next offset to read).
    pub fn committed(&self, group: &str, topic: &str) -> Option<i64> {
        self.lock()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// Messages on `topic` not yet committed by `group`.
    pub fn lag(&self, group: &str, topic: &str) -> usize {
        let end = self.topic_len(topic) as i64;
        let committed = self.committed(group, topic).unwrap_or(0);
        (end - committed).max(0) as usize
    }

    /// Simulate loss of the broker connection.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
        self.inner.arrivals.notify_all();
    }

    /// Restore the broker connection.
    pub fn reconnect(&self) {
        self.lock().disconnected = false;
    }
}

/// Publisher handle on a [`MemoryBroker`].
pub struct MemoryPublisher {
    broker: MemoryBroker,
}

impl MessagePublisher for MemoryPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.broker.lock();
        if state.disconnected {
            return Err(PipelineError::ChannelUnavailable(
                "broker disconnected".into(),
            ));
        }

        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(payload.to_vec());
        drop(state);

        self.broker.inner.arrivals.notify_all();
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<()> {
        // Appends are acknowledged synchronously.
        Ok(())
    }
}

/// Subscriber handle on a [`MemoryBroker`].
pub struct MemorySubscriber {
    broker: MemoryBroker,
    group: String,
    topic: String,
    offset_reset: OffsetReset,
    commit_policy: CommitPolicy,
    max_poll_records: usize,
    /// Next offset to fetch (resolved on first poll).
    position: Option<i64>,
}

impl MemorySubscriber {
    fn group_key(&self) -> (String, String) {
        (self.group.clone(), self.topic.clone())
    }

    /// True once this subscriber has fetched everything published so far.
    ///
    /// Based on the fetch position, not the committed one: a `Latest`
    /// subscriber that started past existing messages never commits them.
    /// False before the first poll.
    pub fn is_caught_up(&self) -> bool {
        let state = self.broker.lock();
        let end = state.topics.get(&self.topic).map_or(0, Vec::len) as i64;
        self.position.is_some_and(|position| position >= end)
    }
}

impl MessageSubscriber for MemorySubscriber {
    fn poll_batch(&mut self, timeout: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + timeout;
        let key = self.group_key();
        let mut state = self.broker.lock();

        loop {
            if state.disconnected {
                return Err(PipelineError::ChannelUnavailable(
                    "broker disconnected".into(),
                ));
            }

            let end = state.topics.get(&self.topic).map_or(0, Vec::len) as i64;
            let position = *self.position.get_or_insert_with(|| {
                state
                    .committed
                    .get(&key)
                    .copied()
                    .unwrap_or(match self.offset_reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => end,
                    })
            });

            if position < end {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            state = match self.broker.inner.arrivals.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }

        let start = self.position.unwrap_or_default();
        let log = state.topics.get(&self.topic).map(Vec::as_slice).unwrap_or(&[]);
        let batch: Vec<Delivery> = log
            .iter()
            .enumerate()
            .skip(start as usize)
            .take(self.max_poll_records)
            .map(|(offset, payload)| Delivery {
                topic: self.topic.clone(),
                partition: 0,
                offset: offset as i64,
                payload: payload.clone(),
            })
            .collect();

        let next = start + batch.len() as i64;
        self.position = Some(next);

        if self.commit_policy == CommitPolicy::AutoAfterDelivery {
            state.committed.insert(key, next);
        }

        Ok(batch)
    }

    fn commit(&mut self, delivery: &Delivery) -> Result<()> {
        let mut state = self.broker.lock();
        if state.disconnected {
            return Err(PipelineError::ChannelUnavailable(
                "broker disconnected".into(),
            ));
        }

        let entry = state.committed.entry(self.group_key()).or_insert(0);
        *entry = (*entry).max(delivery.offset + 1);
        Ok(())
    }

    fn commit_policy(&self) -> CommitPolicy {
        self.commit_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "patient_vitals";

    fn publish_n(broker: &MemoryBroker, n: usize) {
        let publisher = broker.publisher();
        for i in 0..n {
            publisher
                .publish(TOPIC, format!("msg-{i}").as_bytes())
                .unwrap();
        }
    }

    #[test]
    fn test_empty_topic_returns_empty_batch() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AutoAfterDelivery,
            10,
        );

        let start = Instant::now();
        let batch = sub.poll_batch(Duration::from_millis(50)).unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_poll_respects_max_records_and_order() {
        let broker = MemoryBroker::new();
        publish_n(&broker, 5);

        let mut sub = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AutoAfterDelivery,
            3,
        );

        let first = sub.poll_batch(Duration::from_millis(10)).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].payload, b"msg-0");
        assert_eq!(first[2].offset, 2);

        let second = sub.poll_batch(Duration::from_millis(10)).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].payload, b"msg-4");

        assert!(sub.poll_batch(Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn test_auto_commit_advances_on_delivery() {
        let broker = MemoryBroker::new();
        publish_n(&broker, 4);

        let mut sub = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AutoAfterDelivery,
            10,
        );
        sub.poll_batch(Duration::from_millis(10)).unwrap();

        assert_eq!(broker.committed("g", TOPIC), Some(4));
        assert_eq!(broker.lag("g", TOPIC), 0);
    }

    #[test]
    fn test_manual_commit_controls_resume_position() {
        let broker = MemoryBroker::new();
        publish_n(&broker, 4);

        let mut sub = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AfterWrite,
            10,
        );
        let batch = sub.poll_batch(Duration::from_millis(10)).unwrap();
        assert_eq!(broker.committed("g", TOPIC), None);

        sub.commit(&batch[0]).unwrap();
        sub.commit(&batch[1]).unwrap();
        assert_eq!(broker.committed("g", TOPIC), Some(2));
        drop(sub);

        // A new member of the group resumes at the first uncommitted message.
        let mut resumed = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AfterWrite,
            10,
        );
        let batch = resumed.poll_batch(Duration::from_millis(10)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, b"msg-2");
    }

    #[test]
    fn test_offset_reset_latest_skips_history() {
        let broker = MemoryBroker::new();
        publish_n(&broker, 3);

        let mut sub = broker.subscriber(
            "late",
            TOPIC,
            OffsetReset::Latest,
            CommitPolicy::AutoAfterDelivery,
            10,
        );
        assert!(sub.poll_batch(Duration::from_millis(10)).unwrap().is_empty());

        broker.publisher().publish(TOPIC, b"fresh").unwrap();
        let batch = sub.poll_batch(Duration::from_millis(10)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"fresh");
    }

    #[test]
    fn test_caught_up_tracks_fetch_position() {
        let broker = MemoryBroker::new();
        publish_n(&broker, 3);

        let mut sub = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AutoAfterDelivery,
            10,
        );
        assert!(!sub.is_caught_up());

        sub.poll_batch(Duration::from_millis(10)).unwrap();
        assert!(sub.is_caught_up());

        publish_n(&broker, 1);
        assert!(!sub.is_caught_up());
    }

    #[test]
    fn test_latest_subscriber_caught_up_without_commit() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscriber(
            "late",
            TOPIC,
            OffsetReset::Latest,
            CommitPolicy::AutoAfterDelivery,
            10,
        );
        publish_n(&broker, 3);

        for _ in 0..5 {
            assert!(sub.poll_batch(Duration::from_millis(5)).unwrap().is_empty());
        }

        // Skipped history is never committed, so group lag cannot drain...
        assert_eq!(broker.lag("late", TOPIC), 3);
        // ...but the subscriber itself has nothing left to fetch.
        assert!(sub.is_caught_up());
    }

    #[test]
    fn test_groups_track_positions_independently() {
        let broker = MemoryBroker::new();
        publish_n(&broker, 2);

        for group in ["a", "b"] {
            let mut sub = broker.subscriber(
                group,
                TOPIC,
                OffsetReset::Earliest,
                CommitPolicy::AutoAfterDelivery,
                10,
            );
            assert_eq!(sub.poll_batch(Duration::from_millis(10)).unwrap().len(), 2);
        }
    }

    #[test]
    fn test_poll_wakes_on_publish() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AutoAfterDelivery,
            10,
        );

        let producer = broker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.publisher().publish(TOPIC, b"late-arrival").unwrap();
        });

        let batch = sub.poll_batch(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_disconnect_is_fatal() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscriber(
            "g",
            TOPIC,
            OffsetReset::Earliest,
            CommitPolicy::AutoAfterDelivery,
            10,
        );

        broker.disconnect();
        let err = sub.poll_batch(Duration::from_millis(10)).unwrap_err();
        assert!(err.is_fatal());
        assert!(broker.publisher().publish(TOPIC, b"x").unwrap_err().is_fatal());

        broker.reconnect();
        assert!(sub.poll_batch(Duration::from_millis(10)).unwrap().is_empty());
    }
}
