//! Cached cluster metadata.
//!
//! A [`MetadataSnapshot`] is immutable. Every refresh builds a new snapshot
//! and swaps it in; readers holding an `Arc` to the old one keep a consistent
//! view. A partial refresh (a topic list) merges the refreshed topics over the
//! previous snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::KafkaCode;
use crate::transport::{BrokerData, MetadataResponseData};
use crate::types::BrokerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    pub id: BrokerId,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl From<BrokerData> for BrokerMetadata {
    fn from(b: BrokerData) -> Self {
        Self {
            id: b.node_id,
            host: b.host,
            port: b.port,
            rack: b.rack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: i32,
    pub leader: BrokerId,
    pub replicas: Vec<BrokerId>,
    pub isr: Vec<BrokerId>,
    pub error: KafkaCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    /// Topic-level error, e.g. `UnknownTopicOrPartition`.
    pub error: KafkaCode,
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    pub fn partition_count(&self) -> i32 {
        self.partitions.len() as i32
    }
}

/// Point-in-time view of the cluster.
#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    pub brokers: Vec<BrokerMetadata>,
    pub controller: BrokerId,
    pub topics: BTreeMap<String, TopicMetadata>,
    pub fetched_at: Instant,
}

impl MetadataSnapshot {
    pub fn from_response(response: MetadataResponseData) -> Self {
        let topics = response
            .topics
            .into_iter()
            .map(|t| {
                let partitions = t
                    .partitions
                    .into_iter()
                    .map(|p| PartitionMetadata {
                        id: p.partition_index,
                        leader: p.leader_id,
                        replicas: p.replica_nodes,
                        isr: p.isr_nodes,
                        error: p.error_code,
                    })
                    .collect();
                (
                    t.name.clone(),
                    TopicMetadata {
                        name: t.name,
                        error: t.error_code,
                        partitions,
                    },
                )
            })
            .collect();
        Self {
            brokers: response.brokers.into_iter().map(Into::into).collect(),
            controller: response.controller_id,
            topics,
            fetched_at: Instant::now(),
        }
    }

    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.get(name)
    }

    /// Partition count of an existing, error-free topic.
    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.topics
            .get(topic)
            .filter(|t| t.error.is_ok())
            .map(TopicMetadata::partition_count)
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// New snapshot with `newer`'s brokers and topics over this one's topics.
    fn merged(&self, newer: MetadataSnapshot) -> MetadataSnapshot {
        let mut topics = self.topics.clone();
        topics.extend(newer.topics);
        MetadataSnapshot {
            brokers: newer.brokers,
            controller: newer.controller,
            topics,
            fetched_at: newer.fetched_at,
        }
    }
}

/// The latest snapshot plus its freshness.
#[derive(Debug)]
pub struct MetadataCache {
    current: RwLock<Option<Arc<MetadataSnapshot>>>,
    max_age: Duration,
    stale: AtomicBool,
}

impl MetadataCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            max_age,
            stale: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<MetadataSnapshot>> {
        self.current.read().clone()
    }

    /// Install a response. `partial` merges it over the current snapshot.
    pub fn apply(&self, response: MetadataResponseData, partial: bool) -> Arc<MetadataSnapshot> {
        let fresh = MetadataSnapshot::from_response(response);
        let mut current = self.current.write();
        let next = match (partial, current.as_ref()) {
            (true, Some(old)) => old.merged(fresh),
            _ => fresh,
        };
        debug!(topics = next.topics.len(), brokers = next.brokers.len(), partial, "Metadata updated");
        let next = Arc::new(next);
        *current = Some(Arc::clone(&next));
        self.stale.store(false, Ordering::Release);
        next
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.current.read().as_ref()?.partition_count(topic)
    }

    /// Whether the cache holds a snapshot younger than `metadata.max.age.ms`
    /// that was not marked stale.
    pub fn is_fresh(&self) -> bool {
        !self.stale.load(Ordering::Acquire)
            && self
                .current
                .read()
                .as_ref()
                .is_some_and(|s| s.age() < self.max_age)
    }

    /// Force the next lazy refresh (leader moved, broker went away).
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{PartitionMetadataData, TopicMetadataData};

    fn response(topics: &[(&str, i32)]) -> MetadataResponseData {
        MetadataResponseData {
            brokers: vec![BrokerData {
                node_id: BrokerId::new(0),
                host: "b0".to_string(),
                port: 9092,
                rack: None,
            }],
            controller_id: BrokerId::new(0),
            topics: topics
                .iter()
                .map(|(name, n)| TopicMetadataData {
                    error_code: KafkaCode::None,
                    name: name.to_string(),
                    is_internal: false,
                    partitions: (0..*n)
                        .map(|p| PartitionMetadataData {
                            error_code: KafkaCode::None,
                            partition_index: p,
                            leader_id: BrokerId::new(0),
                            replica_nodes: vec![BrokerId::new(0)],
                            isr_nodes: vec![BrokerId::new(0)],
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_partial_refresh_merges_topics() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let first = cache.apply(response(&[("a", 1), ("b", 2)]), false);
        cache.apply(response(&[("b", 4)]), true);

        assert_eq!(cache.partition_count("a"), Some(1));
        assert_eq!(cache.partition_count("b"), Some(4));
        // The old snapshot is untouched.
        assert_eq!(first.partition_count("b"), Some(2));
    }

    #[test]
    fn test_full_refresh_replaces_topics() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        cache.apply(response(&[("a", 1)]), false);
        cache.apply(response(&[("b", 1)]), false);
        assert_eq!(cache.partition_count("a"), None);
    }

    #[test]
    fn test_freshness() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        assert!(!cache.is_fresh());
        cache.apply(response(&[]), false);
        assert!(cache.is_fresh());
        cache.mark_stale();
        assert!(!cache.is_fresh());

        let expired = MetadataCache::new(Duration::ZERO);
        expired.apply(response(&[]), false);
        assert!(!expired.is_fresh());
    }

    #[test]
    fn test_errored_topic_has_no_partition_count() {
        let mut resp = response(&[("gone", 0)]);
        resp.topics[0].error_code = KafkaCode::UnknownTopicOrPartition;
        let snapshot = MetadataSnapshot::from_response(resp);
        assert!(snapshot.topic("gone").is_some());
        assert_eq!(snapshot.partition_count("gone"), None);
    }
}
