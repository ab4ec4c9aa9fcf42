//! Metadata cache behaviour seen through the clients.

use std::sync::Arc;
use std::time::Duration;

use kafkaesque_client::config::ClientConfig;
use kafkaesque_client::error::{Error, KafkaCode};
use kafkaesque_client::producer::Producer;
use kafkaesque_client::transport::ApiKey;
use kafkaesque_client::transport::mock::MockCluster;

fn producer(cluster: &MockCluster) -> Producer {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
    Producer::new(config, cluster.connect()).unwrap()
}

#[test]
fn test_full_fetch_describes_cluster() {
    let cluster = MockCluster::new(3);
    cluster.create_topic("a", 4).unwrap();
    cluster.create_topic("b", 1).unwrap();
    let producer = producer(&cluster);

    let snapshot = producer.fetch_metadata(None, Duration::from_secs(2)).unwrap();
    assert_eq!(snapshot.brokers.len(), 3);
    assert_eq!(snapshot.topics.len(), 2);
    assert_eq!(snapshot.partition_count("a"), Some(4));
    let broker_ids: Vec<_> = snapshot.brokers.iter().map(|b| b.id).collect();
    for partition in &snapshot.topic("a").unwrap().partitions {
        assert!(broker_ids.contains(&partition.leader));
        assert!(partition.isr.contains(&partition.leader));
    }
}

#[test]
fn test_partial_fetch_merges_and_keeps_old_snapshot_intact() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("a", 1).unwrap();
    let producer = producer(&cluster);

    let first = producer.fetch_metadata(None, Duration::from_secs(2)).unwrap();
    cluster.create_topic("b", 2).unwrap();
    let second = producer.fetch_metadata(Some("b"), Duration::from_secs(2)).unwrap();

    assert_eq!(second.partition_count("a"), Some(1));
    assert_eq!(second.partition_count("b"), Some(2));
    // Readers of the earlier snapshot never see the refresh.
    assert!(first.topic("b").is_none());
    assert!(Arc::ptr_eq(&second, &producer.metadata().unwrap()));
}

#[test]
fn test_unknown_topic_is_reported_per_topic() {
    let cluster = MockCluster::new(1);
    let producer = producer(&cluster);

    let snapshot = producer.fetch_metadata(Some("ghost"), Duration::from_secs(2)).unwrap();
    assert_eq!(snapshot.topic("ghost").unwrap().error, KafkaCode::UnknownTopicOrPartition);
    assert_eq!(snapshot.partition_count("ghost"), None);
    // Explicit fetches never auto-create.
    assert_eq!(cluster.partition_count("ghost"), None);
}

#[test]
fn test_failed_refresh_keeps_previous_snapshot() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("a", 1).unwrap();
    let producer = producer(&cluster);
    let before = producer.fetch_metadata(None, Duration::from_secs(2)).unwrap();

    cluster.push_request_errors(ApiKey::Metadata, &[KafkaCode::BrokerNotAvailable]);
    let err = producer.fetch_metadata(None, Duration::from_secs(2)).unwrap_err();
    assert_eq!(err.code(), Some(KafkaCode::BrokerNotAvailable));
    assert!(Arc::ptr_eq(&before, &producer.metadata().unwrap()));
}

#[test]
fn test_fetch_times_out() {
    let cluster = MockCluster::new(1);
    cluster.set_response_latency(ApiKey::Metadata, Duration::from_millis(300));
    let producer = producer(&cluster);

    let err = producer
        .fetch_metadata(None, Duration::from_millis(50))
        .unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert!(producer.metadata().is_none());
}
