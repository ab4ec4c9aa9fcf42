//! Tests for the metrics module.
//!
//! Counters are process-global and other tests in this binary move them too,
//! so assertions compare before/after deltas instead of absolute values.

use std::time::Duration;

use kafkaesque_client::config::ClientConfig;
use kafkaesque_client::message::Message;
use kafkaesque_client::metrics;
use kafkaesque_client::producer::Producer;
use kafkaesque_client::transport::mock::MockCluster;

fn producer(cluster: &MockCluster, extra: &[(&str, &str)]) -> Producer {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
    for (key, value) in extra {
        config.set(key, *value).unwrap();
    }
    Producer::new(config, cluster.connect()).unwrap()
}

#[test]
fn test_init_registers_every_metric() {
    metrics::init_metrics();
    let text = metrics::encode_metrics().unwrap();
    for name in [
        "kafkaesque_client_queue_full_rejections_total",
        "kafkaesque_client_outstanding_messages",
    ] {
        assert!(text.contains(name), "missing {}", name);
    }
}

#[test]
fn test_produce_and_delivery_are_counted() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("metrics-produce", 1).unwrap();
    let producer = producer(&cluster, &[]);

    let produced = || {
        metrics::MESSAGES_PRODUCED
            .with_label_values(&["metrics-produce"])
            .get()
    };
    let delivered = || {
        metrics::DELIVERY_REPORTS
            .with_label_values(&["metrics-produce", "success"])
            .get()
    };
    let (produced_before, delivered_before) = (produced(), delivered());

    for _ in 0..3 {
        producer
            .produce(Message::to("metrics-produce").payload("x"))
            .map_err(|(e, _)| e)
            .unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);

    assert_eq!(produced() - produced_before, 3);
    assert_eq!(delivered() - delivered_before, 3);
}

#[test]
fn test_queue_full_is_counted() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("metrics-full", 1).unwrap();
    let producer = producer(&cluster, &[("queue.buffering.max.messages", "1")]);

    let before = metrics::QUEUE_FULL_REJECTIONS.get();
    producer
        .produce(Message::to("metrics-full").payload("a"))
        .map_err(|(e, _)| e)
        .unwrap();
    assert!(producer.produce(Message::to("metrics-full").payload("b")).is_err());
    assert!(metrics::QUEUE_FULL_REJECTIONS.get() > before);
}

#[test]
fn test_metadata_refresh_is_counted() {
    let cluster = MockCluster::new(1);
    let producer = producer(&cluster, &[]);

    let before = metrics::METADATA_REFRESHES
        .with_label_values(&["success"])
        .get();
    producer.fetch_metadata(None, Duration::from_secs(2)).unwrap();
    assert!(
        metrics::METADATA_REFRESHES
            .with_label_values(&["success"])
            .get()
            > before
    );
}
