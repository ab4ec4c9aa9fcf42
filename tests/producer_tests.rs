//! Producer integration tests against the in-memory cluster.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kafkaesque_client::config::ClientConfig;
use kafkaesque_client::context::{ClientContext, ProducerContext};
use kafkaesque_client::error::{Error, KafkaCode};
use kafkaesque_client::message::{DeliveryReport, Message};
use kafkaesque_client::producer::{Partitioner, Producer};
use kafkaesque_client::transport::ApiKey;
use kafkaesque_client::transport::mock::MockCluster;
use kafkaesque_client::types::Offset;
use parking_lot::Mutex;

/// Collects every delivery report in arrival order.
#[derive(Clone, Default)]
struct Recorder {
    reports: Arc<Mutex<Vec<DeliveryReport>>>,
}

impl Recorder {
    fn len(&self) -> usize {
        self.reports.lock().len()
    }

    fn take(&self) -> Vec<DeliveryReport> {
        std::mem::take(&mut *self.reports.lock())
    }
}

impl ClientContext for Recorder {}

impl ProducerContext for Recorder {
    fn delivery(&self, report: DeliveryReport) {
        self.reports.lock().push(report);
    }
}

fn config(cluster: &MockCluster, extra: &[(&str, &str)]) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
    for (key, value) in extra {
        config.set(key, *value).unwrap();
    }
    config
}

fn producer(cluster: &MockCluster, extra: &[(&str, &str)]) -> (Producer<Recorder>, Recorder) {
    let recorder = Recorder::default();
    let producer = Producer::with_context(config(cluster, extra), cluster.connect(), recorder.clone()).unwrap();
    (producer, recorder)
}

fn payload(report: &DeliveryReport) -> String {
    String::from_utf8(report.message.value.clone().unwrap_or_default().to_vec()).unwrap()
}

#[test]
fn test_reports_follow_produce_order_per_partition() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("orders", 2).unwrap();
    let (producer, recorder) = producer(&cluster, &[("batch.num.messages", "3")]);

    for i in 0..20 {
        let message = Message::to("orders").partition(i % 2).payload(format!("{}", i));
        producer.produce(message).map_err(|(e, _)| e).unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);

    let reports = recorder.take();
    assert_eq!(reports.len(), 20);
    for partition in 0..2 {
        let sequence: Vec<(i64, u32)> = reports
            .iter()
            .filter(|r| r.partition() == Some(partition))
            .map(|r| (r.offset().unwrap().value(), payload(r).parse().unwrap()))
            .collect();
        assert_eq!(sequence.len(), 10);
        for pair in sequence.windows(2) {
            assert!(pair[0].0 < pair[1].0, "offsets out of order: {:?}", sequence);
            assert!(pair[0].1 < pair[1].1, "reports out of order: {:?}", sequence);
        }
    }
    assert_eq!(cluster.high_watermark("orders", 0), Some(Offset::new(10)));
}

#[test]
fn test_flush_returns_zero_only_after_every_report() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 3).unwrap();
    let (producer, recorder) = producer(&cluster, &[("linger.ms", "50")]);

    for i in 0..10 {
        producer
            .produce(Message::to("t").payload(format!("m{}", i)))
            .map_err(|(e, _)| e)
            .unwrap();
    }
    assert_eq!(producer.in_flight_count(), 10);
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    assert_eq!(recorder.len(), 10);
    assert_eq!(producer.in_flight_count(), 0);
}

#[test]
fn test_flush_times_out_with_outstanding_count() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    cluster.set_response_latency(ApiKey::Produce, Duration::from_millis(500));
    let (producer, _recorder) = producer(&cluster, &[]);

    producer.produce(Message::to("t").payload("slow")).map_err(|(e, _)| e).unwrap();
    assert_eq!(producer.flush(Duration::from_millis(50)).unwrap(), 1);
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
}

#[test]
fn test_retries_never_duplicate_reports() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    cluster.push_request_errors(
        ApiKey::Produce,
        &[KafkaCode::NotLeaderForPartition, KafkaCode::RequestTimedOut],
    );
    let (producer, recorder) = producer(&cluster, &[("retry.backoff.ms", "5")]);

    for i in 0..5 {
        producer
            .produce(Message::to("t").partition(0).payload(format!("{}", i)))
            .map_err(|(e, _)| e)
            .unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);

    let reports = recorder.take();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(DeliveryReport::is_ok));
    let unique: HashSet<String> = reports.iter().map(payload).collect();
    assert_eq!(unique.len(), 5);
    // Each message was appended once despite the retries.
    assert_eq!(cluster.messages("t", 0).len(), 5);
}

#[test]
fn test_same_key_lands_in_order_on_one_partition() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("users", 6).unwrap();
    let (producer, _recorder) = producer(&cluster, &[]);
    producer.fetch_metadata(Some("users"), Duration::from_secs(2)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let seen = Arc::clone(&seen);
        producer
            .produce_with_callback(Message::to("users").key("user-7").payload(format!("{}", i)), move |r| {
                seen.lock().push((r.partition(), r.offset()));
            })
            .map_err(|(e, _)| e)
            .unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    let partition = seen[0].0;
    assert!(seen.iter().all(|(p, _)| *p == partition));
    let offsets: Vec<i64> = seen.iter().map(|(_, o)| o.unwrap().value()).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{:?}", offsets);
}

#[test]
fn test_queue_full_returns_message() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    let (producer, _recorder) = producer(&cluster, &[("queue.buffering.max.messages", "3")]);

    for i in 0..3 {
        producer
            .produce(Message::to("t").payload(format!("{}", i)))
            .map_err(|(e, _)| e)
            .unwrap();
    }
    let (err, message) = producer.produce(Message::to("t").payload("overflow")).unwrap_err();
    assert_eq!(err, Error::QueueFull);
    assert_eq!(message.value.as_deref(), Some(&b"overflow"[..]));

    // Room again once reports were served.
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    producer.produce(message).map_err(|(e, _)| e).unwrap();
}

#[test]
fn test_permanent_broker_error_fails_message() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    cluster.set_max_message_bytes(4);
    let (producer, recorder) = producer(&cluster, &[]);

    producer
        .produce(Message::to("t").payload("far too large"))
        .map_err(|(e, _)| e)
        .unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    let reports = recorder.take();
    assert_eq!(
        reports[0].error(),
        Some(&Error::Message(KafkaCode::MessageSizeTooLarge))
    );
    assert_eq!(reports[0].offset(), None);
}

#[test]
fn test_unknown_topic_times_out() {
    let cluster = MockCluster::new(1);
    cluster.set_auto_create_topics(false);
    let (producer, recorder) = producer(&cluster, &[("message.timeout.ms", "200")]);

    producer.produce(Message::to("nowhere").payload("x")).map_err(|(e, _)| e).unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    assert_eq!(recorder.take()[0].error(), Some(&Error::MessageTimedOut));
}

#[test]
fn test_auto_created_topic_receives_messages() {
    let cluster = MockCluster::new(1);
    cluster.set_default_partitions(2);
    let (producer, recorder) = producer(&cluster, &[]);

    producer.produce(Message::to("created").payload("x")).map_err(|(e, _)| e).unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    assert!(recorder.take()[0].is_ok());
    assert_eq!(cluster.partition_count("created"), Some(2));
}

#[test]
fn test_concurrent_produce_from_threads() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 4).unwrap();
    let (producer, recorder) = producer(&cluster, &[]);
    let producer = Arc::new(producer);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let producer = Arc::clone(&producer);
            std::thread::spawn(move || {
                for i in 0..25 {
                    producer
                        .produce(Message::to("t").key(format!("k{}", t)).payload(format!("{}-{}", t, i)))
                        .map_err(|(e, _)| e)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    assert_eq!(recorder.len(), 100);
}

#[test]
fn test_closed_producer_rejects_produce() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    let (producer, _recorder) = producer(&cluster, &[]);
    producer.close(Duration::from_secs(1));
    let (err, _) = producer.produce(Message::to("t").payload("late")).unwrap_err();
    assert_eq!(err, Error::Destroyed);
}

#[test]
fn test_queued_message_times_out_after_in_flight_batch_reports() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    cluster.set_response_latency(ApiKey::Produce, Duration::from_millis(300));
    let (producer, recorder) = producer(&cluster, &[("linger.ms", "0"), ("message.timeout.ms", "150")]);
    producer.fetch_metadata(Some("t"), Duration::from_secs(2)).unwrap();

    producer.produce(Message::to("t").partition(0).payload("m0")).map_err(|(e, _)| e).unwrap();
    // m0 goes out and waits on the slow broker.
    producer.poll(Duration::from_millis(60)).unwrap();
    producer.produce(Message::to("t").partition(0).payload("m1")).map_err(|(e, _)| e).unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);

    let reports = recorder.take();
    assert_eq!(reports.len(), 2);
    assert_eq!(payload(&reports[0]), "m0");
    assert!(reports[0].is_ok());
    assert_eq!(payload(&reports[1]), "m1");
    assert_eq!(reports[1].error(), Some(&Error::MessageTimedOut));
}

#[test]
fn test_retry_budget_restored_after_exhaustion() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    let (producer, recorder) = producer(
        &cluster,
        &[("message.send.max.retries", "1"), ("retry.backoff.ms", "5")],
    );

    cluster.push_request_errors(
        ApiKey::Produce,
        &[KafkaCode::NotLeaderForPartition, KafkaCode::NotLeaderForPartition],
    );
    producer.produce(Message::to("t").partition(0).payload("a")).map_err(|(e, _)| e).unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    let reports = recorder.take();
    assert_eq!(
        reports[0].error(),
        Some(&Error::Transient(KafkaCode::NotLeaderForPartition))
    );

    // The next batch on the same partition gets its own retry.
    cluster.push_request_errors(ApiKey::Produce, &[KafkaCode::NotLeaderForPartition]);
    producer.produce(Message::to("t").partition(0).payload("b")).map_err(|(e, _)| e).unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    let reports = recorder.take();
    assert!(reports[0].is_ok(), "{:?}", reports[0].error());
    assert_eq!(cluster.messages("t", 0).len(), 1);
}

/// Always answers with the same partition, valid or not.
struct Fixed(i32);

impl Partitioner for Fixed {
    fn partition(&self, _topic: &str, _key: Option<&[u8]>, _partition_count: i32) -> i32 {
        self.0
    }
}

#[test]
fn test_partitioner_result_out_of_range_rejected() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 2).unwrap();

    for bad in [-1, 2] {
        let (producer, _recorder) = producer(&cluster, &[]);
        let producer = producer.with_partitioner(Fixed(bad));
        producer.fetch_metadata(Some("t"), Duration::from_secs(2)).unwrap();
        let (err, message) = producer.produce(Message::to("t").payload("x")).unwrap_err();
        assert_eq!(
            err,
            Error::UnknownPartition {
                topic: "t".to_string(),
                partition: bad,
            }
        );
        assert_eq!(message.value.as_deref(), Some(&b"x"[..]));
        assert_eq!(producer.in_flight_count(), 0);
    }
}

#[test]
fn test_partitioner_result_out_of_range_after_metadata_arrives() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 2).unwrap();
    let (producer, recorder) = producer(&cluster, &[]);
    let producer = producer.with_partitioner(Fixed(-3));

    // No metadata yet: the message waits, then fails through its report.
    producer.produce(Message::to("t").payload("x")).map_err(|(e, _)| e).unwrap();
    assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
    let reports = recorder.take();
    assert!(matches!(
        reports[0].error(),
        Some(Error::UnknownPartition { partition: -3, .. })
    ));
}

#[test]
fn test_drop_reports_undelivered_messages() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    cluster.set_response_latency(ApiKey::Produce, Duration::from_millis(300));
    let (producer, recorder) = producer(&cluster, &[("linger.ms", "1000")]);

    for i in 0..3 {
        producer
            .produce(Message::to("t").partition(0).payload(format!("{}", i)))
            .map_err(|(e, _)| e)
            .unwrap();
    }
    drop(producer);

    // Callbacks ran on this thread during drop.
    let reports = recorder.take();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.error() == Some(&Error::Destroyed)));
    let order: Vec<String> = reports.iter().map(payload).collect();
    assert_eq!(order, vec!["0", "1", "2"]);
}
