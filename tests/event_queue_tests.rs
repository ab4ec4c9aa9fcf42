//! Engine events delivered through `poll`: errors, statistics and the
//! single-poller rule.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kafkaesque_client::config::ClientConfig;
use kafkaesque_client::context::{ClientContext, ProducerContext};
use kafkaesque_client::error::{Error, KafkaCode};
use kafkaesque_client::producer::Producer;
use kafkaesque_client::stats::Statistics;
use kafkaesque_client::transport::mock::MockCluster;
use parking_lot::Mutex;

#[derive(Clone, Default)]
struct Observer {
    errors: Arc<Mutex<Vec<(Error, String)>>>,
    stats: Arc<Mutex<Vec<Statistics>>>,
    threads: Arc<Mutex<Vec<thread::ThreadId>>>,
}

impl ClientContext for Observer {
    fn error(&self, error: Error, reason: &str) {
        self.threads.lock().push(thread::current().id());
        self.errors.lock().push((error, reason.to_string()));
    }

    fn stats(&self, stats: Statistics) {
        self.stats.lock().push(stats);
    }
}

impl ProducerContext for Observer {}

fn producer(cluster: &MockCluster, extra: &[(&str, &str)]) -> (Producer<Observer>, Observer) {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
    for (key, value) in extra {
        config.set(key, *value).unwrap();
    }
    let observer = Observer::default();
    let producer = Producer::with_context(config, cluster.connect(), observer.clone()).unwrap();
    (producer, observer)
}

#[test]
fn test_engine_error_reaches_callback_on_polling_thread() {
    let cluster = MockCluster::new(1);
    let (producer, observer) = producer(&cluster, &[]);

    cluster.inject_error(KafkaCode::BrokerNotAvailable, "broker 0 down", false);
    assert!(producer.poll(Duration::from_secs(1)).unwrap() > 0);

    let errors = observer.errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0.code(), Some(KafkaCode::BrokerNotAvailable));
    assert_eq!(errors[0].1, "broker 0 down");
    assert!(!errors[0].0.is_fatal());
    assert_eq!(observer.threads.lock()[0], thread::current().id());
}

#[test]
fn test_fatal_engine_error_is_flagged() {
    let cluster = MockCluster::new(1);
    let (producer, observer) = producer(&cluster, &[]);

    cluster.inject_error(KafkaCode::TopicAuthorizationFailed, "not allowed", true);
    producer.poll(Duration::from_secs(1)).unwrap();

    let errors = observer.errors.lock();
    assert!(matches!(
        &errors[0].0,
        Error::Fatal { code: KafkaCode::TopicAuthorizationFailed, .. }
    ));
}

#[test]
fn test_statistics_are_delivered_at_interval() {
    let cluster = MockCluster::new(2);
    cluster.create_topic("t", 1).unwrap();
    let (producer, observer) = producer(&cluster, &[("statistics.interval.ms", "20")]);

    let deadline = Instant::now() + Duration::from_secs(5);
    while observer.stats.lock().len() < 2 {
        assert!(Instant::now() < deadline, "no statistics delivered");
        producer.poll(Duration::from_millis(50)).unwrap();
    }
    let stats = observer.stats.lock();
    assert_eq!(stats[0].client_type, "mock");
    assert_eq!(stats[0].broker_count, 2);
    assert_eq!(stats[0].topic_count, 1);
    assert!(stats[1].ts >= stats[0].ts);
}

#[test]
fn test_second_poller_is_rejected() {
    let cluster = MockCluster::new(1);
    let (producer, _observer) = producer(&cluster, &[]);
    let producer = Arc::new(producer);

    let poller = {
        let producer = Arc::clone(&producer);
        thread::spawn(move || producer.poll(Duration::from_millis(600)))
    };
    thread::sleep(Duration::from_millis(150));
    assert_eq!(producer.poll(Duration::ZERO).unwrap_err(), Error::ConcurrentPoll);
    assert!(poller.join().unwrap().is_ok());

    // Free again once the other poll returned.
    assert!(producer.poll(Duration::ZERO).is_ok());
}

#[test]
fn test_events_wait_until_poll() {
    let cluster = MockCluster::new(1);
    let (producer, observer) = producer(&cluster, &[]);

    cluster.inject_error(KafkaCode::NetworkException, "connection reset", false);
    thread::sleep(Duration::from_millis(50));
    assert!(observer.errors.lock().is_empty());

    producer.poll(Duration::from_secs(1)).unwrap();
    assert_eq!(observer.errors.lock().len(), 1);
}
