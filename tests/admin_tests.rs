//! Admin client integration tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use kafkaesque_client::admin::{AdminClient, AdminOptions};
use kafkaesque_client::config::ClientConfig;
use kafkaesque_client::consumer::Consumer;
use kafkaesque_client::error::{Error, KafkaCode};
use kafkaesque_client::transport::mock::MockCluster;
use kafkaesque_client::transport::{AlterConfig, ApiKey, ConfigResource, NewPartitions, NewTopic};

fn admin(cluster: &MockCluster) -> AdminClient {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
    AdminClient::new(config, cluster.connect()).unwrap()
}

#[test]
fn test_create_topics_with_short_timeout_resolves_timeout() {
    let cluster = MockCluster::new(1);
    cluster.set_response_latency(ApiKey::CreateTopics, Duration::from_millis(400));
    let admin = admin(&cluster);

    let future = admin
        .create_topics(
            &[NewTopic::new("late", 1, 1)],
            &AdminOptions::new().request_timeout(Duration::from_millis(100)),
        )
        .unwrap();
    assert_eq!(future.wait().unwrap_err(), Error::Timeout);

    // The broker still applied it; nothing is rolled back.
    assert_eq!(cluster.partition_count("late"), Some(1));
    // The late response is drained and dropped.
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(admin.poll(Duration::from_millis(50)).unwrap(), 1);
    assert_eq!(admin.poll(Duration::ZERO).unwrap(), 0);
}

#[test]
fn test_topic_lifecycle() {
    let cluster = MockCluster::new(3);
    let admin = admin(&cluster);
    let options = AdminOptions::new();

    let created = admin
        .create_topics(&[NewTopic::new("orders", 2, 3).set("retention.ms", "1000")], &options)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(created, vec![Ok("orders".to_string())]);
    assert_eq!(cluster.topic_config("orders", "retention.ms").as_deref(), Some("1000"));

    let grown = admin
        .create_partitions(&[NewPartitions::new("orders", 5)], &options)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(grown, vec![Ok("orders".to_string())]);
    assert_eq!(cluster.partition_count("orders"), Some(5));

    let shrink = admin
        .create_partitions(&[NewPartitions::new("orders", 2)], &options)
        .unwrap()
        .wait()
        .unwrap();
    assert!(matches!(
        &shrink[0],
        Err((_, Error::Broker(KafkaCode::InvalidPartitions)))
    ));

    let deleted = admin
        .delete_topics(&["orders", "missing"], &options)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(deleted[0], Ok("orders".to_string()));
    assert!(deleted[1].is_err());
    assert_eq!(cluster.partition_count("orders"), None);
}

#[test]
fn test_alter_then_describe_configs() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("t", 1).unwrap();
    let admin = admin(&cluster);
    let options = AdminOptions::new();

    let altered = admin
        .alter_configs(
            &[
                AlterConfig::new(ConfigResource::topic("t")).set("cleanup.policy", "compact"),
                AlterConfig::new(ConfigResource::topic("t")).set("no.such.key", "1"),
            ],
            &options,
        )
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(altered[0], Ok(ConfigResource::topic("t")));
    assert!(matches!(
        &altered[1],
        Err((_, Error::Broker(KafkaCode::InvalidConfig)))
    ));

    let described = admin
        .describe_configs(&[ConfigResource::topic("t")], &options)
        .unwrap()
        .wait()
        .unwrap();
    let config = described[0].as_ref().unwrap();
    let entry = config.get("cleanup.policy").unwrap();
    assert_eq!(entry.value.as_deref(), Some("compact"));
    assert!(!entry.is_default);
    assert!(config.get("retention.ms").unwrap().is_default);
}

#[test]
fn test_group_operations() {
    let cluster = MockCluster::new(1);
    cluster.create_topic("events", 2).unwrap();
    let admin = admin(&cluster);
    let options = AdminOptions::new();

    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
    config.set("group.id", "watchers").unwrap();
    let consumer = Consumer::new(config, cluster.connect()).unwrap();
    consumer.subscribe(&["events"]).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while consumer.assignment().len() < 2 {
        assert!(Instant::now() < deadline);
        consumer.poll(Duration::from_millis(20)).unwrap();
    }

    let groups = admin.list_groups(&options).unwrap().wait().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_id, "watchers");
    assert_eq!(groups[0].state, "Stable");

    let described = admin
        .describe_groups(&["watchers"], &options)
        .unwrap()
        .wait()
        .unwrap();
    let description = described[0].as_ref().unwrap();
    assert_eq!(description.members.len(), 1);
    assert_eq!(description.members[0].assignment.len(), 2);

    let busy = admin.delete_groups(&["watchers"], &options).unwrap().wait().unwrap();
    assert!(matches!(
        &busy[0],
        Err((_, Error::Broker(KafkaCode::NonEmptyGroup)))
    ));

    consumer.close().unwrap();
    let deleted = admin.delete_groups(&["watchers"], &options).unwrap().wait().unwrap();
    assert_eq!(deleted, vec![Ok("watchers".to_string())]);
}

#[test]
fn test_many_operations_in_flight() {
    let cluster = MockCluster::new(1);
    let admin = admin(&cluster);
    let options = AdminOptions::new();

    let futures: Vec<_> = (0..5)
        .map(|i| {
            admin
                .create_topics(&[NewTopic::new(format!("topic-{}", i), 1, 1)], &options)
                .unwrap()
        })
        .collect();
    // Resolve in reverse submission order.
    for (i, future) in futures.into_iter().enumerate().rev() {
        assert_eq!(future.wait().unwrap(), vec![Ok(format!("topic-{}", i))]);
    }
}

#[tokio::test]
async fn test_admin_future_can_be_awaited() {
    let cluster = MockCluster::new(1);
    let admin = admin(&cluster);
    let result = admin
        .create_topics(&[NewTopic::new("awaited", 1, 1)], &AdminOptions::new())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(result, vec![Ok("awaited".to_string())]);
}

/// Counts how often the executor polls the wrapped future.
struct CountPolls<F> {
    inner: F,
    polls: Arc<AtomicUsize>,
}

impl<F: Future + Unpin> Future for CountPolls<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        Pin::new(&mut self.inner).poll(cx)
    }
}

#[tokio::test]
async fn test_awaited_future_does_not_spin_while_pending() {
    let cluster = MockCluster::new(1);
    cluster.set_response_latency(ApiKey::CreateTopics, Duration::from_millis(200));
    let admin = admin(&cluster);
    let polls = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let future = CountPolls {
        inner: admin
            .create_topics(&[NewTopic::new("slow", 1, 1)], &AdminOptions::new())
            .unwrap(),
        polls: Arc::clone(&polls),
    };
    let result = future.await.unwrap();
    assert_eq!(result, vec![Ok("slow".to_string())]);
    assert!(started.elapsed() >= Duration::from_millis(200));
    // Each pending poll waits a few milliseconds instead of returning at once.
    let polls = polls.load(Ordering::Relaxed);
    assert!(polls < 100, "polled {} times", polls);
}
