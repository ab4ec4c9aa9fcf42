//! # Kafkaesque client
//! Poll-driven client runtime for Kafka-compatible clusters.
//!
//! The crate bridges a callback-driven transport engine to a synchronous
//! polling API. It provides three client cores sharing one design:
//!
//! - [`Producer`](producer::Producer): non-blocking `produce`, delivery
//!   reports from `poll`/`flush`, bounded queue with backpressure.
//! - [`Consumer`](consumer::Consumer): consumer groups with rebalance
//!   callbacks, manual assignment, sync and async offset commits.
//! - [`AdminClient`](admin::AdminClient): topic, config and group management
//!   as futures resolved by correlation id.
//!
//! Nothing runs in the background on the client side. Responses and engine
//! events queue up until the application polls, and every callback runs on
//! the polling thread.
//!
//! ## Transport
//! The wire protocol lives behind the [`Transport`](transport::Transport)
//! trait. [`MockCluster`](transport::mock::MockCluster) is an in-memory engine
//! with topics, partition logs, consumer groups and fault injection, used by
//! the tests and handy for applications' own tests.
//!
//! ## Getting started
//! ```rust,no_run
//! use std::time::Duration;
//! use kafkaesque_client::prelude::*;
//! use kafkaesque_client::transport::mock::MockCluster;
//!
//! let cluster = MockCluster::new(1);
//! cluster.create_topic("greetings", 3).unwrap();
//!
//! let mut config = ClientConfig::new();
//! config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
//! let producer = Producer::new(config, cluster.connect()).unwrap();
//!
//! producer
//!     .produce_with_callback(
//!         Message::to("greetings").key("en").payload("hello"),
//!         |report| println!("{:?} at {:?}", report.partition(), report.offset()),
//!     )
//!     .map_err(|(e, _)| e)
//!     .unwrap();
//! producer.flush(Duration::from_secs(5)).unwrap();
//! ```
//!
//! ## Configuration
//! [`ClientConfig`](config::ClientConfig) takes librdkafka-style keys
//! (`bootstrap.servers`, `group.id`, `enable.auto.commit`, ...) and can be
//! filled from `KAFKA_*` environment variables.

#![forbid(unsafe_code)]

mod client;

pub mod admin;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod context;
pub mod error;
pub mod event;
pub mod message;
pub mod metadata;
pub mod metrics;
pub mod producer;
pub mod retry;
pub mod stats;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod validation;

pub mod prelude {
    //! Main exports for applications.
    pub use crate::admin::{AdminClient, AdminFuture, AdminOptions};
    pub use crate::config::ClientConfig;
    pub use crate::consumer::{CommitMode, Consumer, MembershipState};
    pub use crate::context::{ClientContext, ConsumerContext, DefaultContext, ProducerContext};
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::message::{DeliveryReport, Header, Headers, Message, Timestamp};
    pub use crate::producer::{Partitioner, Producer};
    pub use crate::types::{GenerationId, Offset, Timeout, TopicPartition};

    pub use bytes;
}
