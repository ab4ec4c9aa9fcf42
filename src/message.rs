//! Records, headers and delivery reports.
//!
//! Payloads are opaque [`Bytes`]; any structured encoding is applied by the
//! application on top of this crate.

use bytes::Bytes;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::types::{Offset, TopicPartition};

/// Message timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timestamp {
    /// Not set; the broker or engine assigns one.
    #[default]
    NotAvailable,
    /// Set by the producing application (milliseconds since epoch).
    CreateTime(i64),
    /// Set by the broker on append (milliseconds since epoch).
    LogAppendTime(i64),
}

impl Timestamp {
    /// Current wall-clock time as a create timestamp.
    pub fn now() -> Self {
        Timestamp::CreateTime(Utc::now().timestamp_millis())
    }

    /// Milliseconds since epoch, if available.
    pub fn to_millis(self) -> Option<i64> {
        match self {
            Timestamp::NotAvailable => None,
            Timestamp::CreateTime(ms) | Timestamp::LogAppendTime(ms) => Some(ms),
        }
    }
}

/// A single header; values may be null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Option<Bytes>,
}

/// Ordered header list. Duplicate keys are allowed and keep their order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, builder style.
    pub fn insert(mut self, key: impl Into<String>, value: Option<impl Into<Bytes>>) -> Self {
        self.0.push(Header {
            key: key.into(),
            value: value.map(Into::into),
        });
        self
    }

    /// First header with `key`.
    pub fn get(&self, key: &str) -> Option<&Header> {
        self.0.iter().find(|h| h.key == key)
    }

    /// Last header with `key`, which wins under Kafka's header semantics.
    pub fn get_last(&self, key: &str) -> Option<&Header> {
        self.0.iter().rev().find(|h| h.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bytes counted against `message.max.bytes`.
    pub fn size(&self) -> usize {
        self.0
            .iter()
            .map(|h| h.key.len() + h.value.as_ref().map_or(0, Bytes::len))
            .sum()
    }
}

/// A record, either produced by this client or consumed from a partition.
///
/// `partition: None` lets the producer's partitioner pick one. `offset` is
/// only set once the broker acknowledged the record (or for consumed records).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Headers,
    pub timestamp: Timestamp,
    pub offset: Option<Offset>,
}

impl Message {
    /// A message for `topic` with no key, value or headers.
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: None,
            headers: Headers::new(),
            timestamp: Timestamp::NotAvailable,
            offset: None,
        }
    }

    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn payload(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Key, value and header bytes.
    pub fn size(&self) -> usize {
        self.key.as_ref().map_or(0, Bytes::len)
            + self.value.as_ref().map_or(0, Bytes::len)
            + self.headers.size()
    }

    /// Topic-partition this message belongs to, once a partition is known.
    pub fn topic_partition(&self) -> Option<TopicPartition> {
        self.partition.map(|p| TopicPartition {
            topic: self.topic.clone(),
            partition: p,
            offset: self.offset,
        })
    }
}

/// Final outcome of a produced message, reported exactly once.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// The produced message; partition and offset are filled in on success.
    pub message: Message,
    pub result: Result<()>,
}

impl DeliveryReport {
    pub(crate) fn delivered(message: Message) -> Self {
        Self {
            message,
            result: Ok(()),
        }
    }

    pub(crate) fn failed(message: Message, error: Error) -> Self {
        Self {
            message,
            result: Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    pub fn partition(&self) -> Option<i32> {
        self.message.partition
    }

    pub fn offset(&self) -> Option<Offset> {
        self.message.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder() {
        let msg = Message::to("orders")
            .key("k1")
            .payload("hello")
            .partition(2)
            .headers(Headers::new().insert("trace", Some("abc")));
        assert_eq!(msg.topic, "orders");
        assert_eq!(msg.partition, Some(2));
        assert_eq!(msg.key.as_deref(), Some(&b"k1"[..]));
        assert_eq!(msg.size(), 2 + 5 + 5 + 3);
        assert_eq!(msg.topic_partition().unwrap().key(), ("orders", 2));
    }

    #[test]
    fn test_headers_keep_order_and_duplicates() {
        let headers = Headers::new()
            .insert("a", Some("1"))
            .insert("b", None::<Bytes>)
            .insert("a", Some("2"));
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("a").unwrap().value.as_deref(), Some(&b"1"[..]));
        assert_eq!(
            headers.get_last("a").unwrap().value.as_deref(),
            Some(&b"2"[..])
        );
        assert!(headers.get("b").unwrap().value.is_none());
        let keys: Vec<_> = headers.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_timestamp_millis() {
        assert_eq!(Timestamp::NotAvailable.to_millis(), None);
        assert_eq!(Timestamp::CreateTime(5).to_millis(), Some(5));
        let before = Utc::now().timestamp_millis();
        let now = Timestamp::now().to_millis().unwrap();
        assert!(now >= before && now <= Utc::now().timestamp_millis());
    }

    #[test]
    fn test_delivery_report_accessors() {
        let mut msg = Message::to("t").partition(0);
        msg.offset = Some(Offset::new(9));
        let ok = DeliveryReport::delivered(msg.clone());
        assert!(ok.is_ok());
        assert_eq!(ok.offset(), Some(Offset::new(9)));

        let failed = DeliveryReport::failed(msg, Error::MessageTimedOut);
        assert_eq!(failed.error(), Some(&Error::MessageTimedOut));
    }
}
