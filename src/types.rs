//! Type-safe wrappers for Kafka client primitives.
//!
//! These newtypes provide type safety to prevent mixing up different
//! integer types that have the same underlying representation but
//! different semantic meanings.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

/// A Kafka message offset within a partition.
///
/// # Special Values
///
/// Kafka uses negative values for special offset semantics:
/// - `-1` (`END`/`INVALID`): In fetch positions, means "end of log".
///   For committed offsets, indicates that nothing was committed.
/// - `-2` (`BEGINNING`): Means "beginning of log".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(pub i64);

impl Offset {
    /// Invalid offset, typically used to indicate an unset value.
    ///
    /// Note: This has the same value as `END` (-1). The meaning depends
    /// on context.
    pub const INVALID: Self = Offset(-1);

    /// Special offset meaning "earliest available message".
    pub const BEGINNING: Self = Offset(-2);

    /// Special offset meaning "end of log".
    pub const END: Self = Offset(-1);

    /// Create a new offset from a raw value.
    #[inline]
    pub const fn new(value: i64) -> Self {
        Offset(value)
    }

    /// Get the raw i64 value.
    #[inline]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Check if this is a valid (non-negative) offset.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Check if this is a special offset (negative value like BEGINNING or END).
    #[inline]
    pub const fn is_special(self) -> bool {
        self.0 < 0
    }

    /// The offset following this one.
    #[inline]
    pub const fn next(self) -> Self {
        Offset(self.0 + 1)
    }
}

impl From<i64> for Offset {
    fn from(value: i64) -> Self {
        Offset(value)
    }
}

impl From<Offset> for i64 {
    fn from(offset: Offset) -> Self {
        offset.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Offset::BEGINNING => write!(f, "BEGINNING"),
            Offset::END => write!(f, "END"),
            Offset(v) => write!(f, "{}", v),
        }
    }
}

/// A broker node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BrokerId(pub i32);

impl BrokerId {
    /// Invalid broker ID (no leader).
    pub const INVALID: Self = BrokerId(-1);

    #[inline]
    pub const fn new(value: i32) -> Self {
        BrokerId(value)
    }

    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl From<i32> for BrokerId {
    fn from(value: i32) -> Self {
        BrokerId(value)
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier matching a response event to the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CorrelationId(pub i32);

impl CorrelationId {
    #[inline]
    pub const fn new(value: i32) -> Self {
        CorrelationId(value)
    }

    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for CorrelationId {
    fn from(value: i32) -> Self {
        CorrelationId(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of correlation ids for one client instance.
///
/// Ids start at 1 and skip non-positive values on wrap-around, so an id is
/// never handed out twice while fewer than `i32::MAX` requests are pending.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    next: AtomicI32,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
        }
    }

    pub fn next_id(&self) -> CorrelationId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id > 0 {
                return CorrelationId(id);
            }
            // Wrapped: restart at 1. Losing the race here only skips ids.
            let _ = self
                .next
                .compare_exchange(id.wrapping_add(1), 1, Ordering::Relaxed, Ordering::Relaxed);
        }
    }
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer group generation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GenerationId(pub i32);

impl GenerationId {
    /// Not a member of any generation (manual assignment).
    pub const INVALID: Self = GenerationId(-1);

    #[inline]
    pub const fn new(value: i32) -> Self {
        GenerationId(value)
    }

    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Get the next generation ID (wrapping on overflow).
    #[inline]
    pub fn next(self) -> Self {
        GenerationId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// TopicPartition
// ============================================================================

/// A topic-partition with an optional offset payload.
///
/// Equality and hashing only consider `(topic, partition)`; the offset is
/// payload whose meaning depends on context (fetch start, committed offset,
/// watermark).
///
/// ```
/// use kafkaesque_client::types::{Offset, TopicPartition};
///
/// let a = TopicPartition::new("orders", 0);
/// let b = TopicPartition::with_offset("orders", 0, Offset::new(42));
/// assert_eq!(a, b);
/// assert_eq!(b.to_string(), "orders-0@42");
/// ```
#[derive(Debug, Clone)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: Option<Offset>,
}

impl TopicPartition {
    #[inline]
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: None,
        }
    }

    #[inline]
    pub fn with_offset(topic: impl Into<String>, partition: i32, offset: Offset) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: Some(offset),
        }
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[inline]
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Identity part without the offset payload.
    #[inline]
    pub fn key(&self) -> (&str, i32) {
        (&self.topic, self.partition)
    }

    /// Copy of this partition carrying a different offset.
    pub fn at(&self, offset: Offset) -> Self {
        Self::with_offset(self.topic.clone(), self.partition, offset)
    }
}

impl PartialEq for TopicPartition {
    fn eq(&self, other: &Self) -> bool {
        self.partition == other.partition && self.topic == other.topic
    }
}

impl Eq for TopicPartition {}

impl Hash for TopicPartition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.topic.hash(state);
        self.partition.hash(state);
    }
}

impl PartialOrd for TopicPartition {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopicPartition {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl From<(&str, i32)> for TopicPartition {
    fn from((topic, partition): (&str, i32)) -> Self {
        TopicPartition::new(topic, partition)
    }
}

impl From<(String, i32)> for TopicPartition {
    fn from((topic, partition): (String, i32)) -> Self {
        TopicPartition::new(topic, partition)
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{}-{}@{}", self.topic, self.partition, offset),
            None => write!(f, "{}-{}", self.topic, self.partition),
        }
    }
}

// ============================================================================
// Timeout
// ============================================================================

/// Bound on a blocking wait.
///
/// `After(Duration::ZERO)` is a non-blocking check; `Never` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    After(Duration),
    Never,
}

impl Timeout {
    /// Interpret a millisecond count: negative blocks indefinitely.
    pub fn from_millis(ms: i64) -> Self {
        if ms < 0 {
            Timeout::Never
        } else {
            Timeout::After(Duration::from_millis(ms as u64))
        }
    }

    /// Absolute deadline for this timeout, if bounded.
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::After(d) => Instant::now().checked_add(d),
            Timeout::Never => None,
        }
    }

    pub fn is_zero(self) -> bool {
        self == Timeout::After(Duration::ZERO)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Timeout::Never, Timeout::After)
    }
}

/// Time left until `deadline` (`None` means unbounded).
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_offset_special_values() {
        assert!(!Offset::BEGINNING.is_valid());
        assert!(Offset::END.is_special());
        assert_eq!(Offset::INVALID, Offset::END);
        assert!(Offset::new(0).is_valid());
        assert_eq!(Offset::new(41).next(), Offset::new(42));
    }

    #[test]
    fn test_offset_display() {
        assert_eq!(Offset::new(7).to_string(), "7");
        assert_eq!(Offset::BEGINNING.to_string(), "BEGINNING");
        assert_eq!(Offset::END.to_string(), "END");
    }

    #[test]
    fn test_broker_id_is_valid() {
        assert!(BrokerId::new(0).is_valid());
        assert!(!BrokerId::INVALID.is_valid());
    }

    #[test]
    fn test_generation_id_next_wraps() {
        assert_eq!(GenerationId::new(10).next().value(), 11);
        assert_eq!(GenerationId::new(i32::MAX).next().value(), i32::MIN);
    }

    #[test]
    fn test_correlation_ids_are_unique_and_positive() {
        let generator = CorrelationIdGenerator::new();
        let ids: HashSet<_> = (0..1000).map(|_| generator.next_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.value() > 0));
    }

    #[test]
    fn test_correlation_id_wraps_to_positive() {
        let generator = CorrelationIdGenerator {
            next: AtomicI32::new(i32::MAX),
        };
        assert_eq!(generator.next_id().value(), i32::MAX);
        assert!(generator.next_id().value() > 0);
    }

    #[test]
    fn test_topic_partition_identity_ignores_offset() {
        let mut set = HashSet::new();
        set.insert(TopicPartition::with_offset("t", 0, Offset::new(1)));
        set.insert(TopicPartition::with_offset("t", 0, Offset::new(2)));
        set.insert(TopicPartition::new("t", 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_topic_partition_ordering() {
        let mut parts = vec![
            TopicPartition::new("b", 0),
            TopicPartition::new("a", 1),
            TopicPartition::new("a", 0),
        ];
        parts.sort();
        assert_eq!(parts[0].key(), ("a", 0));
        assert_eq!(parts[2].key(), ("b", 0));
    }

    #[test]
    fn test_topic_partition_display() {
        assert_eq!(TopicPartition::new("t", 3).to_string(), "t-3");
    }

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(Timeout::from_millis(-1), Timeout::Never);
        assert!(Timeout::from_millis(0).is_zero());
        assert_eq!(
            Timeout::from_millis(250),
            Timeout::After(Duration::from_millis(250))
        );
        assert!(Timeout::Never.deadline().is_none());
    }
}
