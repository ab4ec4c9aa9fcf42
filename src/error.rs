//! Client level errors.
//!
//! # Error Taxonomy
//!
//! Every failure the client surfaces falls into one of a few buckets:
//!
//! - **Transient** ([`Error::Transient`]): leader changes, unavailable brokers,
//!   request timeouts. Retried internally by the producer and consumer cores and
//!   only surfaced once retries or the message timeout are exhausted.
//! - **Permanent message** ([`Error::Message`], [`Error::MessageSizeTooLarge`],
//!   [`Error::UnknownPartition`]): never retried, reported through the delivery
//!   callback.
//! - **Backpressure** ([`Error::QueueFull`]): returned synchronously by
//!   `produce`; the caller backs off and polls.
//! - **Group coordination** ([`Error::GroupCoordinator`]): drives consumer state
//!   transitions.
//! - **Authorization / fatal** ([`Error::Authorization`], [`Error::Fatal`]):
//!   always surfaced through the error callback; the instance should be
//!   considered unusable afterwards.
//! - **Timeout** ([`Error::Timeout`]): bounds a wait, not the underlying
//!   operation.
//!
//! [`KafkaCode`] mirrors the broker error codes and knows which bucket each
//! code belongs to; [`Error::from_code`] performs the mapping.

use num_derive::FromPrimitive;
use std::result;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the producer, consumer and admin cores.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Retriable broker condition that outlived the retry budget.
    #[error("Transient broker error: {0:?}")]
    Transient(KafkaCode),

    /// The broker permanently rejected a message.
    #[error("Message rejected by broker: {0:?}")]
    Message(KafkaCode),

    /// The local produce queue is at `queue.buffering.max.messages`.
    #[error("Local produce queue is full")]
    QueueFull,

    /// Message exceeds `message.max.bytes`.
    #[error("Message size {size} exceeds message.max.bytes ({max})")]
    MessageSizeTooLarge { size: usize, max: usize },

    /// Topic name failed validation or the topic does not exist.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Explicit partition outside the topic's partition range.
    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: i32 },

    /// Group coordination failure.
    #[error("Group coordinator error: {0:?}")]
    GroupCoordinator(KafkaCode),

    /// Authentication or authorization failure.
    #[error("Authorization failed: {0:?}")]
    Authorization(KafkaCode),

    /// Unrecoverable error reported by the transport engine.
    #[error("Fatal error {code:?}: {reason}")]
    Fatal { code: KafkaCode, reason: String },

    /// Error scoped to a single partition (fetch or commit).
    #[error("Partition {topic}/{partition} error: {code:?}")]
    Partition {
        topic: String,
        partition: i32,
        code: KafkaCode,
    },

    /// A bounded wait elapsed.
    #[error("Operation timed out")]
    Timeout,

    /// `message.timeout.ms` elapsed before the message was acknowledged.
    #[error("Message timed out before delivery")]
    MessageTimedOut,

    /// The instance was closed before the operation resolved.
    #[error("Client instance destroyed")]
    Destroyed,

    /// The message was purged from the local queue.
    #[error("Message purged from local queue")]
    Purged,

    /// Commit or seek on a partition this consumer does not own.
    #[error("Partition {topic}/{partition} is not assigned to this consumer")]
    NotAssigned { topic: String, partition: i32 },

    /// Operation not valid in the current client state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Another thread is already polling this instance.
    #[error("poll() is already in progress on another thread")]
    ConcurrentPoll,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport engine refused a request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-retriable broker error that is not tied to a message.
    #[error("Broker error: {0:?}")]
    Broker(KafkaCode),
}

impl Error {
    /// Map a broker error code onto the client taxonomy.
    pub fn from_code(code: KafkaCode) -> Self {
        if code.is_retriable() {
            Error::Transient(code)
        } else if code.is_authorization() {
            Error::Authorization(code)
        } else if code.is_group_coordinator() {
            Error::GroupCoordinator(code)
        } else if code.is_fatal() {
            Error::Fatal {
                code,
                reason: format!("{:?}", code),
            }
        } else {
            Error::Broker(code)
        }
    }

    /// Map a broker error code returned for a produced message.
    ///
    /// Same as [`Error::from_code`] except that plain broker rejections become
    /// [`Error::Message`].
    pub fn for_message(code: KafkaCode) -> Self {
        match Error::from_code(code) {
            Error::Broker(code) => Error::Message(code),
            other => other,
        }
    }

    /// The broker code behind this error, if any.
    pub fn code(&self) -> Option<KafkaCode> {
        match self {
            Error::Transient(code)
            | Error::Message(code)
            | Error::GroupCoordinator(code)
            | Error::Authorization(code)
            | Error::Broker(code) => Some(*code),
            Error::Fatal { code, .. } | Error::Partition { code, .. } => Some(*code),
            Error::MessageSizeTooLarge { .. } => Some(KafkaCode::MessageSizeTooLarge),
            Error::UnknownPartition { .. } => Some(KafkaCode::UnknownTopicOrPartition),
            Error::Timeout => Some(KafkaCode::RequestTimedOut),
            _ => None,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::QueueFull | Error::Timeout)
    }

    /// Whether the instance should be considered unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal { .. } | Error::Authorization(_))
    }
}

/// Various errors reported by a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// There is currently no leader for this partition and hence it is
    /// unavailable for writes.
    LeaderNotAvailable = 5,
    /// The client sent a request to a replica that is not the leader for
    /// some partition; its metadata is out of date.
    NotLeaderForPartition = 6,
    /// The request exceeded the user-specified time limit.
    RequestTimedOut = 7,
    /// The broker is not alive.
    BrokerNotAvailable = 8,
    /// Replica is expected on a broker, but is not.
    ReplicaNotAvailable = 9,
    /// The message is larger than the broker's maximum message size.
    MessageSizeTooLarge = 10,
    /// Internal error code for broker-to-broker communication.
    StaleControllerEpoch = 11,
    /// Offset metadata string is larger than the configured maximum.
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The coordinator is still loading group metadata.
    GroupLoadInProgress = 14,
    /// The group coordinator is not active.
    GroupCoordinatorNotAvailable = 15,
    /// The broker is not the coordinator for this group.
    NotCoordinatorForGroup = 16,
    /// Illegal topic name, or a write to an internal topic.
    InvalidTopic = 17,
    /// A message batch exceeds the maximum configured segment size.
    RecordListTooLarge = 18,
    /// Fewer in-sync replicas than the configured minimum.
    NotEnoughReplicas = 19,
    /// Written, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// Acks value other than -1, 0 or 1.
    InvalidRequiredAcks = 21,
    /// The generation id is not the current generation.
    IllegalGeneration = 22,
    /// Protocol type or protocol set is incompatible with the group.
    InconsistentGroupProtocol = 23,
    /// The group id is empty or null.
    InvalidGroupId = 24,
    /// The member id is not in the current generation.
    UnknownMemberId = 25,
    /// Session timeout outside the broker's allowed range.
    InvalidSessionTimeout = 26,
    /// The coordinator has begun rebalancing; the member should rejoin.
    RebalanceInProgress = 27,
    /// Offset commit rejected because of oversize metadata.
    InvalidCommitOffsetSize = 28,
    /// Not authorized to access the requested topic.
    TopicAuthorizationFailed = 29,
    /// Not authorized to access the group.
    GroupAuthorizationFailed = 30,
    /// Not authorized to use an administrative API.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The broker does not support the requested SASL mechanism.
    UnsupportedSaslMechanism = 33,
    /// Request is not valid given the current SASL state.
    IllegalSaslState = 34,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
    /// Topic with this name already exists.
    TopicAlreadyExists = 36,
    /// Number of partitions is invalid.
    InvalidPartitions = 37,
    /// Replication factor is invalid.
    InvalidReplicationFactor = 38,
    /// Replica assignment is invalid.
    InvalidReplicaAssignment = 39,
    /// Configuration is invalid.
    InvalidConfig = 40,
    /// This is not the correct controller for this cluster.
    NotController = 41,
    /// Malformed request.
    InvalidRequest = 42,
    /// The message format version on the broker does not support the request.
    UnsupportedForMessageFormat = 43,
    /// Request violates a broker policy.
    PolicyViolation = 44,
    /// The producer attempted to use a sequence number outside the valid range.
    OutOfOrderSequenceNumber = 45,
    /// The producer attempted to assign a sequence number that was already used.
    DuplicateSequenceNumber = 46,
    /// SASL Authentication failed.
    SaslAuthenticationFailed = 58,
    /// The group still has members.
    NonEmptyGroup = 68,
    /// The group does not exist.
    GroupIdNotFound = 69,
}

impl KafkaCode {
    /// Whether this code signals success.
    #[inline]
    pub fn is_ok(self) -> bool {
        self == KafkaCode::None
    }

    /// Conditions expected to clear on their own (leader movement, broker
    /// restarts, coordinator loading).
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::RequestTimedOut
                | KafkaCode::BrokerNotAvailable
                | KafkaCode::ReplicaNotAvailable
                | KafkaCode::NetworkException
                | KafkaCode::GroupLoadInProgress
                | KafkaCode::GroupCoordinatorNotAvailable
                | KafkaCode::NotCoordinatorForGroup
                | KafkaCode::NotEnoughReplicas
                | KafkaCode::NotEnoughReplicasAfterAppend
                | KafkaCode::NotController
        )
    }

    /// Whether this code suggests the cached metadata is stale.
    pub fn invalidates_metadata(self) -> bool {
        matches!(
            self,
            KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::BrokerNotAvailable
                | KafkaCode::ReplicaNotAvailable
                | KafkaCode::NetworkException
        )
    }

    pub fn is_authorization(self) -> bool {
        matches!(
            self,
            KafkaCode::TopicAuthorizationFailed
                | KafkaCode::GroupAuthorizationFailed
                | KafkaCode::ClusterAuthorizationFailed
                | KafkaCode::SaslAuthenticationFailed
        )
    }

    /// Codes that concern group membership rather than a single request.
    pub fn is_group_coordinator(self) -> bool {
        matches!(
            self,
            KafkaCode::GroupLoadInProgress
                | KafkaCode::GroupCoordinatorNotAvailable
                | KafkaCode::NotCoordinatorForGroup
                | KafkaCode::IllegalGeneration
                | KafkaCode::InconsistentGroupProtocol
                | KafkaCode::InvalidGroupId
                | KafkaCode::UnknownMemberId
                | KafkaCode::InvalidSessionTimeout
                | KafkaCode::RebalanceInProgress
        )
    }

    /// Codes after which the client cannot make progress.
    pub fn is_fatal(self) -> bool {
        self.is_authorization()
            || matches!(
                self,
                KafkaCode::UnsupportedSaslMechanism
                    | KafkaCode::IllegalSaslState
                    | KafkaCode::UnsupportedVersion
            )
    }
}
