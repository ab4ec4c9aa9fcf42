//! Tests for the client error taxonomy.

use kafkaesque_client::error::{Error, KafkaCode};
use num_traits::FromPrimitive;

#[test]
fn test_retriable_codes_map_to_transient() {
    for code in [
        KafkaCode::NotLeaderForPartition,
        KafkaCode::LeaderNotAvailable,
        KafkaCode::RequestTimedOut,
        KafkaCode::NetworkException,
    ] {
        let err = Error::from_code(code);
        assert_eq!(err, Error::Transient(code));
        assert!(err.is_retriable());
        assert!(!err.is_fatal());
    }
}

#[test]
fn test_coordinator_loading_is_retriable() {
    // Retriable wins over the group bucket.
    assert!(Error::from_code(KafkaCode::GroupCoordinatorNotAvailable).is_retriable());
    assert_eq!(
        Error::from_code(KafkaCode::IllegalGeneration),
        Error::GroupCoordinator(KafkaCode::IllegalGeneration)
    );
    assert_eq!(
        Error::from_code(KafkaCode::UnknownMemberId),
        Error::GroupCoordinator(KafkaCode::UnknownMemberId)
    );
}

#[test]
fn test_authorization_is_fatal() {
    let err = Error::from_code(KafkaCode::GroupAuthorizationFailed);
    assert_eq!(err, Error::Authorization(KafkaCode::GroupAuthorizationFailed));
    assert!(err.is_fatal());
    assert!(!err.is_retriable());
}

#[test]
fn test_unsupported_version_is_fatal() {
    let err = Error::from_code(KafkaCode::UnsupportedVersion);
    assert!(matches!(err, Error::Fatal { code: KafkaCode::UnsupportedVersion, .. }));
}

#[test]
fn test_message_rejections() {
    assert_eq!(
        Error::for_message(KafkaCode::MessageSizeTooLarge),
        Error::Message(KafkaCode::MessageSizeTooLarge)
    );
    assert_eq!(
        Error::for_message(KafkaCode::CorruptMessage),
        Error::Message(KafkaCode::CorruptMessage)
    );
    // Transient conditions keep their bucket.
    assert_eq!(
        Error::for_message(KafkaCode::NotEnoughReplicas),
        Error::Transient(KafkaCode::NotEnoughReplicas)
    );
    // Outside of produce the same code is a plain broker error.
    assert_eq!(
        Error::from_code(KafkaCode::TopicAlreadyExists),
        Error::Broker(KafkaCode::TopicAlreadyExists)
    );
}

#[test]
fn test_local_errors_carry_expected_codes() {
    assert_eq!(Error::Timeout.code(), Some(KafkaCode::RequestTimedOut));
    assert_eq!(
        Error::MessageSizeTooLarge { size: 10, max: 5 }.code(),
        Some(KafkaCode::MessageSizeTooLarge)
    );
    assert_eq!(Error::QueueFull.code(), None);
    assert_eq!(Error::Destroyed.code(), None);
    assert!(Error::QueueFull.is_retriable());
    assert!(!Error::MessageTimedOut.is_retriable());
}

#[test]
fn test_partition_error_display() {
    let err = Error::Partition {
        topic: "orders".to_string(),
        partition: 3,
        code: KafkaCode::OffsetOutOfRange,
    };
    let display = err.to_string();
    assert!(display.contains("orders/3"));
    assert!(display.contains("OffsetOutOfRange"));
}

#[test]
fn test_codes_from_wire_values() {
    assert_eq!(KafkaCode::from_i16(0), Some(KafkaCode::None));
    assert_eq!(KafkaCode::from_i16(6), Some(KafkaCode::NotLeaderForPartition));
    assert_eq!(KafkaCode::from_i16(25), Some(KafkaCode::UnknownMemberId));
    assert!(KafkaCode::None.is_ok());
    assert!(!KafkaCode::Unknown.is_ok());
}

#[test]
fn test_metadata_invalidating_codes() {
    assert!(KafkaCode::NotLeaderForPartition.invalidates_metadata());
    assert!(KafkaCode::LeaderNotAvailable.invalidates_metadata());
    assert!(!KafkaCode::RebalanceInProgress.invalidates_metadata());
}
