//! Validation utilities for Kafka identifiers.
//!
//! Topic names and group ids are checked on the client before any request
//! reaches the transport engine, so a malformed name fails fast with a typed
//! error instead of a broker round-trip.
//!
//! ```
//! use kafkaesque_client::validation::{validate_group_id, validate_topic_name};
//!
//! assert!(validate_topic_name("my-topic").is_ok());
//! assert!(validate_group_id("my-consumer-group").is_ok());
//!
//! assert!(validate_topic_name("").is_err());
//! assert!(validate_topic_name("invalid/name").is_err());
//! ```
//!
//! # Validation Rules
//!
//! Topic names must:
//! - Not be empty
//! - Not exceed 249 characters
//! - Contain only ASCII alphanumeric characters, dots (`.`), underscores (`_`)
//!   and hyphens (`-`)
//! - Not be "." or ".."
//!
//! Group ids must be non-empty, at most 255 characters, and free of ASCII
//! control characters; any other character is accepted, as by the broker.

use crate::error::{Error, Result};

/// Maximum length for topic names (Kafka's MAX_NAME_LENGTH).
pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

/// Maximum length for consumer group IDs.
pub const MAX_GROUP_ID_LENGTH: usize = 255;

/// Validate a topic name following Apache Kafka's naming conventions.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic("topic name cannot be empty".to_string()));
    }
    if topic.len() > MAX_TOPIC_NAME_LENGTH {
        return Err(Error::InvalidTopic(format!(
            "topic name exceeds {} characters",
            MAX_TOPIC_NAME_LENGTH
        )));
    }
    if topic == "." || topic == ".." {
        return Err(Error::InvalidTopic(format!("'{}' is reserved", topic)));
    }
    if let Some(c) = topic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(Error::InvalidTopic(format!(
            "'{}' contains invalid character {:?}",
            topic, c
        )));
    }
    Ok(())
}

/// Validate a consumer group ID.
pub fn validate_group_id(group_id: &str) -> Result<()> {
    if group_id.is_empty() {
        return Err(Error::Config("group.id cannot be empty".to_string()));
    }
    if group_id.len() > MAX_GROUP_ID_LENGTH {
        return Err(Error::Config(format!(
            "group.id exceeds {} characters",
            MAX_GROUP_ID_LENGTH
        )));
    }
    if group_id.chars().any(|c| c.is_ascii_control()) {
        return Err(Error::Config(
            "group.id contains control characters".to_string(),
        ));
    }
    Ok(())
}
