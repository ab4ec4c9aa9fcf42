//! Client configuration.
//!
//! [`ClientConfig`] holds the options the producer, consumer and admin cores
//! interpret directly, each typed and validated, plus a pass-through bag for
//! options meant for the transport engine only (SASL credentials, TLS paths,
//! compression, ...).
//!
//! ```rust
//! use kafkaesque_client::config::{Acks, ClientConfig};
//!
//! let mut config = ClientConfig::new();
//! config
//!     .set("bootstrap.servers", "broker-1:9092,broker-2:9092")
//!     .unwrap()
//!     .set("acks", "all")
//!     .unwrap()
//!     .set("sasl.mechanism", "PLAIN")
//!     .unwrap();
//!
//! assert_eq!(config.bootstrap_servers.len(), 2);
//! assert_eq!(config.acks, Acks::All);
//! assert_eq!(config.get("sasl.mechanism").as_deref(), Some("PLAIN"));
//! ```
//!
//! # Environment Variables
//!
//! [`ClientConfig::from_env`] maps `KAFKA_<KEY>` variables onto recognized
//! keys, upper-casing the key and replacing dots with underscores:
//! `KAFKA_BOOTSTRAP_SERVERS` → `bootstrap.servers`,
//! `KAFKA_GROUP_ID` → `group.id`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_AUTO_COMMIT_INTERVAL_MS, DEFAULT_BATCH_NUM_MESSAGES, DEFAULT_EVENT_QUEUE_CAPACITY,
    DEFAULT_FETCH_WAIT_MAX_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_LINGER_MS,
    DEFAULT_MESSAGE_MAX_BYTES, DEFAULT_MESSAGE_SEND_MAX_RETRIES, DEFAULT_MESSAGE_TIMEOUT_MS,
    DEFAULT_METADATA_MAX_AGE_MS, DEFAULT_QUEUE_BUFFERING_MAX_MESSAGES,
    DEFAULT_QUEUED_MIN_MESSAGES, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MAX_MS,
    DEFAULT_RETRY_BACKOFF_MS, DEFAULT_SESSION_TIMEOUT_MS, DEFAULT_STATISTICS_INTERVAL_MS,
    MIN_MESSAGE_MAX_BYTES, MIN_SESSION_TIMEOUT_MS,
};
use crate::error::{Error, Result};
use crate::validation::validate_group_id;

/// Options interpreted by the client itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    BootstrapServers,
    ClientId,
    SecurityProtocol,
    Acks,
    BatchNumMessages,
    LingerMs,
    QueueBufferingMaxMessages,
    MessageMaxBytes,
    MessageTimeoutMs,
    MessageSendMaxRetries,
    RetryBackoffMs,
    RetryBackoffMaxMs,
    RequestTimeoutMs,
    MetadataMaxAgeMs,
    StatisticsIntervalMs,
    Partitioner,
    GroupId,
    AutoOffsetReset,
    EnableAutoCommit,
    AutoCommitIntervalMs,
    SessionTimeoutMs,
    HeartbeatIntervalMs,
    FetchWaitMaxMs,
    QueuedMinMessages,
    EventQueueCapacity,
}

impl ConfigKey {
    /// Every recognized key.
    pub const ALL: &'static [ConfigKey] = &[
        ConfigKey::BootstrapServers,
        ConfigKey::ClientId,
        ConfigKey::SecurityProtocol,
        ConfigKey::Acks,
        ConfigKey::BatchNumMessages,
        ConfigKey::LingerMs,
        ConfigKey::QueueBufferingMaxMessages,
        ConfigKey::MessageMaxBytes,
        ConfigKey::MessageTimeoutMs,
        ConfigKey::MessageSendMaxRetries,
        ConfigKey::RetryBackoffMs,
        ConfigKey::RetryBackoffMaxMs,
        ConfigKey::RequestTimeoutMs,
        ConfigKey::MetadataMaxAgeMs,
        ConfigKey::StatisticsIntervalMs,
        ConfigKey::Partitioner,
        ConfigKey::GroupId,
        ConfigKey::AutoOffsetReset,
        ConfigKey::EnableAutoCommit,
        ConfigKey::AutoCommitIntervalMs,
        ConfigKey::SessionTimeoutMs,
        ConfigKey::HeartbeatIntervalMs,
        ConfigKey::FetchWaitMaxMs,
        ConfigKey::QueuedMinMessages,
        ConfigKey::EventQueueCapacity,
    ];

    /// Canonical dotted name.
    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::BootstrapServers => "bootstrap.servers",
            ConfigKey::ClientId => "client.id",
            ConfigKey::SecurityProtocol => "security.protocol",
            ConfigKey::Acks => "acks",
            ConfigKey::BatchNumMessages => "batch.num.messages",
            ConfigKey::LingerMs => "linger.ms",
            ConfigKey::QueueBufferingMaxMessages => "queue.buffering.max.messages",
            ConfigKey::MessageMaxBytes => "message.max.bytes",
            ConfigKey::MessageTimeoutMs => "message.timeout.ms",
            ConfigKey::MessageSendMaxRetries => "message.send.max.retries",
            ConfigKey::RetryBackoffMs => "retry.backoff.ms",
            ConfigKey::RetryBackoffMaxMs => "retry.backoff.max.ms",
            ConfigKey::RequestTimeoutMs => "request.timeout.ms",
            ConfigKey::MetadataMaxAgeMs => "metadata.max.age.ms",
            ConfigKey::StatisticsIntervalMs => "statistics.interval.ms",
            ConfigKey::Partitioner => "partitioner",
            ConfigKey::GroupId => "group.id",
            ConfigKey::AutoOffsetReset => "auto.offset.reset",
            ConfigKey::EnableAutoCommit => "enable.auto.commit",
            ConfigKey::AutoCommitIntervalMs => "auto.commit.interval.ms",
            ConfigKey::SessionTimeoutMs => "session.timeout.ms",
            ConfigKey::HeartbeatIntervalMs => "heartbeat.interval.ms",
            ConfigKey::FetchWaitMaxMs => "fetch.wait.max.ms",
            ConfigKey::QueuedMinMessages => "queued.min.messages",
            ConfigKey::EventQueueCapacity => "event.queue.capacity",
        }
    }

    /// Environment variable read by [`ClientConfig::from_env`].
    pub fn env_var(self) -> String {
        format!("KAFKA_{}", self.name().replace('.', "_").to_uppercase())
    }
}

impl FromStr for ConfigKey {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            // Aliases used by the Java client.
            "retries" => Ok(ConfigKey::MessageSendMaxRetries),
            "request.required.acks" => Ok(ConfigKey::Acks),
            "queue.buffering.max.ms" => Ok(ConfigKey::LingerMs),
            "metadata.broker.list" => Ok(ConfigKey::BootstrapServers),
            _ => ConfigKey::ALL
                .iter()
                .copied()
                .find(|k| k.name() == s)
                .ok_or(()),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Acknowledgement mode for produce requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acks {
    /// Fire and forget; no offset is reported.
    None,
    /// Leader write only.
    Leader,
    /// All in-sync replicas.
    #[default]
    All,
}

impl Acks {
    /// Wire value (`0`, `1`, `-1`).
    pub fn as_i16(self) -> i16 {
        match self {
            Acks::None => 0,
            Acks::Leader => 1,
            Acks::All => -1,
        }
    }
}

impl FromStr for Acks {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "0" => Ok(Acks::None),
            "1" => Ok(Acks::Leader),
            "-1" | "all" => Ok(Acks::All),
            _ => Err(format!("Invalid acks '{}'. Valid values: 0, 1, all, -1", s)),
        }
    }
}

/// Security protocol requested from the transport engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl FromStr for SecurityProtocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plaintext" => Ok(SecurityProtocol::Plaintext),
            "ssl" => Ok(SecurityProtocol::Ssl),
            "sasl_plaintext" => Ok(SecurityProtocol::SaslPlaintext),
            "sasl_ssl" => Ok(SecurityProtocol::SaslSsl),
            _ => Err(format!(
                "Invalid security.protocol '{}'. Valid values: plaintext, ssl, sasl_plaintext, sasl_ssl",
                s
            )),
        }
    }
}

/// Where a consumer starts when it has no committed offset, or when its
/// position falls outside the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoOffsetReset {
    Earliest,
    #[default]
    Latest,
    /// Surface `OffsetOutOfRange` to the application instead of resetting.
    Error,
}

impl FromStr for AutoOffsetReset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Ok(AutoOffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(AutoOffsetReset::Latest),
            "error" => Ok(AutoOffsetReset::Error),
            _ => Err(format!(
                "Invalid auto.offset.reset '{}'. Valid values: earliest, latest, error",
                s
            )),
        }
    }
}

/// Built-in partitioner selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionerKind {
    /// murmur2 of the key (Java client compatible); keyless messages round-robin.
    #[default]
    Murmur2Random,
    /// CRC32 of the key; keyless messages round-robin.
    ConsistentRandom,
    /// Ignore keys and spread messages round-robin.
    RoundRobin,
}

impl FromStr for PartitionerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "murmur2_random" | "murmur2" => Ok(PartitionerKind::Murmur2Random),
            "consistent_random" | "consistent" => Ok(PartitionerKind::ConsistentRandom),
            "round_robin" | "roundrobin" => Ok(PartitionerKind::RoundRobin),
            _ => Err(format!(
                "Unknown partitioner '{}'. Valid values: murmur2_random, consistent_random, round_robin",
                s
            )),
        }
    }
}

/// Configuration shared by producer, consumer and admin clients.
///
/// Zero durations for `message_timeout` mean "no local timeout".
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub bootstrap_servers: Vec<String>,
    pub client_id: String,
    pub security_protocol: SecurityProtocol,

    // Producer
    pub acks: Acks,
    pub batch_num_messages: usize,
    pub linger: Duration,
    pub queue_buffering_max_messages: usize,
    pub message_max_bytes: usize,
    pub message_timeout: Duration,
    pub message_send_max_retries: u32,
    pub partitioner: PartitionerKind,

    // Shared
    pub retry_backoff: Duration,
    pub retry_backoff_max: Duration,
    pub request_timeout: Duration,
    pub metadata_max_age: Duration,
    pub statistics_interval: Duration,
    pub event_queue_capacity: usize,

    // Consumer
    pub group_id: Option<String>,
    pub auto_offset_reset: AutoOffsetReset,
    pub enable_auto_commit: bool,
    pub auto_commit_interval: Duration,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub fetch_wait_max: Duration,
    pub queued_min_messages: usize,

    /// Engine-specific options the client does not interpret.
    passthrough: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: Vec::new(),
            client_id: "kafkaesque-client".to_string(),
            security_protocol: SecurityProtocol::default(),
            acks: Acks::default(),
            batch_num_messages: DEFAULT_BATCH_NUM_MESSAGES,
            linger: Duration::from_millis(DEFAULT_LINGER_MS),
            queue_buffering_max_messages: DEFAULT_QUEUE_BUFFERING_MAX_MESSAGES,
            message_max_bytes: DEFAULT_MESSAGE_MAX_BYTES,
            message_timeout: Duration::from_millis(DEFAULT_MESSAGE_TIMEOUT_MS),
            message_send_max_retries: DEFAULT_MESSAGE_SEND_MAX_RETRIES,
            partitioner: PartitionerKind::default(),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            retry_backoff_max: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MAX_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            metadata_max_age: Duration::from_millis(DEFAULT_METADATA_MAX_AGE_MS),
            statistics_interval: Duration::from_millis(DEFAULT_STATISTICS_INTERVAL_MS),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            group_id: None,
            auto_offset_reset: AutoOffsetReset::default(),
            enable_auto_commit: true,
            auto_commit_interval: Duration::from_millis(DEFAULT_AUTO_COMMIT_INTERVAL_MS),
            session_timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            fetch_wait_max: Duration::from_millis(DEFAULT_FETCH_WAIT_MAX_MS),
            queued_min_messages: DEFAULT_QUEUED_MIN_MESSAGES,
            passthrough: BTreeMap::new(),
        }
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, value, e)))
}

fn parse_ms(key: &str, value: &str) -> Result<Duration> {
    parse_num::<u64>(key, value).map(Duration::from_millis)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::Config(format!(
            "Invalid {} '{}': expected true or false",
            key, value
        ))),
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option by name.
    ///
    /// Recognized keys are parsed and range-checked immediately; anything
    /// else is stored verbatim for the transport engine.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<&mut Self> {
        let value = value.into();
        let Ok(known) = key.parse::<ConfigKey>() else {
            self.passthrough.insert(key.to_string(), value);
            return Ok(self);
        };
        let name = known.name();
        let config_err = |e: String| Error::Config(e);

        match known {
            ConfigKey::BootstrapServers => {
                self.bootstrap_servers = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            ConfigKey::ClientId => self.client_id = value,
            ConfigKey::SecurityProtocol => {
                self.security_protocol = value.parse().map_err(config_err)?
            }
            ConfigKey::Acks => self.acks = value.parse().map_err(config_err)?,
            ConfigKey::BatchNumMessages => self.batch_num_messages = parse_num(name, &value)?,
            ConfigKey::LingerMs => self.linger = parse_ms(name, &value)?,
            ConfigKey::QueueBufferingMaxMessages => {
                self.queue_buffering_max_messages = parse_num(name, &value)?
            }
            ConfigKey::MessageMaxBytes => self.message_max_bytes = parse_num(name, &value)?,
            ConfigKey::MessageTimeoutMs => self.message_timeout = parse_ms(name, &value)?,
            ConfigKey::MessageSendMaxRetries => {
                self.message_send_max_retries = parse_num(name, &value)?
            }
            ConfigKey::RetryBackoffMs => self.retry_backoff = parse_ms(name, &value)?,
            ConfigKey::RetryBackoffMaxMs => self.retry_backoff_max = parse_ms(name, &value)?,
            ConfigKey::RequestTimeoutMs => self.request_timeout = parse_ms(name, &value)?,
            ConfigKey::MetadataMaxAgeMs => self.metadata_max_age = parse_ms(name, &value)?,
            ConfigKey::StatisticsIntervalMs => {
                self.statistics_interval = parse_ms(name, &value)?
            }
            ConfigKey::Partitioner => self.partitioner = value.parse().map_err(config_err)?,
            ConfigKey::GroupId => {
                validate_group_id(&value)?;
                self.group_id = Some(value);
            }
            ConfigKey::AutoOffsetReset => {
                self.auto_offset_reset = value.parse().map_err(config_err)?
            }
            ConfigKey::EnableAutoCommit => self.enable_auto_commit = parse_bool(name, &value)?,
            ConfigKey::AutoCommitIntervalMs => {
                self.auto_commit_interval = parse_ms(name, &value)?
            }
            ConfigKey::SessionTimeoutMs => self.session_timeout = parse_ms(name, &value)?,
            ConfigKey::HeartbeatIntervalMs => self.heartbeat_interval = parse_ms(name, &value)?,
            ConfigKey::FetchWaitMaxMs => self.fetch_wait_max = parse_ms(name, &value)?,
            ConfigKey::QueuedMinMessages => self.queued_min_messages = parse_num(name, &value)?,
            ConfigKey::EventQueueCapacity => self.event_queue_capacity = parse_num(name, &value)?,
        }
        Ok(self)
    }

    /// Read back an option as a string.
    pub fn get(&self, key: &str) -> Option<String> {
        let Ok(known) = key.parse::<ConfigKey>() else {
            return self.passthrough.get(key).cloned();
        };
        let ms = |d: Duration| d.as_millis().to_string();
        Some(match known {
            ConfigKey::BootstrapServers => self.bootstrap_servers.join(","),
            ConfigKey::ClientId => self.client_id.clone(),
            ConfigKey::SecurityProtocol => format!("{:?}", self.security_protocol).to_lowercase(),
            ConfigKey::Acks => self.acks.as_i16().to_string(),
            ConfigKey::BatchNumMessages => self.batch_num_messages.to_string(),
            ConfigKey::LingerMs => ms(self.linger),
            ConfigKey::QueueBufferingMaxMessages => self.queue_buffering_max_messages.to_string(),
            ConfigKey::MessageMaxBytes => self.message_max_bytes.to_string(),
            ConfigKey::MessageTimeoutMs => ms(self.message_timeout),
            ConfigKey::MessageSendMaxRetries => self.message_send_max_retries.to_string(),
            ConfigKey::RetryBackoffMs => ms(self.retry_backoff),
            ConfigKey::RetryBackoffMaxMs => ms(self.retry_backoff_max),
            ConfigKey::RequestTimeoutMs => ms(self.request_timeout),
            ConfigKey::MetadataMaxAgeMs => ms(self.metadata_max_age),
            ConfigKey::StatisticsIntervalMs => ms(self.statistics_interval),
            ConfigKey::Partitioner => format!("{:?}", self.partitioner),
            ConfigKey::GroupId => return self.group_id.clone(),
            ConfigKey::AutoOffsetReset => format!("{:?}", self.auto_offset_reset).to_lowercase(),
            ConfigKey::EnableAutoCommit => self.enable_auto_commit.to_string(),
            ConfigKey::AutoCommitIntervalMs => ms(self.auto_commit_interval),
            ConfigKey::SessionTimeoutMs => ms(self.session_timeout),
            ConfigKey::HeartbeatIntervalMs => ms(self.heartbeat_interval),
            ConfigKey::FetchWaitMaxMs => ms(self.fetch_wait_max),
            ConfigKey::QueuedMinMessages => self.queued_min_messages.to_string(),
            ConfigKey::EventQueueCapacity => self.event_queue_capacity.to_string(),
        })
    }

    /// Options destined for the transport engine only.
    pub fn passthrough(&self) -> impl Iterator<Item = (&str, &str)> {
        self.passthrough
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Local delivery timeout, `None` when disabled.
    pub fn message_timeout(&self) -> Option<Duration> {
        (!self.message_timeout.is_zero()).then_some(self.message_timeout)
    }

    /// Validate the configuration, collecting every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.bootstrap_servers.is_empty() {
            errors.push("bootstrap.servers must list at least one broker".to_string());
        }

        if self.batch_num_messages == 0 {
            errors.push("batch.num.messages must be at least 1".to_string());
        }

        if self.queue_buffering_max_messages == 0 {
            errors.push("queue.buffering.max.messages must be at least 1".to_string());
        }

        if self.message_max_bytes < MIN_MESSAGE_MAX_BYTES {
            errors.push(format!(
                "message.max.bytes ({}) must be at least {}",
                self.message_max_bytes, MIN_MESSAGE_MAX_BYTES
            ));
        }

        if self.retry_backoff > self.retry_backoff_max {
            errors.push(format!(
                "retry.backoff.ms ({:?}) must not exceed retry.backoff.max.ms ({:?})",
                self.retry_backoff, self.retry_backoff_max
            ));
        }

        if self.request_timeout.is_zero() {
            errors.push("request.timeout.ms must be positive".to_string());
        }

        if self.event_queue_capacity == 0 {
            errors.push("event.queue.capacity must be at least 1".to_string());
        }

        if self.session_timeout < Duration::from_millis(MIN_SESSION_TIMEOUT_MS) {
            errors.push("session.timeout.ms must be positive".to_string());
        }

        if self.heartbeat_interval >= self.session_timeout {
            errors.push(format!(
                "heartbeat.interval.ms ({:?}) must be lower than session.timeout.ms ({:?})",
                self.heartbeat_interval, self.session_timeout
            ));
        }

        if self.enable_auto_commit && self.auto_commit_interval.is_zero() {
            errors.push(
                "auto.commit.interval.ms must be positive when enable.auto.commit is set"
                    .to_string(),
            );
        }

        if self.queued_min_messages == 0 {
            errors.push("queued.min.messages must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold every problem into a single [`Error::Config`].
    pub fn validated(&self) -> Result<()> {
        self.validate()
            .map_err(|errors| Error::Config(errors.join("; ")))
    }

    /// Create configuration from `KAFKA_*` environment variables.
    ///
    /// Only recognized keys are read; see [`ConfigKey::env_var`].
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        for key in ConfigKey::ALL {
            if let Ok(value) = std::env::var(key.env_var()) {
                config.set(key.name(), value)?;
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", "localhost:9092").unwrap();
        config
    }

    #[test]
    fn test_validate_default_with_bootstrap_succeeds() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_bootstrap_fails() {
        let errors = ClientConfig::new().validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("bootstrap.servers")));
    }

    #[test]
    fn test_validate_heartbeat_not_below_session_fails() {
        let mut config = valid_config();
        config.set("session.timeout.ms", "3000").unwrap();
        config.set("heartbeat.interval.ms", "3000").unwrap();
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("heartbeat.interval.ms"));
    }

    #[test]
    fn test_validate_backoff_order() {
        let mut config = valid_config();
        config.set("retry.backoff.ms", "2000").unwrap();
        config.set("retry.backoff.max.ms", "100").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_multiple_errors() {
        let mut config = ClientConfig::new();
        config.batch_num_messages = 0;
        config.queue_buffering_max_messages = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.len() >= 3);
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_set_parses_recognized_keys() {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", "a:1, b:2,,")
            .unwrap()
            .set("linger.ms", "20")
            .unwrap()
            .set("acks", "1")
            .unwrap()
            .set("auto.offset.reset", "smallest")
            .unwrap()
            .set("enable.auto.commit", "false")
            .unwrap()
            .set("partitioner", "consistent_random")
            .unwrap();

        assert_eq!(config.bootstrap_servers, vec!["a:1", "b:2"]);
        assert_eq!(config.linger, Duration::from_millis(20));
        assert_eq!(config.acks, Acks::Leader);
        assert_eq!(config.auto_offset_reset, AutoOffsetReset::Earliest);
        assert!(!config.enable_auto_commit);
        assert_eq!(config.partitioner, PartitionerKind::ConsistentRandom);
    }

    #[test]
    fn test_set_aliases() {
        let mut config = ClientConfig::new();
        config.set("retries", "3").unwrap();
        config.set("request.required.acks", "0").unwrap();
        assert_eq!(config.message_send_max_retries, 3);
        assert_eq!(config.acks, Acks::None);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = ClientConfig::new();
        assert!(matches!(
            config.set("linger.ms", "soon"),
            Err(Error::Config(_))
        ));
        assert!(config.set("acks", "2").is_err());
        assert!(config.set("enable.auto.commit", "maybe").is_err());
        assert!(config.set("group.id", "").is_err());
        assert!(config.set("security.protocol", "carrier_pigeon").is_err());
    }

    #[test]
    fn test_passthrough_options() {
        let mut config = ClientConfig::new();
        config.set("sasl.username", "alice").unwrap();
        config.set("compression.codec", "lz4").unwrap();
        let pass: Vec<_> = config.passthrough().collect();
        assert_eq!(
            pass,
            vec![("compression.codec", "lz4"), ("sasl.username", "alice")]
        );
        assert_eq!(config.get("sasl.username").as_deref(), Some("alice"));
        assert_eq!(config.get("unknown.key"), None);
    }

    #[test]
    fn test_get_recognized_keys() {
        let mut config = ClientConfig::new();
        config.set("group.id", "g1").unwrap();
        config.set("session.timeout.ms", "6000").unwrap();
        assert_eq!(config.get("group.id").as_deref(), Some("g1"));
        assert_eq!(config.get("session.timeout.ms").as_deref(), Some("6000"));
        assert_eq!(config.get("acks").as_deref(), Some("-1"));
    }

    #[test]
    fn test_message_timeout_zero_disables() {
        let mut config = ClientConfig::new();
        config.set("message.timeout.ms", "0").unwrap();
        assert_eq!(config.message_timeout(), None);
    }

    #[test]
    fn test_config_key_round_trip_names() {
        for key in ConfigKey::ALL {
            assert_eq!(key.name().parse::<ConfigKey>(), Ok(*key));
        }
        assert_eq!(
            ConfigKey::BootstrapServers.env_var(),
            "KAFKA_BOOTSTRAP_SERVERS"
        );
    }
}
