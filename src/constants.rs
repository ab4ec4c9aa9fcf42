//! Centralized client defaults and limits.
//!
//! These values mirror the defaults of the reference Kafka clients so that an
//! application moving between clients sees the same behavior. Every value can
//! be overridden through [`ClientConfig`](crate::config::ClientConfig).

// =============================================================================
// Producer
// =============================================================================

/// Default maximum number of messages buffered in the local produce queue
/// (`queue.buffering.max.messages`).
pub const DEFAULT_QUEUE_BUFFERING_MAX_MESSAGES: usize = 100_000;

/// Default maximum message size (`message.max.bytes`), 1 MB.
///
/// Counts key, value and header bytes.
pub const DEFAULT_MESSAGE_MAX_BYTES: usize = 1_000_000;

/// Smallest accepted `message.max.bytes`.
pub const MIN_MESSAGE_MAX_BYTES: usize = 1000;

/// Default maximum number of records per produce request (`batch.num.messages`).
pub const DEFAULT_BATCH_NUM_MESSAGES: usize = 10_000;

/// Default linger before a batch is sent (`linger.ms`).
pub const DEFAULT_LINGER_MS: u64 = 5;

/// Default local delivery timeout (`message.timeout.ms`), 5 minutes.
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 300_000;

/// Default number of send retries for a failing batch (`message.send.max.retries`).
pub const DEFAULT_MESSAGE_SEND_MAX_RETRIES: u32 = 2_147_483_647;

// =============================================================================
// Retry / Backoff
// =============================================================================

/// Initial backoff after a transient failure (`retry.backoff.ms`).
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Upper bound for exponential backoff (`retry.backoff.max.ms`).
pub const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 1_000;

// =============================================================================
// Requests / Metadata
// =============================================================================

/// Default per-request timeout (`request.timeout.ms`).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default metadata TTL (`metadata.max.age.ms`), 15 minutes.
pub const DEFAULT_METADATA_MAX_AGE_MS: u64 = 900_000;

/// Default statistics interval (`statistics.interval.ms`); 0 disables stats.
pub const DEFAULT_STATISTICS_INTERVAL_MS: u64 = 0;

/// Capacity of the bounded event channel between the transport engine and
/// the poll loop.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 100_000;

// =============================================================================
// Consumer Group
// =============================================================================

/// Default group session timeout (`session.timeout.ms`).
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 45_000;

/// Minimum session timeout accepted by the client.
pub const MIN_SESSION_TIMEOUT_MS: u64 = 1;

/// Default heartbeat interval (`heartbeat.interval.ms`).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;

/// Default auto-commit interval (`auto.commit.interval.ms`).
pub const DEFAULT_AUTO_COMMIT_INTERVAL_MS: u64 = 5_000;

/// Default maximum broker-side wait for a fetch (`fetch.wait.max.ms`).
pub const DEFAULT_FETCH_WAIT_MAX_MS: u64 = 500;

/// Default prefetch depth per partition (`queued.min.messages`).
pub const DEFAULT_QUEUED_MIN_MESSAGES: usize = 100_000;

/// Default maximum records per fetch response.
pub const DEFAULT_FETCH_MAX_RECORDS: usize = 500;

// =============================================================================
// Internal
// =============================================================================

/// Upper bound for a single internal wait inside poll loops, so timers
/// (heartbeats, retries, expirations) are serviced even when no event arrives.
pub const MAX_POLL_TICK_MS: u64 = 100;

/// Longest an awaited admin future blocks its executor thread per poll while
/// it drives the event queue.
pub const ADMIN_FUTURE_PAUSE_MS: u64 = 5;
