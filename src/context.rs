//! Application callbacks.
//!
//! Every callback runs on the thread that called `poll`, `flush` or `close`,
//! never on an engine thread, and no internal lock is held while it runs: a
//! callback may call back into the client (produce, commit, committed, ...).

use tracing::{error, info, warn};

use crate::consumer::Consumer;
use crate::error::{Error, Result};
use crate::message::DeliveryReport;
use crate::stats::Statistics;
use crate::types::TopicPartition;

/// Callbacks shared by every client type.
pub trait ClientContext: Send + Sync + 'static {
    /// An engine-level error: broker down, authentication failure, fatal
    /// condition. Defaults to logging it.
    fn error(&self, error: Error, reason: &str) {
        if error.is_fatal() {
            error!(error = %error, reason, "Fatal client error");
        } else {
            warn!(error = %error, reason, "Client error");
        }
    }

    /// Periodic engine statistics (`statistics.interval.ms`).
    fn stats(&self, stats: Statistics) {
        info!(name = %stats.name, tx = stats.tx, rx = stats.rx, replyq = stats.replyq, "Client statistics");
    }
}

/// Producer callbacks.
pub trait ProducerContext: ClientContext {
    /// Called once per produced message without its own callback.
    fn delivery(&self, _report: DeliveryReport) {}
}

/// Consumer callbacks.
///
/// Rebalance callbacks receive the consumer so they can commit, seek or
/// inspect positions while the assignment change is in progress.
pub trait ConsumerContext: ClientContext {
    /// Partitions were assigned. Runs before any record from them is returned.
    fn on_assign(&self, _consumer: &Consumer<Self>, partitions: &[TopicPartition])
    where
        Self: Sized,
    {
        info!(count = partitions.len(), "Partitions assigned");
    }

    /// Partitions are about to be revoked. The assignment is still in place,
    /// so a synchronous commit from here succeeds.
    fn on_revoke(&self, _consumer: &Consumer<Self>, partitions: &[TopicPartition])
    where
        Self: Sized,
    {
        info!(count = partitions.len(), "Partitions revoked");
    }

    /// Partitions were lost: another member may already own them, so
    /// commits for them will fail.
    fn on_lost(&self, _consumer: &Consumer<Self>, partitions: &[TopicPartition])
    where
        Self: Sized,
    {
        warn!(count = partitions.len(), "Partitions lost");
    }

    /// Outcome of an asynchronous commit.
    fn commit_callback(&self, result: Result<()>, offsets: &[TopicPartition]) {
        if let Err(e) = result {
            warn!(error = %e, partitions = offsets.len(), "Offset commit failed");
        }
    }
}

/// Context that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContext;

impl ClientContext for DefaultContext {}
impl ProducerContext for DefaultContext {}
impl ConsumerContext for DefaultContext {}
