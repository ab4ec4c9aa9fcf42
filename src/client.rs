//! Shared client core.
//!
//! [`ClientCore`] owns what the producer, consumer and admin clients have in
//! common: the transport handle, the event queue with its reply registry, the
//! correlation id counter and the metadata cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::constants::MAX_POLL_TICK_MS;
use crate::context::ClientContext;
use crate::error::{Error, KafkaCode, Result};
use crate::event::{EventQueue, Reply};
use crate::metadata::{MetadataCache, MetadataSnapshot};
use crate::metrics;
use crate::stats::Statistics;
use crate::transport::{ApiRequest, ApiResponse, MetadataRequestData, Request, Transport};
use crate::types::{CorrelationId, CorrelationIdGenerator};

pub(crate) struct ClientCore {
    pub config: ClientConfig,
    transport: Box<dyn Transport>,
    pub queue: EventQueue,
    ids: CorrelationIdGenerator,
    pub metadata: MetadataCache,
    closed: AtomicBool,
    fatal: Mutex<Option<Error>>,
}

impl ClientCore {
    /// Validate the config and open the transport.
    pub fn new(config: ClientConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.validated()?;
        let queue = EventQueue::new(config.event_queue_capacity);
        transport.open(&config, queue.sender())?;
        info!(client_id = %config.client_id, servers = ?config.bootstrap_servers, "Client created");
        Ok(Self {
            metadata: MetadataCache::new(config.metadata_max_age),
            config,
            transport,
            queue,
            ids: CorrelationIdGenerator::new(),
            closed: AtomicBool::new(false),
            fatal: Mutex::new(None),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Destroyed);
        }
        Ok(())
    }

    /// The fatal error that made this instance unusable, if any.
    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal.lock().clone()
    }

    /// Submit a request whose response goes to the dispatcher.
    pub fn send(&self, api: ApiRequest) -> Result<CorrelationId> {
        self.ensure_open()?;
        let correlation_id = self.ids.next_id();
        trace!(correlation_id = %correlation_id, api = api.key().name(), "Submitting request");
        self.transport.submit(Request {
            correlation_id,
            api,
        })?;
        Ok(correlation_id)
    }

    /// Submit a request and block until its response arrives or `timeout`
    /// elapses.
    ///
    /// On the thread that owns the event queue (a callback inside `poll`, or
    /// no poller at all) the queue is drained here; other events are kept for
    /// the next `poll`.
    pub fn request(&self, api: ApiRequest, timeout: Duration, operation: &'static str) -> Result<ApiResponse> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let correlation_id = self.ids.next_id();
        self.queue
            .register(correlation_id, Reply::Blocking(tx), Some(deadline), operation);
        if let Err(e) = self.transport.submit(Request {
            correlation_id,
            api,
        }) {
            self.queue.unregister(correlation_id);
            return Err(e);
        }
        self.wait_reply(correlation_id, &rx, deadline)
    }

    fn wait_reply(
        &self,
        correlation_id: CorrelationId,
        rx: &Receiver<Result<ApiResponse>>,
        deadline: Instant,
    ) -> Result<ApiResponse> {
        let tick = Duration::from_millis(MAX_POLL_TICK_MS);
        loop {
            if let Ok(result) = rx.try_recv() {
                return result;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                self.queue.unregister(correlation_id);
                return rx.try_recv().unwrap_or(Err(Error::Timeout));
            }
            match self.queue.try_enter() {
                Some(_guard) => {
                    self.queue.pump(left.min(tick));
                }
                None => match rx.recv_timeout(left.min(tick)) {
                    Ok(result) => return result,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return Err(Error::Destroyed),
                },
            }
        }
    }

    /// Submit a request whose response resolves a oneshot slot.
    pub fn request_future(
        &self,
        api: ApiRequest,
        timeout: Duration,
        operation: &'static str,
    ) -> Result<oneshot::Receiver<Result<ApiResponse>>> {
        self.ensure_open()?;
        let (tx, rx) = oneshot::channel();
        let correlation_id = self.ids.next_id();
        self.queue.register(
            correlation_id,
            Reply::Future(tx),
            Some(Instant::now() + timeout),
            operation,
        );
        if let Err(e) = self.transport.submit(Request {
            correlation_id,
            api,
        }) {
            self.queue.unregister(correlation_id);
            return Err(e);
        }
        debug!(correlation_id = %correlation_id, operation, "Request submitted");
        Ok(rx)
    }

    pub fn metadata_request(topics: Option<&[String]>, allow_auto_topic_creation: bool) -> ApiRequest {
        ApiRequest::Metadata(MetadataRequestData {
            topics: topics.map(<[String]>::to_vec),
            allow_auto_topic_creation,
        })
    }

    /// Fetch metadata synchronously and install it in the cache.
    ///
    /// `None` fetches every topic and replaces the snapshot; a topic list
    /// merges over it. On failure the cache keeps its previous snapshot.
    pub fn fetch_metadata(&self, topics: Option<&[String]>, timeout: Duration) -> Result<Arc<MetadataSnapshot>> {
        let response = self.request(Self::metadata_request(topics, false), timeout, "metadata");
        self.apply_metadata(response, topics.is_some())
    }

    /// Install a metadata response received on any path.
    pub fn apply_metadata(&self, response: Result<ApiResponse>, partial: bool) -> Result<Arc<MetadataSnapshot>> {
        match response {
            Ok(ApiResponse::Metadata(data)) => {
                metrics::record_metadata_refresh(true);
                Ok(self.metadata.apply(data, partial))
            }
            Ok(_) => {
                metrics::record_metadata_refresh(false);
                Err(Error::Transport("unexpected response to metadata request".to_string()))
            }
            Err(e) => {
                metrics::record_metadata_refresh(false);
                if e.is_retriable() {
                    self.metadata.mark_stale();
                }
                warn!(error = %e, "Metadata refresh failed");
                Err(e)
            }
        }
    }

    /// Translate an engine error event, remembering fatal ones.
    pub fn engine_error(&self, code: KafkaCode, reason: &str, fatal: bool) -> Error {
        let error = if fatal {
            Error::Fatal {
                code,
                reason: reason.to_string(),
            }
        } else {
            Error::from_code(code)
        };
        if error.is_fatal() {
            let mut slot = self.fatal.lock();
            if slot.is_none() {
                *slot = Some(error.clone());
            }
        }
        if code.invalidates_metadata() {
            self.metadata.mark_stale();
        }
        error
    }

    /// Parse an engine stats document and hand it to the context.
    pub fn deliver_stats<C: ClientContext + ?Sized>(&self, context: &C, json: &str) {
        match Statistics::from_json(json) {
            Ok(stats) => context.stats(stats),
            Err(e) => warn!(error = %e, "Dropping malformed statistics"),
        }
    }

    /// Fence new operations, fail registered waits and close the transport.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.cancel_all(Error::Destroyed);
        self.transport.close();
        info!(client_id = %self.config.client_id, "Client closed");
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ClientCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCore")
            .field("client_id", &self.config.client_id)
            .field("queue", &self.queue)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockCluster;
    use crate::transport::ApiKey;

    fn core(cluster: &MockCluster) -> ClientCore {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
        ClientCore::new(config, Box::new(cluster.connect())).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let cluster = MockCluster::new(1);
        let result = ClientCore::new(ClientConfig::new(), Box::new(cluster.connect()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_fetch_metadata_installs_snapshot() {
        let cluster = MockCluster::new(2);
        cluster.create_topic("t", 3).unwrap();
        let core = core(&cluster);
        let snapshot = core.fetch_metadata(None, Duration::from_secs(2)).unwrap();
        assert_eq!(snapshot.brokers.len(), 2);
        assert_eq!(core.metadata.partition_count("t"), Some(3));
    }

    #[test]
    fn test_failed_refresh_keeps_previous_snapshot() {
        let cluster = MockCluster::new(1);
        cluster.create_topic("t", 2).unwrap();
        let core = core(&cluster);
        core.fetch_metadata(None, Duration::from_secs(2)).unwrap();

        cluster.push_request_errors(ApiKey::Metadata, &[KafkaCode::BrokerNotAvailable]);
        let err = core.fetch_metadata(None, Duration::from_secs(2)).unwrap_err();
        assert_eq!(err, Error::Transient(KafkaCode::BrokerNotAvailable));
        assert_eq!(core.metadata.partition_count("t"), Some(2));
        assert!(!core.metadata.is_fresh());
    }

    #[test]
    fn test_request_times_out() {
        let cluster = MockCluster::new(1);
        cluster.set_response_latency(ApiKey::Metadata, Duration::from_millis(300));
        let core = core(&cluster);
        let start = Instant::now();
        let err = core.fetch_metadata(None, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err, Error::Timeout);
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(core.queue.pending_replies(), 0);
    }

    #[test]
    fn test_closed_core_rejects_requests() {
        let cluster = MockCluster::new(1);
        let core = core(&cluster);
        core.close();
        assert_eq!(
            core.fetch_metadata(None, Duration::from_secs(1)).unwrap_err(),
            Error::Destroyed
        );
    }

    #[test]
    fn test_fatal_engine_error_is_remembered() {
        let cluster = MockCluster::new(1);
        let core = core(&cluster);
        assert!(core.fatal_error().is_none());
        let err = core.engine_error(KafkaCode::SaslAuthenticationFailed, "bad credentials", true);
        assert!(err.is_fatal());
        assert_eq!(core.fatal_error(), Some(err));
    }
}
