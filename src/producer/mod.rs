//! Producer core.
//!
//! `produce` never blocks: it validates the message, picks a partition and
//! appends it to that partition's local queue. Batches are handed to the
//! transport engine from `produce`, `poll` and `flush`; their outcomes come
//! back as events and are turned into [`DeliveryReport`]s, which fire from
//! `poll`, `flush` or `close`.
//!
//! # Ordering
//!
//! Each partition has at most one produce request in flight. A batch that
//! fails with a retriable error goes back to the front of its queue, so
//! records are written, and reported, in produce order per partition.
//!
//! ```no_run
//! use std::time::Duration;
//! use kafkaesque_client::config::ClientConfig;
//! use kafkaesque_client::message::Message;
//! use kafkaesque_client::producer::Producer;
//! use kafkaesque_client::transport::mock::MockCluster;
//!
//! let cluster = MockCluster::new(1);
//! let mut config = ClientConfig::new();
//! config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
//!
//! let producer = Producer::new(config, cluster.connect()).unwrap();
//! producer
//!     .produce_with_callback(Message::to("events").key("k").payload("v"), |report| {
//!         println!("delivered to {:?} at {:?}", report.partition(), report.offset());
//!     })
//!     .map_err(|(e, _)| e)
//!     .unwrap();
//! assert_eq!(producer.flush(Duration::from_secs(5)).unwrap(), 0);
//! ```

mod partitioner;

pub use partitioner::{
    Crc32Partitioner, Murmur2Partitioner, Partitioner, RoundRobinPartitioner, for_kind,
};

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::client::ClientCore;
use crate::config::ClientConfig;
use crate::constants::MAX_POLL_TICK_MS;
use crate::context::{DefaultContext, ProducerContext};
use crate::error::{Error, KafkaCode, Result};
use crate::event::Event;
use crate::message::{DeliveryReport, Message, Timestamp};
use crate::metadata::MetadataSnapshot;
use crate::metrics;
use crate::retry::{Backoff, RetryPolicy};
use crate::transport::{ApiRequest, ApiResponse, ProduceRequestData, RecordData, Transport};
use crate::types::{CorrelationId, Offset, Timeout, TopicPartition, remaining};
use crate::validation::validate_topic_name;

/// Per-message delivery callback.
pub type DeliveryCallback = Box<dyn FnOnce(DeliveryReport) + Send>;

struct PendingMessage {
    message: Message,
    callback: Option<DeliveryCallback>,
    enqueued_at: Instant,
    deadline: Option<Instant>,
}

impl PendingMessage {
    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    fn record(&self) -> RecordData {
        RecordData {
            key: self.message.key.clone(),
            value: self.message.value.clone(),
            headers: self.message.headers.clone(),
            timestamp: self.message.timestamp,
        }
    }

    fn into_ready(self, result: Result<()>) -> Ready {
        let report = match result {
            Ok(()) => DeliveryReport::delivered(self.message),
            Err(e) => DeliveryReport::failed(self.message, e),
        };
        Ready::Report {
            report,
            callback: self.callback,
            enqueued_at: self.enqueued_at,
        }
    }
}

struct InFlightBatch {
    correlation_id: CorrelationId,
    messages: Vec<PendingMessage>,
    request_deadline: Instant,
}

struct PartitionQueue {
    queued: VecDeque<PendingMessage>,
    in_flight: Option<InFlightBatch>,
    backoff: Backoff,
}

/// Work to hand to the application once the state lock is released.
enum Ready {
    Report {
        report: DeliveryReport,
        callback: Option<DeliveryCallback>,
        enqueued_at: Instant,
    },
    Error(Error, String),
    Stats(String),
}

struct ProducerState {
    partitions: BTreeMap<TopicPartition, PartitionQueue>,
    /// Messages whose topic has no metadata yet.
    unassigned: VecDeque<PendingMessage>,
    metadata_in_flight: Option<(CorrelationId, Instant)>,
    metadata_backoff: Backoff,
    in_flight: HashMap<CorrelationId, TopicPartition>,
    /// Produced and not yet reported.
    outstanding: usize,
    flushing: usize,
    ready: VecDeque<Ready>,
}

/// Asynchronous producer.
pub struct Producer<C: ProducerContext = DefaultContext> {
    core: Arc<ClientCore>,
    context: C,
    partitioner: Box<dyn Partitioner>,
    retry: RetryPolicy,
    state: Mutex<ProducerState>,
    closing: AtomicBool,
}

impl Producer<DefaultContext> {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_context(config, transport, DefaultContext)
    }
}

impl<C: ProducerContext> Producer<C> {
    pub fn with_context(config: ClientConfig, transport: impl Transport + 'static, context: C) -> Result<Self> {
        let partitioner = partitioner::for_kind(config.partitioner);
        let retry = RetryPolicy::produce(&config);
        let core = ClientCore::new(config, Box::new(transport))?;
        let state = ProducerState {
            partitions: BTreeMap::new(),
            unassigned: VecDeque::new(),
            metadata_in_flight: None,
            metadata_backoff: RetryPolicy::fetch(&core.config).start(),
            in_flight: HashMap::new(),
            outstanding: 0,
            flushing: 0,
            ready: VecDeque::new(),
        };
        Ok(Self {
            core: Arc::new(core),
            context,
            partitioner,
            retry,
            state: Mutex::new(state),
            closing: AtomicBool::new(false),
        })
    }

    /// Replace the configured partitioner.
    pub fn with_partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Box::new(partitioner);
        self
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Queue a message; its report goes to [`ProducerContext::delivery`].
    ///
    /// Fails synchronously, handing the message back, when the local queue is
    /// full, the message is invalid, or the producer is closed.
    pub fn produce(&self, message: Message) -> std::result::Result<(), (Error, Message)> {
        self.enqueue(message, None)
    }

    /// Queue a message with its own delivery callback.
    pub fn produce_with_callback<F>(&self, message: Message, callback: F) -> std::result::Result<(), (Error, Message)>
    where
        F: FnOnce(DeliveryReport) + Send + 'static,
    {
        self.enqueue(message, Some(Box::new(callback)))
    }

    fn enqueue(
        &self,
        mut message: Message,
        callback: Option<DeliveryCallback>,
    ) -> std::result::Result<(), (Error, Message)> {
        if self.closing.load(Ordering::Acquire) || self.core.is_closed() {
            return Err((Error::Destroyed, message));
        }
        if let Some(fatal) = self.core.fatal_error() {
            return Err((fatal, message));
        }
        if let Err(e) = validate_topic_name(&message.topic) {
            return Err((e, message));
        }
        let size = message.size();
        let max = self.core.config.message_max_bytes;
        if size > max {
            return Err((Error::MessageSizeTooLarge { size, max }, message));
        }
        if message.timestamp == Timestamp::NotAvailable {
            message.timestamp = Timestamp::now();
        }

        let now = Instant::now();
        {
            let mut state = self.state.lock();
            if state.outstanding >= self.core.config.queue_buffering_max_messages {
                metrics::record_queue_full();
                return Err((Error::QueueFull, message));
            }

            let count = self.core.metadata.partition_count(&message.topic);
            match (message.partition, count) {
                (Some(p), Some(count)) if p < 0 || p >= count => {
                    let err = Error::UnknownPartition {
                        topic: message.topic.clone(),
                        partition: p,
                    };
                    return Err((err, message));
                }
                (Some(p), _) if p < 0 => {
                    let err = Error::UnknownPartition {
                        topic: message.topic.clone(),
                        partition: p,
                    };
                    return Err((err, message));
                }
                (None, Some(count)) if count > 0 => {
                    let p = self
                        .partitioner
                        .partition(&message.topic, message.key.as_deref(), count);
                    if !(0..count).contains(&p) {
                        let err = Error::UnknownPartition {
                            topic: message.topic.clone(),
                            partition: p,
                        };
                        return Err((err, message));
                    }
                    message.partition = Some(p);
                }
                _ => {}
            }

            metrics::record_produce(&message.topic);
            let pending = PendingMessage {
                deadline: self.core.config.message_timeout().map(|t| now + t),
                enqueued_at: now,
                callback,
                message,
            };
            state.outstanding += 1;
            match pending.message.topic_partition() {
                Some(tp) => self.queue_for(&mut state.partitions, tp).queued.push_back(pending),
                None => state.unassigned.push_back(pending),
            }
        }
        self.maintain();
        Ok(())
    }

    fn queue_for<'a>(
        &self,
        partitions: &'a mut BTreeMap<TopicPartition, PartitionQueue>,
        tp: TopicPartition,
    ) -> &'a mut PartitionQueue {
        let tp = TopicPartition::new(tp.topic, tp.partition);
        partitions.entry(tp).or_insert_with(|| PartitionQueue {
            queued: VecDeque::new(),
            in_flight: None,
            backoff: self.retry.start(),
        })
    }

    /// Serve delivery reports and engine events.
    ///
    /// Waits up to `timeout` for something to happen. Returns the number of
    /// events and reports processed.
    pub fn poll(&self, timeout: impl Into<Timeout>) -> Result<usize> {
        let deadline = timeout.into().deadline();
        let _guard = self.core.queue.enter()?;
        let tick = Duration::from_millis(MAX_POLL_TICK_MS);
        let mut total = 0;
        loop {
            let wakeup = self.maintain();
            let mut wait = remaining(deadline).unwrap_or(tick).min(tick);
            if let Some(at) = wakeup {
                wait = wait.min(at.saturating_duration_since(Instant::now()));
            }
            if !self.has_ready() {
                total += self
                    .core
                    .queue
                    .poll(Timeout::After(wait), |event| self.handle_event(event))?;
                self.maintain();
            }
            total += self.dispatch_ready();
            let expired = remaining(deadline).is_some_and(|d| d.is_zero());
            if total > 0 || expired {
                return Ok(total);
            }
        }
    }

    /// Wait until every produced message has been reported or `timeout`
    /// elapses. Queued messages are sent without waiting for `linger.ms`.
    ///
    /// Returns the number of messages still outstanding.
    pub fn flush(&self, timeout: impl Into<Timeout>) -> Result<usize> {
        let deadline = timeout.into().deadline();
        self.state.lock().flushing += 1;
        let result = self.flush_until(deadline);
        self.state.lock().flushing -= 1;
        result
    }

    fn flush_until(&self, deadline: Option<Instant>) -> Result<usize> {
        loop {
            let outstanding = self.state.lock().outstanding;
            if outstanding == 0 {
                return Ok(0);
            }
            let left = remaining(deadline);
            if left.is_some_and(|d| d.is_zero()) {
                debug!(outstanding, "Flush timed out");
                return Ok(outstanding);
            }
            let step = left.unwrap_or(Duration::from_millis(MAX_POLL_TICK_MS));
            match self.poll(step.min(Duration::from_millis(MAX_POLL_TICK_MS))) {
                Ok(_) => {}
                // Another thread is serving the queue.
                Err(Error::ConcurrentPoll) => thread::sleep(Duration::from_millis(1)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Messages produced and not yet reported.
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Fail every queued message that was not yet sent with
    /// [`Error::Purged`]. Reports fire on the next `poll`.
    pub fn purge(&self) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut purged = 0;
        for pending in state.unassigned.drain(..) {
            state.ready.push_back(pending.into_ready(Err(Error::Purged)));
            purged += 1;
        }
        for pq in state.partitions.values_mut() {
            for pending in pq.queued.drain(..) {
                state.ready.push_back(pending.into_ready(Err(Error::Purged)));
                purged += 1;
            }
        }
        debug!(purged, "Purged local queue");
        purged
    }

    /// Fetch metadata for one topic, or all topics, and refresh the cache.
    pub fn fetch_metadata(&self, topic: Option<&str>, timeout: Duration) -> Result<Arc<MetadataSnapshot>> {
        let topics = topic.map(|t| vec![t.to_string()]);
        self.core.fetch_metadata(topics.as_deref(), timeout)
    }

    /// The cached metadata snapshot, if any.
    pub fn metadata(&self) -> Option<Arc<MetadataSnapshot>> {
        self.core.metadata.snapshot()
    }

    /// Flush for up to `timeout`, then fail everything left with
    /// [`Error::Destroyed`] and close the transport.
    ///
    /// Every remaining delivery callback runs on the calling thread before
    /// this returns.
    pub fn close(&self, timeout: Duration) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.flush(timeout) {
            warn!(error = %e, "Flush during close failed");
        }
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut left: Vec<PendingMessage> = state.unassigned.drain(..).collect();
            for pq in state.partitions.values_mut() {
                if let Some(batch) = pq.in_flight.take() {
                    left.extend(batch.messages);
                }
                left.extend(pq.queued.drain(..));
            }
            state.in_flight.clear();
            state.metadata_in_flight = None;
            if !left.is_empty() {
                warn!(count = left.len(), "Closing producer with undelivered messages");
            }
            for pending in left {
                state.ready.push_back(pending.into_ready(Err(Error::Destroyed)));
            }
        }
        self.core.close();
        let _guard = self.core.queue.try_enter();
        self.dispatch_ready();
        info!(client_id = %self.core.config.client_id, "Producer closed");
    }

    fn has_ready(&self) -> bool {
        !self.state.lock().ready.is_empty()
    }

    /// Run timers and send what is ready. Returns the next timer deadline.
    fn maintain(&self) -> Option<Instant> {
        if self.core.is_closed() {
            return None;
        }
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.assign_unassigned(state);
        self.request_metadata(state, now);
        self.expire(state, now);
        self.send_batches(state, now);
        self.next_wakeup(state)
    }

    fn assign_unassigned(&self, state: &mut ProducerState) {
        if state.unassigned.is_empty() {
            return;
        }
        let Some(snapshot) = self.core.metadata.snapshot() else {
            return;
        };
        let pending = std::mem::take(&mut state.unassigned);
        for mut pm in pending {
            let topic = snapshot.topic(&pm.message.topic);
            match topic {
                Some(t) if t.error.is_ok() && t.partition_count() > 0 => {
                    let count = t.partition_count();
                    let p = pm.message.partition.unwrap_or_else(|| {
                        self.partitioner
                            .partition(&pm.message.topic, pm.message.key.as_deref(), count)
                    });
                    if !(0..count).contains(&p) {
                        let err = Error::UnknownPartition {
                            topic: pm.message.topic.clone(),
                            partition: p,
                        };
                        state.ready.push_back(pm.into_ready(Err(err)));
                        continue;
                    }
                    pm.message.partition = Some(p);
                    let tp = TopicPartition::new(pm.message.topic.clone(), p);
                    self.queue_for(&mut state.partitions, tp).queued.push_back(pm);
                }
                // Only trust a permanent topic error seen after the message was queued.
                Some(t)
                    if !t.error.is_ok()
                        && !t.error.is_retriable()
                        && snapshot.fetched_at >= pm.enqueued_at =>
                {
                    let err = Error::for_message(t.error);
                    debug!(topic = %pm.message.topic, error = %err, "Topic unavailable");
                    state.ready.push_back(pm.into_ready(Err(err)));
                }
                _ => state.unassigned.push_back(pm),
            }
        }
    }

    fn request_metadata(&self, state: &mut ProducerState, now: Instant) {
        if let Some((id, deadline)) = state.metadata_in_flight
            && now >= deadline
        {
            debug!(correlation_id = %id, "Metadata request timed out");
            state.metadata_in_flight = None;
            state.metadata_backoff.fail();
        }
        if state.metadata_in_flight.is_some() || !state.metadata_backoff.ready() {
            return;
        }
        let mut topics: BTreeSet<String> = state.unassigned.iter().map(|pm| pm.message.topic.clone()).collect();
        if !self.core.metadata.is_fresh() {
            topics.extend(
                state
                    .partitions
                    .iter()
                    .filter(|(_, pq)| !pq.queued.is_empty() || pq.in_flight.is_some())
                    .map(|(tp, _)| tp.topic.clone()),
            );
        }
        if topics.is_empty() {
            return;
        }
        let topics: Vec<String> = topics.into_iter().collect();
        match self.core.send(ClientCore::metadata_request(Some(&topics), true)) {
            Ok(id) => {
                trace!(correlation_id = %id, topics = ?topics, "Requesting metadata");
                state.metadata_in_flight = Some((id, now + self.core.config.request_timeout));
            }
            Err(e) => warn!(error = %e, "Failed to request metadata"),
        }
    }

    fn expire(&self, state: &mut ProducerState, now: Instant) {
        let ProducerState {
            partitions,
            unassigned,
            in_flight,
            ready,
            ..
        } = state;

        for pending in drain_expired(unassigned, now) {
            ready.push_back(pending.into_ready(Err(Error::MessageTimedOut)));
        }
        for (tp, pq) in partitions.iter_mut() {
            // Queued messages may only report after the batch ahead of them.
            if pq.in_flight.is_none() {
                for pending in drain_expired(&mut pq.queued, now) {
                    debug!(topic = %tp.topic, partition = tp.partition, "Message timed out in queue");
                    ready.push_back(pending.into_ready(Err(Error::MessageTimedOut)));
                }
            }
            if pq.in_flight.as_ref().is_some_and(|b| now >= b.request_deadline)
                && let Some(batch) = pq.in_flight.take()
            {
                in_flight.remove(&batch.correlation_id);
                warn!(topic = %tp.topic, partition = tp.partition, "Produce request timed out");
                retry_batch(pq, batch.messages, KafkaCode::RequestTimedOut, ready, now);
            }
        }
    }

    fn send_batches(&self, state: &mut ProducerState, now: Instant) {
        let config = &self.core.config;
        let flushing = state.flushing > 0 || self.closing.load(Ordering::Acquire);
        let ProducerState {
            partitions,
            in_flight,
            ..
        } = state;

        for (tp, pq) in partitions.iter_mut() {
            if pq.in_flight.is_some() || !pq.backoff.ready() {
                continue;
            }
            let Some(front) = pq.queued.front() else {
                continue;
            };
            let lingered = now.duration_since(front.enqueued_at) >= config.linger;
            if !(flushing || lingered || pq.queued.len() >= config.batch_num_messages) {
                continue;
            }

            let n = pq.queued.len().min(config.batch_num_messages);
            let messages: Vec<PendingMessage> = pq.queued.drain(..n).collect();
            let request = ApiRequest::Produce(ProduceRequestData {
                acks: config.acks.as_i16(),
                timeout: config.request_timeout,
                topic: tp.topic.clone(),
                partition: tp.partition,
                records: messages.iter().map(PendingMessage::record).collect(),
            });
            match self.core.send(request) {
                Ok(correlation_id) => {
                    trace!(topic = %tp.topic, partition = tp.partition, records = n, "Sent produce batch");
                    in_flight.insert(correlation_id, tp.clone());
                    pq.in_flight = Some(InFlightBatch {
                        correlation_id,
                        messages,
                        request_deadline: now + config.request_timeout,
                    });
                }
                Err(e) => {
                    warn!(topic = %tp.topic, partition = tp.partition, error = %e, "Failed to send batch");
                    for pending in messages.into_iter().rev() {
                        pq.queued.push_front(pending);
                    }
                    break;
                }
            }
        }
    }

    fn next_wakeup(&self, state: &ProducerState) -> Option<Instant> {
        let linger = self.core.config.linger;
        let mut next: Option<Instant> = None;
        let mut consider = |at: Option<Instant>| {
            if let Some(at) = at {
                next = Some(next.map_or(at, |n| n.min(at)));
            }
        };
        for pq in state.partitions.values() {
            match &pq.in_flight {
                Some(batch) => consider(Some(batch.request_deadline)),
                None => {
                    consider(pq.queued.front().map(|f| f.enqueued_at + linger));
                    consider(pq.backoff.retry_at());
                    consider(pq.queued.front().and_then(|f| f.deadline));
                }
            }
        }
        consider(state.unassigned.front().and_then(|f| f.deadline));
        consider(state.metadata_in_flight.map(|(_, d)| d));
        if !state.unassigned.is_empty() {
            consider(state.metadata_backoff.retry_at());
        }
        next
    }

    fn handle_event(&self, event: Event) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match event {
            Event::Response {
                correlation_id,
                body,
            } => {
                if state.metadata_in_flight.is_some_and(|(id, _)| id == correlation_id) {
                    state.metadata_in_flight = None;
                    match self.core.apply_metadata(body.map_err(Error::from_code), true) {
                        Ok(_) => state.metadata_backoff.reset(),
                        Err(_) => {
                            state.metadata_backoff.fail();
                        }
                    }
                    self.assign_unassigned(state);
                } else if let Some(tp) = state.in_flight.remove(&correlation_id) {
                    self.handle_produce_response(state, tp, correlation_id, body);
                } else {
                    trace!(correlation_id = %correlation_id, "Ignoring late response");
                }
            }
            Event::Error { code, reason, fatal } => {
                let error = self.core.engine_error(code, &reason, fatal);
                state.ready.push_back(Ready::Error(error, reason));
            }
            Event::Stats(json) => state.ready.push_back(Ready::Stats(json)),
        }
    }

    fn handle_produce_response(
        &self,
        state: &mut ProducerState,
        tp: TopicPartition,
        correlation_id: CorrelationId,
        body: std::result::Result<ApiResponse, KafkaCode>,
    ) {
        let now = Instant::now();
        let ProducerState {
            partitions, ready, ..
        } = state;
        let Some(pq) = partitions.get_mut(&tp) else {
            return;
        };
        let Some(batch) = pq
            .in_flight
            .take_if(|b| b.correlation_id == correlation_id)
        else {
            return;
        };

        let (code, base_offset, log_append_time) = match body {
            Ok(ApiResponse::Produce(r)) => (r.error_code, r.base_offset, r.log_append_time),
            Ok(_) => (KafkaCode::Unknown, Offset::INVALID, None),
            Err(code) => (code, Offset::INVALID, None),
        };

        if code.is_ok() {
            pq.backoff.reset();
            for (i, mut pending) in batch.messages.into_iter().enumerate() {
                pending.message.offset = base_offset
                    .is_valid()
                    .then(|| Offset::new(base_offset.value() + i as i64));
                if let Some(ms) = log_append_time {
                    pending.message.timestamp = Timestamp::LogAppendTime(ms);
                }
                ready.push_back(pending.into_ready(Ok(())));
            }
        } else if code.is_retriable() {
            if code.invalidates_metadata() {
                self.core.metadata.mark_stale();
            }
            debug!(topic = %tp.topic, partition = tp.partition, code = ?code, "Retriable produce error");
            retry_batch(pq, batch.messages, code, ready, now);
        } else {
            let error = Error::for_message(code);
            warn!(topic = %tp.topic, partition = tp.partition, error = %error, "Produce failed");
            for pending in batch.messages {
                ready.push_back(pending.into_ready(Err(error.clone())));
            }
        }
    }

    /// Hand ready reports and events to the application.
    fn dispatch_ready(&self) -> usize {
        let items: Vec<Ready> = self.state.lock().ready.drain(..).collect();
        let count = items.len();
        let mut reports = 0;
        for item in items {
            match item {
                Ready::Report {
                    report,
                    callback,
                    enqueued_at,
                } => {
                    metrics::record_delivery(
                        &report.message.topic,
                        report.is_ok(),
                        enqueued_at.elapsed().as_secs_f64(),
                    );
                    match callback {
                        Some(callback) => callback(report),
                        None => self.context.delivery(report),
                    }
                    reports += 1;
                }
                Ready::Error(error, reason) => self.context.error(error, &reason),
                Ready::Stats(json) => self.core.deliver_stats(&self.context, &json),
            }
        }
        if reports > 0 {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(reports);
        }
        count
    }
}

/// Requeue a failed batch at the front of its queue, or fail it once the
/// retry budget is spent. Messages past their deadline time out either way.
fn retry_batch(
    pq: &mut PartitionQueue,
    messages: Vec<PendingMessage>,
    code: KafkaCode,
    ready: &mut VecDeque<Ready>,
    now: Instant,
) {
    if !pq.backoff.fail() {
        let error = Error::Transient(code);
        for pending in messages {
            ready.push_back(pending.into_ready(Err(error.clone())));
        }
        // The next batch starts with a full budget.
        pq.backoff.reset();
        return;
    }
    metrics::record_retry("produce");
    let mut keep = Vec::with_capacity(messages.len());
    for pending in messages {
        if pending.expired(now) {
            ready.push_back(pending.into_ready(Err(Error::MessageTimedOut)));
        } else {
            keep.push(pending);
        }
    }
    for pending in keep.into_iter().rev() {
        pq.queued.push_front(pending);
    }
}

fn drain_expired(queue: &mut VecDeque<PendingMessage>, now: Instant) -> Vec<PendingMessage> {
    if !queue.iter().any(|p| p.expired(now)) {
        return Vec::new();
    }
    let mut expired = Vec::new();
    let mut kept = VecDeque::with_capacity(queue.len());
    for pending in queue.drain(..) {
        if pending.expired(now) {
            expired.push(pending);
        } else {
            kept.push_back(pending);
        }
    }
    *queue = kept;
    expired
}

/// Closes with a zero timeout: undelivered messages report
/// [`Error::Destroyed`] through their callbacks on the dropping thread.
impl<C: ProducerContext> Drop for Producer<C> {
    fn drop(&mut self) {
        self.close(Duration::ZERO);
    }
}

impl<C: ProducerContext> std::fmt::Debug for Producer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("core", &self.core)
            .field("outstanding", &self.in_flight_count())
            .finish()
    }
}
