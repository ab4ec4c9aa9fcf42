//! In-memory transport engine.
//!
//! [`MockCluster`] simulates a small broker cluster: topics with partition
//! logs, consumer groups with a join barrier and committed offsets, topic
//! configs, and the admin APIs. Each client connects through its own
//! [`MockTransport`], which runs one I/O thread answering requests into the
//! client's event queue, the way a real engine's broker threads would.
//!
//! Tests steer the cluster through fault injection ([`push_request_errors`],
//! [`inject_error`]), latency ([`set_response_latency`]) and group
//! manipulation ([`expire_member`], [`trigger_rebalance`]).
//!
//! ```
//! use kafkaesque_client::transport::mock::MockCluster;
//!
//! let cluster = MockCluster::new(3);
//! cluster.create_topic("orders", 4).unwrap();
//! assert_eq!(cluster.partition_count("orders"), Some(4));
//! assert_eq!(cluster.bootstrap_servers(), "mock-broker-0:9092,mock-broker-1:9093,mock-broker-2:9094");
//! ```
//!
//! [`push_request_errors`]: MockCluster::push_request_errors
//! [`inject_error`]: MockCluster::inject_error
//! [`set_response_latency`]: MockCluster::set_response_latency
//! [`expire_member`]: MockCluster::expire_member
//! [`trigger_rebalance`]: MockCluster::trigger_rebalance

mod group;
mod state;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use self::group::GroupPhase;
use self::state::{ClusterState, Outcome};
use crate::config::ClientConfig;
use crate::error::{Error, KafkaCode, Result};
use crate::event::{Event, EventSender};
use crate::message::Message;
use crate::transport::{ApiKey, ApiResponse, FetchRequestData, RecordData, Request, Transport};
use crate::types::{CorrelationId, GenerationId, Offset, TopicPartition};

/// Tick used while joins, fetches or delayed responses are parked.
const PARKED_TICK: Duration = Duration::from_millis(5);

/// Tick used when the connection is idle.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Bound for one attempt at pushing into a full event queue.
const EMIT_RETRY: Duration = Duration::from_millis(50);

pub(crate) enum Inbound {
    Request(Request),
    Inject(Event),
}

/// Shared handle to a simulated cluster. Clones refer to the same cluster.
#[derive(Clone)]
pub struct MockCluster {
    shared: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// A cluster with `brokers` brokers (at least one).
    pub fn new(brokers: i32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(ClusterState::new(brokers))),
        }
    }

    /// Comma-separated broker addresses, usable as `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        let brokers = self.shared.lock().brokers;
        (0..brokers)
            .map(|id| format!("mock-broker-{}:{}", id, 9092 + id))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// A transport handle for one client instance.
    pub fn connect(&self) -> MockTransport {
        MockTransport {
            shared: Arc::clone(&self.shared),
            connection: Mutex::new(None),
        }
    }

    pub fn set_auto_create_topics(&self, enabled: bool) {
        self.shared.lock().auto_create_topics = enabled;
    }

    /// Partition count for auto-created topics.
    pub fn set_default_partitions(&self, partitions: i32) {
        self.shared.lock().default_partitions = partitions.max(1);
    }

    /// Largest record the brokers accept.
    pub fn set_max_message_bytes(&self, bytes: usize) {
        self.shared.lock().max_message_bytes = bytes;
    }

    /// Make the group coordinator (un)reachable.
    pub fn set_coordinator_available(&self, available: bool) {
        self.shared.lock().coordinator_available = available;
    }

    pub fn create_topic(&self, name: &str, partitions: i32) -> Result<()> {
        match self.shared.lock().create_topic(name, partitions, 1) {
            KafkaCode::None => Ok(()),
            code => Err(Error::from_code(code)),
        }
    }

    /// Fail the next requests of `api` with `codes`, one code per request.
    pub fn push_request_errors(&self, api: ApiKey, codes: &[KafkaCode]) {
        self.shared
            .lock()
            .injected
            .entry(api)
            .or_default()
            .extend(codes.iter().copied());
    }

    /// Delay every response of `api`. A zero duration removes the delay.
    pub fn set_response_latency(&self, api: ApiKey, latency: Duration) {
        let mut state = self.shared.lock();
        if latency.is_zero() {
            state.latency.remove(&api);
        } else {
            state.latency.insert(api, latency);
        }
    }

    /// Deliver an engine error event to every connected client.
    pub fn inject_error(&self, code: KafkaCode, reason: &str, fatal: bool) {
        let mut state = self.shared.lock();
        state.connections.retain(|tx| {
            tx.send(Inbound::Inject(Event::Error {
                code,
                reason: reason.to_string(),
                fatal,
            }))
            .is_ok()
        });
    }

    /// Evict a member as if its session had timed out.
    pub fn expire_member(&self, group: &str, member_id: &str) -> bool {
        let mut state = self.shared.lock();
        let now = Instant::now();
        state
            .groups
            .get_mut(group)
            .is_some_and(|g| g.evict(member_id, now))
    }

    /// Force every member of `group` to rejoin.
    pub fn trigger_rebalance(&self, group: &str) {
        let mut state = self.shared.lock();
        if let Some(g) = state.groups.get_mut(group)
            && !g.members.is_empty()
        {
            g.start_rebalance(Instant::now());
        }
    }

    /// Append messages directly to a partition log; returns the base offset.
    pub fn append(&self, topic: &str, partition: i32, messages: Vec<Message>) -> Result<Offset> {
        let records = messages.into_iter().map(|m| RecordData {
            key: m.key,
            value: m.value,
            headers: m.headers,
            timestamp: m.timestamp,
        });
        self.shared
            .lock()
            .append(topic, partition, records)
            .map_err(Error::from_code)
    }

    /// Every record in a partition log, in offset order.
    pub fn messages(&self, topic: &str, partition: i32) -> Vec<Message> {
        self.shared
            .lock()
            .log(topic, partition)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    pub fn high_watermark(&self, topic: &str, partition: i32) -> Option<Offset> {
        self.shared
            .lock()
            .log(topic, partition)
            .map(|log| Offset::new(log.high_watermark()))
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.shared.lock().partition_count(topic)
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<Offset> {
        state::committed(&self.shared.lock(), group, &TopicPartition::new(topic, partition))
    }

    /// Member ids of a group, in id order.
    pub fn group_members(&self, group: &str) -> Vec<String> {
        self.shared
            .lock()
            .groups
            .get(group)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn group_generation(&self, group: &str) -> Option<GenerationId> {
        self.shared.lock().groups.get(group).map(|g| g.generation)
    }

    /// Whether `group` has formed a generation and is not rebalancing.
    pub fn group_is_stable(&self, group: &str) -> bool {
        self.shared
            .lock()
            .groups
            .get(group)
            .is_some_and(|g| g.phase == GroupPhase::Stable)
    }

    /// A topic config override, if one is set.
    pub fn topic_config(&self, topic: &str, key: &str) -> Option<String> {
        self.shared
            .lock()
            .topics
            .get(topic)
            .and_then(|t| t.configs.get(key).cloned())
    }
}

impl std::fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("MockCluster")
            .field("brokers", &state.brokers)
            .field("topics", &state.topics.len())
            .field("groups", &state.groups.len())
            .finish()
    }
}

struct Connection {
    inbound: Sender<Inbound>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// One client's connection to a [`MockCluster`].
pub struct MockTransport {
    shared: Arc<Mutex<ClusterState>>,
    connection: Mutex<Option<Connection>>,
}

impl Transport for MockTransport {
    fn open(&self, config: &ClientConfig, events: EventSender) -> Result<()> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(Error::InvalidState("transport already open".to_string()));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        self.shared.lock().connections.push(tx.clone());

        let io = IoLoop {
            shared: Arc::clone(&self.shared),
            inbound: rx,
            events,
            shutdown: Arc::clone(&shutdown),
            name: format!("{}#mock-{}", config.client_id, uuid::Uuid::new_v4().simple()),
            client_id: config.client_id.clone(),
            stats_interval: config.statistics_interval,
            parked_joins: Vec::new(),
            parked_fetches: Vec::new(),
            delayed: Vec::new(),
            tx: 0,
            rx: 0,
            started: Instant::now(),
        };
        let thread = thread::Builder::new()
            .name("mock-io".to_string())
            .spawn(move || io.run())
            .map_err(|e| Error::Transport(format!("Failed to spawn I/O thread: {}", e)))?;

        info!(client_id = %config.client_id, "Mock transport opened");
        *connection = Some(Connection {
            inbound: tx,
            shutdown,
            thread: Some(thread),
        });
        Ok(())
    }

    fn submit(&self, request: Request) -> Result<()> {
        let connection = self.connection.lock();
        let Some(conn) = connection.as_ref() else {
            return Err(Error::Transport("transport not open".to_string()));
        };
        conn.inbound
            .send(Inbound::Request(request))
            .map_err(|_| Error::Transport("I/O thread stopped".to_string()))
    }

    fn close(&self) {
        let Some(mut conn) = self.connection.lock().take() else {
            return;
        };
        conn.shutdown.store(true, Ordering::Release);
        self.shared
            .lock()
            .connections
            .retain(|tx| !tx.same_channel(&conn.inbound));
        drop(conn.inbound);
        if let Some(handle) = conn.thread.take()
            && handle.join().is_err()
        {
            warn!("Mock I/O thread panicked");
        }
        debug!("Mock transport closed");
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct ParkedJoin {
    correlation_id: CorrelationId,
    group: String,
    member: String,
}

struct ParkedFetch {
    correlation_id: CorrelationId,
    request: FetchRequestData,
    deadline: Instant,
}

struct IoLoop {
    shared: Arc<Mutex<ClusterState>>,
    inbound: Receiver<Inbound>,
    events: EventSender,
    shutdown: Arc<AtomicBool>,
    name: String,
    client_id: String,
    stats_interval: Duration,
    parked_joins: Vec<ParkedJoin>,
    parked_fetches: Vec<ParkedFetch>,
    delayed: Vec<(Instant, Event)>,
    tx: u64,
    rx: u64,
    started: Instant,
}

impl IoLoop {
    fn run(mut self) {
        let mut next_stats = (!self.stats_interval.is_zero()).then(|| Instant::now() + self.stats_interval);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let busy = !self.parked_joins.is_empty()
                || !self.parked_fetches.is_empty()
                || !self.delayed.is_empty();
            let mut wait = if busy { PARKED_TICK } else { IDLE_TICK };
            if let Some(at) = next_stats {
                wait = wait.min(at.saturating_duration_since(Instant::now()));
            }

            let alive = match self.inbound.recv_timeout(wait) {
                Ok(Inbound::Request(request)) => self.handle(request),
                Ok(Inbound::Inject(event)) => self.emit(event),
                Err(RecvTimeoutError::Timeout) => true,
                Err(RecvTimeoutError::Disconnected) => false,
            };
            if !alive || !self.service_parked() {
                break;
            }

            if let Some(at) = next_stats
                && Instant::now() >= at
            {
                if !self.emit(Event::Stats(self.statistics())) {
                    break;
                }
                next_stats = Some(Instant::now() + self.stats_interval);
            }
        }
        trace!(name = %self.name, "Mock I/O thread exiting");
    }

    fn handle(&mut self, request: Request) -> bool {
        self.tx += 1;
        let api = request.api.key();
        let now = Instant::now();
        let (outcome, latency) = {
            let mut state = self.shared.lock();
            let latency = state.latency.get(&api).copied();
            let outcome = match state.take_injected(api) {
                Some(code) => {
                    debug!(api = api.name(), code = ?code, "Injecting request error");
                    Outcome::Reply(Err(code))
                }
                None => state.handle(request.api, now),
            };
            (outcome, latency)
        };

        let correlation_id = request.correlation_id;
        match outcome {
            Outcome::Reply(body) => {
                let event = Event::Response {
                    correlation_id,
                    body,
                };
                match latency {
                    Some(delay) => {
                        self.delayed.push((now + delay, event));
                        true
                    }
                    None => self.respond(event),
                }
            }
            Outcome::ParkJoin { group, member } => {
                self.parked_joins.push(ParkedJoin {
                    correlation_id,
                    group,
                    member,
                });
                true
            }
            Outcome::ParkFetch { request, deadline } => {
                self.parked_fetches.push(ParkedFetch {
                    correlation_id,
                    request,
                    deadline,
                });
                true
            }
        }
    }

    /// Answer parked requests that became ready and flush due delayed ones.
    fn service_parked(&mut self) -> bool {
        let now = Instant::now();
        let mut ready = Vec::new();
        {
            let mut state = self.shared.lock();
            if !self.parked_joins.is_empty() {
                state.tick_groups(now);
                self.parked_joins.retain(|join| {
                    match state.join_result(&join.group, &join.member) {
                        Some(body) => {
                            ready.push(Event::Response {
                                correlation_id: join.correlation_id,
                                body,
                            });
                            false
                        }
                        None => true,
                    }
                });
            } else if !state.groups.is_empty() {
                state.tick_groups(now);
            }

            self.parked_fetches.retain(|fetch| {
                let (response, records) = state.fetch(&fetch.request);
                if records > 0 || now >= fetch.deadline {
                    ready.push(Event::Response {
                        correlation_id: fetch.correlation_id,
                        body: Ok(ApiResponse::Fetch(response)),
                    });
                    false
                } else {
                    true
                }
            });
        }

        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                ready.push(self.delayed.remove(i).1);
            } else {
                i += 1;
            }
        }

        ready.into_iter().all(|event| self.respond(event))
    }

    fn respond(&mut self, event: Event) -> bool {
        self.rx += 1;
        self.emit(event)
    }

    /// Push into the client's queue. Returns `false` once the client is gone.
    fn emit(&self, mut event: Event) -> bool {
        loop {
            match self.events.send_timeout(event, EMIT_RETRY) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        return false;
                    }
                    event = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    fn statistics(&self) -> String {
        let (broker_count, topic_count) = {
            let state = self.shared.lock();
            (state.brokers as usize, state.topics.len())
        };
        serde_json::json!({
            "name": self.name,
            "client_id": self.client_id,
            "type": "mock",
            "ts": self.started.elapsed().as_micros() as i64,
            "time": Utc::now().timestamp(),
            "replyq": (self.parked_joins.len() + self.parked_fetches.len() + self.delayed.len()) as i64,
            "tx": self.tx,
            "rx": self.rx,
            "broker_count": broker_count,
            "topic_count": topic_count,
        })
        .to_string()
    }
}
