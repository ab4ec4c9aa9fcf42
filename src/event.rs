//! Event queue bridge between the transport engine and the polling API.
//!
//! The engine's I/O side pushes [`Event`]s into a bounded channel through an
//! [`EventSender`]. Nothing drains that channel in the background: events are
//! only taken off it by an explicit [`EventQueue::poll`] (or by a blocking
//! client call that waits for one specific response), always on the calling
//! thread.
//!
//! # Routing
//!
//! Responses whose correlation id was registered with [`EventQueue::register`]
//! are routed straight into their reply slot by whichever thread happens to be
//! draining the queue. This is how synchronous requests (`committed`,
//! `fetch_metadata`, sync commits) and admin futures receive their answers.
//! Every other event belongs to the owning client core and is handed to the
//! dispatch function given to `poll`.
//!
//! A blocking wait that drains the queue while looking for its own response
//! defers everything else to a backlog. The next `poll` processes the backlog
//! first, so callbacks never fire outside `poll`, `flush` or `close` and event
//! order is preserved.
//!
//! # Concurrency
//!
//! One thread at a time may drain a queue. A second thread calling `poll`
//! gets [`Error::ConcurrentPoll`]; the owning thread may re-enter (a callback
//! issuing a synchronous commit, for example).

use std::collections::VecDeque;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, KafkaCode, Result};
use crate::metrics;
use crate::transport::ApiResponse;
use crate::types::{CorrelationId, Timeout};

/// Something the transport engine reports back to the client.
#[derive(Debug, Clone)]
pub enum Event {
    /// Reply to a submitted request. `Err` carries a request-level error code.
    Response {
        correlation_id: CorrelationId,
        body: std::result::Result<ApiResponse, KafkaCode>,
    },
    /// Error not tied to a particular request (broker down, auth failure).
    Error {
        code: KafkaCode,
        reason: String,
        fatal: bool,
    },
    /// Periodic engine statistics as a JSON document.
    Stats(String),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Response { .. } => "response",
            Event::Error { .. } => "error",
            Event::Stats(_) => "stats",
        }
    }
}

/// Engine-side handle for pushing events into a client's queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    /// Push an event, blocking while the queue is full.
    ///
    /// Fails once the receiving client is gone.
    pub fn send(&self, event: Event) -> Result<()> {
        self.inner
            .send(event)
            .map_err(|_| Error::Transport("event queue closed".to_string()))
    }

    /// Push an event, waiting at most `timeout` for room.
    ///
    /// The error hands the event back and tells a full queue from a closed one.
    pub fn send_timeout(
        &self,
        event: Event,
        timeout: Duration,
    ) -> std::result::Result<(), SendTimeoutError<Event>> {
        self.inner.send_timeout(event, timeout)
    }

    /// Push an event without blocking.
    pub fn try_send(&self, event: Event) -> std::result::Result<(), Event> {
        self.inner.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) | TrySendError::Disconnected(event) => event,
        })
    }
}

/// Reply channel for a registered request.
pub(crate) enum Reply {
    /// A thread blocked in a synchronous call.
    Blocking(Sender<Result<ApiResponse>>),
    /// An [`AdminFuture`](crate::admin::AdminFuture).
    Future(oneshot::Sender<Result<ApiResponse>>),
}

impl Reply {
    fn resolve(self, result: Result<ApiResponse>) {
        // A dropped receiver means the caller gave up; nothing to do.
        match self {
            Reply::Blocking(tx) => {
                let _ = tx.try_send(result);
            }
            Reply::Future(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

struct PendingReply {
    reply: Reply,
    deadline: Option<Instant>,
    operation: &'static str,
}

/// Bounded event channel plus reply routing for one client instance.
pub struct EventQueue {
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    pending: DashMap<CorrelationId, PendingReply>,
    backlog: Mutex<VecDeque<Event>>,
    owner: Mutex<Option<ThreadId>>,
}

/// Marks the current thread as the queue's drainer until dropped.
pub struct PollGuard<'a> {
    queue: &'a EventQueue,
    reentrant: bool,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        if !self.reentrant {
            *self.queue.owner.lock() = None;
        }
    }
}

impl EventQueue {
    /// Create a queue holding at most `capacity` undrained events.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            pending: DashMap::new(),
            backlog: Mutex::new(VecDeque::new()),
            owner: Mutex::new(None),
        }
    }

    /// Handle for the engine side.
    pub fn sender(&self) -> EventSender {
        EventSender {
            inner: self.sender.clone(),
        }
    }

    /// Events waiting to be drained, including deferred ones.
    pub fn len(&self) -> usize {
        self.receiver.len() + self.backlog.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of requests waiting for a routed reply.
    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }

    /// Claim the queue for the current thread.
    pub fn enter(&self) -> Result<PollGuard<'_>> {
        self.try_enter().ok_or(Error::ConcurrentPoll)
    }

    pub(crate) fn try_enter(&self) -> Option<PollGuard<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        match *owner {
            None => {
                *owner = Some(me);
                Some(PollGuard {
                    queue: self,
                    reentrant: false,
                })
            }
            Some(id) if id == me => Some(PollGuard {
                queue: self,
                reentrant: true,
            }),
            Some(_) => None,
        }
    }

    /// Route the response for `id` into `reply` instead of the dispatcher.
    ///
    /// Must be called before the request is submitted.
    pub(crate) fn register(
        &self,
        id: CorrelationId,
        reply: Reply,
        deadline: Option<Instant>,
        operation: &'static str,
    ) {
        self.pending.insert(
            id,
            PendingReply {
                reply,
                deadline,
                operation,
            },
        );
    }

    /// Forget a registration; a late response is then dispatched normally.
    pub(crate) fn unregister(&self, id: CorrelationId) {
        self.pending.remove(&id);
    }

    /// Resolve every expired registration with [`Error::Timeout`].
    pub(crate) fn expire(&self) {
        let now = Instant::now();
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline.is_some_and(|d| d <= now))
            .map(|entry| *entry.key())
            .collect();
        for id in expired {
            if let Some((_, pending)) = self.pending.remove(&id) {
                debug!(correlation_id = %id, operation = pending.operation, "Request timed out");
                pending.reply.resolve(Err(Error::Timeout));
            }
        }
    }

    /// Resolve every registration with `error` (used on close).
    pub(crate) fn cancel_all(&self, error: Error) {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.reply.resolve(Err(error.clone()));
            }
        }
    }

    /// Send a routed response to its slot, or hand the event back.
    fn route(&self, event: Event) -> Option<Event> {
        let &Event::Response { correlation_id, .. } = &event else {
            return Some(event);
        };
        let Some((_, pending)) = self.pending.remove(&correlation_id) else {
            return Some(event);
        };
        let Event::Response { body, .. } = event else {
            return None;
        };
        trace!(correlation_id = %correlation_id, operation = pending.operation, "Routing response");
        pending.reply.resolve(body.map_err(Error::from_code));
        None
    }

    fn next_event(&self, wait: Option<Duration>) -> Option<Event> {
        if let Some(event) = self.backlog.lock().pop_front() {
            return Some(event);
        }
        match wait {
            None => self.receiver.recv().ok(),
            Some(d) if d.is_zero() => self.receiver.try_recv().ok(),
            Some(d) => match self.receiver.recv_timeout(d) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    /// Drain events, dispatching those not routed to a reply slot.
    ///
    /// Waits up to `timeout` for the first event, then drains whatever else is
    /// already queued without blocking. Returns the number of events
    /// processed.
    pub fn poll<F>(&self, timeout: Timeout, mut dispatch: F) -> Result<usize>
    where
        F: FnMut(Event),
    {
        let _guard = self.enter()?;
        self.expire();

        let first_wait = match timeout {
            Timeout::Never => None,
            Timeout::After(d) => Some(d),
        };
        let Some(first) = self.next_event(first_wait) else {
            return Ok(0);
        };

        // Bound the drain so a busy engine cannot keep one poll spinning.
        let budget = self.len() + 1;
        let mut count = 0;
        let mut next = Some(first);
        while let Some(event) = next {
            count += 1;
            metrics::record_event(event.kind());
            if let Some(event) = self.route(event) {
                dispatch(event);
            }
            if count >= budget {
                break;
            }
            next = self.next_event(Some(Duration::ZERO));
        }
        self.expire();
        Ok(count)
    }

    /// Drain while waiting on a routed reply; foreign events go to the backlog.
    ///
    /// The caller must hold the poll guard.
    pub(crate) fn pump(&self, wait: Duration) -> usize {
        self.expire();
        let mut count = 0;
        let mut next = match self.receiver.recv_timeout(wait) {
            Ok(event) => Some(event),
            Err(_) => None,
        };
        while let Some(event) = next {
            count += 1;
            if let Some(event) = self.route(event) {
                self.backlog.lock().push_back(event);
            }
            next = self.receiver.try_recv().ok();
        }
        self.expire();
        count
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("queued", &self.receiver.len())
            .field("backlog", &self.backlog.lock().len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
