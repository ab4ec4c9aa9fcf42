//! Consumer core.
//!
//! A [`Consumer`] either subscribes to topics and lets the group coordinator
//! hand out partitions, or is given partitions directly with
//! [`Consumer::assign`]. Everything, including group membership, is driven
//! from [`Consumer::poll`]: each call sends joins, heartbeats, offset lookups,
//! fetches and auto-commits that are due, drains the event queue, runs
//! rebalance and commit callbacks, and returns at most one record.
//!
//! # Rebalancing
//!
//! Membership follows the eager protocol. When the coordinator starts a new
//! generation the current assignment is revoked (`on_revoke` runs while it
//! is still in place), the member rejoins, and `on_assign` runs with the new
//! assignment before any record from it is returned. A member that is evicted
//! or whose session times out reports its partitions to `on_lost` and stays
//! [`MembershipState::Lost`] until `subscribe` is called again.
//!
//! ```no_run
//! use std::time::Duration;
//! use kafkaesque_client::config::ClientConfig;
//! use kafkaesque_client::consumer::{CommitMode, Consumer};
//! use kafkaesque_client::transport::mock::MockCluster;
//!
//! let cluster = MockCluster::new(1);
//! cluster.create_topic("events", 2).unwrap();
//! let mut config = ClientConfig::new();
//! config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
//! config.set("group.id", "readers").unwrap();
//!
//! let consumer = Consumer::new(config, cluster.connect()).unwrap();
//! consumer.subscribe(&["events"]).unwrap();
//! while let Some(message) = consumer.poll(Duration::from_secs(1)).unwrap() {
//!     println!("{:?}@{:?}", message.partition, message.offset);
//!     consumer.commit(None, CommitMode::Async).unwrap();
//! }
//! ```

mod state;

pub use state::{CommitMode, MembershipState};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::client::ClientCore;
use crate::config::ClientConfig;
use crate::constants::{DEFAULT_FETCH_MAX_RECORDS, MAX_POLL_TICK_MS};
use crate::context::{ConsumerContext, DefaultContext};
use crate::error::{Error, KafkaCode, Result};
use crate::event::Event;
use crate::message::Message;
use crate::metadata::MetadataSnapshot;
use crate::metrics;
use crate::retry::{Backoff, RetryPolicy};
use crate::transport::{
    ApiRequest, ApiResponse, FetchPartitionData, FetchRequestData, HeartbeatRequestData,
    JoinGroupRequestData, LeaveGroupRequestData, ListOffsetsRequestData, OffsetCommitRequestData,
    OffsetFetchRequestData, Transport,
};
use crate::types::{CorrelationId, GenerationId, Offset, Timeout, TopicPartition, remaining};

use state::{Action, AssignmentMode, ConsumerState, InFlightFetch, Subscription, reset_offset};

/// Pull-based consumer.
pub struct Consumer<C: ConsumerContext = DefaultContext> {
    core: Arc<ClientCore>,
    context: C,
    state: Mutex<ConsumerState>,
    closing: AtomicBool,
    closed: AtomicBool,
}

impl Consumer<DefaultContext> {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_context(config, transport, DefaultContext)
    }
}

impl<C: ConsumerContext> Consumer<C> {
    pub fn with_context(config: ClientConfig, transport: impl Transport + 'static, context: C) -> Result<Self> {
        if let Some(group_id) = &config.group_id {
            crate::validation::validate_group_id(group_id)?;
        }
        let fetch = RetryPolicy::fetch(&config);
        let state = ConsumerState::new(RetryPolicy::coordinator().start(), fetch.start(), fetch.start());
        let core = ClientCore::new(config, Box::new(transport))?;
        Ok(Self {
            core: Arc::new(core),
            context,
            state: Mutex::new(state),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Destroyed);
        }
        self.core.ensure_open()
    }

    fn group_id(&self) -> Result<&str> {
        self.core
            .config
            .group_id
            .as_deref()
            .ok_or_else(|| Error::Config("group.id is not set".to_string()))
    }

    /// Subscribe to topics. Entries starting with `^` are regular
    /// expressions matched against the cluster's topic names.
    ///
    /// Replaces any previous subscription; the group is (re)joined from the
    /// next `poll`.
    pub fn subscribe(&self, topics: &[&str]) -> Result<()> {
        self.ensure_open()?;
        self.group_id()?;
        let subscription = Subscription::new(topics)?;
        let mut state = self.state.lock();
        if state.mode == AssignmentMode::Manual {
            return Err(Error::InvalidState(
                "partitions are assigned manually; call unassign first".to_string(),
            ));
        }
        match state.membership {
            MembershipState::Unjoined | MembershipState::Lost => {
                if !state.revoking {
                    state.clear_assignment();
                }
                state.reset_membership();
                state.membership = MembershipState::Joining;
                state.need_join = true;
            }
            // A changed topic list is picked up once the current join settles.
            MembershipState::Joining | MembershipState::Rebalancing | MembershipState::Stable => {}
        }
        info!(topics = ?subscription.entries, "Subscribed");
        state.subscription = Some(subscription);
        state.mode = AssignmentMode::Subscribed;
        Ok(())
    }

    /// Leave the group. `on_revoke` runs before this returns.
    pub fn unsubscribe(&self) -> Result<()> {
        self.ensure_open()?;
        self.leave_group(false);
        Ok(())
    }

    fn leave_group(&self, wait: bool) {
        let (partitions, lost, member_id) = {
            let mut state = self.state.lock();
            if state.mode != AssignmentMode::Subscribed {
                return;
            }
            let mut lost = false;
            state.actions.retain(|a| match a {
                Action::Lost(_) => {
                    lost = true;
                    false
                }
                Action::Assign(_) | Action::Revoke(_) => false,
                _ => true,
            });
            let partitions = if state.assign_pending {
                Vec::new()
            } else {
                state.assigned()
            };
            state.revoking = true;
            (partitions, lost, state.member_id.clone())
        };

        if !partitions.is_empty() {
            if lost {
                self.context.on_lost(self, &partitions);
            } else {
                self.context.on_revoke(self, &partitions);
                self.auto_commit_sync();
            }
        }

        {
            let mut state = self.state.lock();
            state.clear_assignment();
            state.reset_membership();
            state.membership = MembershipState::Unjoined;
            state.subscription = None;
            state.mode = AssignmentMode::None;
            state.joined_topics.clear();
        }

        let (Some(member_id), Ok(group_id)) = (member_id, self.group_id()) else {
            return;
        };
        let request = ApiRequest::LeaveGroup(LeaveGroupRequestData {
            group_id: group_id.to_string(),
            member_id,
        });
        let result = if wait {
            let timeout = self.core.config.request_timeout.min(self.core.config.session_timeout);
            self.core.request(request, timeout, "leave_group").map(|_| ())
        } else {
            self.core.send(request).map(|_| ())
        };
        match result {
            Ok(()) => info!(group_id, "Left group"),
            Err(e) => debug!(group_id, error = %e, "Leave group failed"),
        }
    }

    /// Replace the assignment with an explicit partition list.
    ///
    /// A partition's offset, when set, is where consumption starts; otherwise
    /// the committed offset (or `auto.offset.reset`) is used. No rebalance
    /// callbacks run for manual assignments.
    pub fn assign(&self, partitions: &[TopicPartition]) -> Result<()> {
        self.ensure_open()?;
        if let Some(snapshot) = self.core.metadata.snapshot() {
            for tp in partitions {
                if let Some(count) = snapshot.partition_count(&tp.topic)
                    && (tp.partition < 0 || tp.partition >= count)
                {
                    return Err(Error::UnknownPartition {
                        topic: tp.topic.clone(),
                        partition: tp.partition,
                    });
                }
            }
        }
        let mut state = self.state.lock();
        if state.mode == AssignmentMode::Subscribed {
            return Err(Error::InvalidState(
                "consumer is subscribed; call unsubscribe first".to_string(),
            ));
        }
        state.install(partitions);
        state.mode = if partitions.is_empty() {
            AssignmentMode::None
        } else {
            AssignmentMode::Manual
        };
        debug!(count = partitions.len(), "Partitions assigned manually");
        Ok(())
    }

    /// Drop a manual assignment.
    pub fn unassign(&self) -> Result<()> {
        self.assign(&[])
    }

    /// Partitions currently owned.
    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.state.lock().assigned()
    }

    /// Subscribed topics and patterns, as given to `subscribe`.
    pub fn subscription(&self) -> Vec<String> {
        self.state
            .lock()
            .subscription
            .as_ref()
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    pub fn membership_state(&self) -> MembershipState {
        self.state.lock().membership
    }

    /// Next position of every assigned partition. The offset is `None` until
    /// the start offset is known.
    pub fn position(&self) -> Vec<TopicPartition> {
        self.state
            .lock()
            .assignment
            .iter()
            .map(|(tp, ps)| TopicPartition {
                offset: ps.position,
                ..tp.clone()
            })
            .collect()
    }

    /// Move an assigned partition to `offset`; buffered records are dropped.
    pub fn seek(&self, topic: &str, partition: i32, offset: Offset) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().partition_mut(topic, partition)?.seek(offset);
        debug!(topic, partition, offset = %offset, "Seek");
        Ok(())
    }

    /// Stop fetching from and returning records of `partitions`.
    pub fn pause(&self, partitions: &[TopicPartition]) -> Result<()> {
        self.set_paused(partitions, true)
    }

    pub fn resume(&self, partitions: &[TopicPartition]) -> Result<()> {
        self.set_paused(partitions, false)
    }

    fn set_paused(&self, partitions: &[TopicPartition], paused: bool) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check_assigned(partitions)?;
        for tp in partitions {
            if let Some(ps) = state.assignment.get_mut(tp) {
                ps.paused = paused;
            }
        }
        Ok(())
    }

    /// Return the next record, waiting up to `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time. Errors are fatal client
    /// errors, partition errors that need the application's attention
    /// (`auto.offset.reset=error`), or [`Error::Destroyed`].
    pub fn poll(&self, timeout: impl Into<Timeout>) -> Result<Option<Message>> {
        self.ensure_open()?;
        let deadline = timeout.into().deadline();
        let _guard = self.core.queue.enter()?;
        let tick = Duration::from_millis(MAX_POLL_TICK_MS);
        let mut wait = Duration::ZERO;
        loop {
            self.maintain();
            self.core
                .queue
                .poll(Timeout::After(wait), |event| self.handle_event(event))?;
            self.dispatch_actions();

            if let Some(error) = self.state.lock().errors.pop_front() {
                return Err(error);
            }
            if let Some(fatal) = self.core.fatal_error() {
                return Err(fatal);
            }
            self.ensure_open()?;
            if let Some(message) = self.take_record() {
                return Ok(Some(message));
            }
            let left = remaining(deadline);
            if left.is_some_and(|d| d.is_zero()) {
                return Ok(None);
            }
            wait = left.unwrap_or(tick).min(tick);
        }
    }

    fn take_record(&self) -> Option<Message> {
        let message = self.state.lock().next_record()?;
        metrics::record_consumed(&message.topic);
        trace!(topic = %message.topic, partition = ?message.partition, offset = ?message.offset, "Returning record");
        Some(message)
    }

    /// Commit offsets: the consumed position of every assigned partition
    /// (`None`) or an explicit list.
    pub fn commit(&self, offsets: Option<&[TopicPartition]>, mode: CommitMode) -> Result<()> {
        self.ensure_open()?;
        let group_id = self.group_id()?.to_string();
        let (offsets, generation_id, member_id) = {
            let state = self.state.lock();
            let offsets = match offsets {
                None => state.positions(),
                Some(list) => {
                    state.check_assigned(list)?;
                    if let Some(tp) = list.iter().find(|tp| !tp.offset.is_some_and(Offset::is_valid)) {
                        return Err(Error::InvalidState(format!(
                            "no offset to commit for {}/{}",
                            tp.topic, tp.partition
                        )));
                    }
                    list.to_vec()
                }
            };
            let (generation, member) = match state.mode {
                AssignmentMode::Subscribed => {
                    (state.generation, state.member_id.clone().unwrap_or_default())
                }
                _ => (GenerationId::INVALID, String::new()),
            };
            (offsets, generation, member)
        };
        if offsets.is_empty() {
            return Ok(());
        }

        let request = ApiRequest::OffsetCommit(OffsetCommitRequestData {
            group_id,
            generation_id,
            member_id,
            offsets: offsets.clone(),
        });
        match mode {
            CommitMode::Sync => {
                let result = commit_result(self.core.request(
                    request,
                    self.core.config.request_timeout,
                    "offset_commit",
                ));
                metrics::record_commit("sync", result.is_ok());
                match &result {
                    Ok(()) => self.state.lock().mark_committed(&offsets),
                    Err(e) => warn!(error = %e, "Synchronous commit failed"),
                }
                result
            }
            CommitMode::Async => {
                let id = self.core.send(request)?;
                let deadline = Instant::now() + self.core.config.request_timeout;
                self.state.lock().async_commits.insert(id, (offsets, deadline));
                Ok(())
            }
        }
    }

    /// Commit positions that moved, when auto-commit is on. Failures are
    /// only logged.
    fn auto_commit_sync(&self) {
        if !self.core.config.enable_auto_commit || self.core.config.group_id.is_none() {
            return;
        }
        let offsets = self.state.lock().uncommitted_positions();
        if offsets.is_empty() {
            return;
        }
        if let Err(e) = self.commit(Some(&offsets), CommitMode::Sync) {
            debug!(error = %e, "Auto-commit before revoke failed");
        }
    }

    /// Committed offsets of `partitions`, or of the whole assignment.
    /// A partition without a committed offset comes back with `None`.
    pub fn committed(&self, partitions: Option<&[TopicPartition]>, timeout: Duration) -> Result<Vec<TopicPartition>> {
        self.ensure_open()?;
        let group_id = self.group_id()?.to_string();
        let partitions = match partitions {
            Some(list) => list.to_vec(),
            None => self.assignment(),
        };
        let request = ApiRequest::OffsetFetch(OffsetFetchRequestData {
            group_id,
            partitions,
        });
        match self.core.request(request, timeout, "offset_fetch")? {
            ApiResponse::OffsetFetch(r) if r.error_code.is_ok() => Ok(r
                .partitions
                .into_iter()
                .map(|tp| TopicPartition {
                    offset: tp.offset.filter(|o| o.is_valid()),
                    ..tp
                })
                .collect()),
            ApiResponse::OffsetFetch(r) => Err(Error::from_code(r.error_code)),
            _ => Err(unexpected("offset_fetch")),
        }
    }

    /// Low and high watermark of a partition, straight from the broker.
    pub fn fetch_watermarks(&self, topic: &str, partition: i32, timeout: Duration) -> Result<(Offset, Offset)> {
        self.ensure_open()?;
        let request = ApiRequest::ListOffsets(ListOffsetsRequestData {
            partitions: vec![TopicPartition::new(topic, partition)],
        });
        let ApiResponse::ListOffsets(r) = self.core.request(request, timeout, "list_offsets")? else {
            return Err(unexpected("list_offsets"));
        };
        let p = r
            .partitions
            .into_iter()
            .find(|p| p.topic == topic && p.partition == partition)
            .ok_or_else(|| unexpected("list_offsets"))?;
        if !p.error_code.is_ok() {
            return Err(Error::Partition {
                topic: p.topic,
                partition: p.partition,
                code: p.error_code,
            });
        }
        Ok((p.log_start_offset, p.high_watermark))
    }

    /// Fetch metadata for one topic, or all topics, and refresh the cache.
    pub fn fetch_metadata(&self, topic: Option<&str>, timeout: Duration) -> Result<Arc<MetadataSnapshot>> {
        self.ensure_open()?;
        let topics = topic.map(|t| vec![t.to_string()]);
        self.core.fetch_metadata(topics.as_deref(), timeout)
    }

    /// Leave the group, fail outstanding async commits with
    /// [`Error::Destroyed`] and close the transport.
    ///
    /// `on_revoke` and pending commit callbacks run before this returns.
    pub fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let subscribed = self.state.lock().mode == AssignmentMode::Subscribed;
        if subscribed {
            self.leave_group(true);
        } else {
            self.auto_commit_sync();
        }
        {
            let mut state = self.state.lock();
            let pending: Vec<_> = state.async_commits.drain().collect();
            for (_, (offsets, _)) in pending {
                state.actions.push_back(Action::Commit(Err(Error::Destroyed), offsets));
            }
        }
        {
            let _guard = self.core.queue.try_enter();
            self.dispatch_actions();
        }
        self.closed.store(true, Ordering::Release);
        self.core.close();
        info!(client_id = %self.core.config.client_id, "Consumer closed");
        Ok(())
    }

    /// Send whatever group, offset, fetch and commit requests are due.
    fn maintain(&self) {
        if self.core.is_closed() {
            return;
        }
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.mode == AssignmentMode::Subscribed {
            self.maintain_group(state, now);
        }
        self.resolve_offsets(state, now);
        self.send_fetch(state, now);
        self.auto_commit(state, now);
        expire_commits(state, now);
    }

    fn maintain_group(&self, state: &mut ConsumerState, now: Instant) {
        let config = &self.core.config;
        let Ok(group_id) = self.group_id() else {
            return;
        };
        let Some(subscription) = state.subscription.clone() else {
            return;
        };

        if subscription.has_patterns() {
            if state.metadata.is_some_and(|(_, d)| now >= d) {
                state.metadata = None;
            }
            if state.metadata.is_none() && !self.core.metadata.is_fresh() {
                match self.core.send(ClientCore::metadata_request(None, false)) {
                    Ok(id) => state.metadata = Some((id, now + config.request_timeout)),
                    Err(e) => warn!(error = %e, "Failed to request metadata"),
                }
            }
        }
        let snapshot = self.core.metadata.snapshot();

        if state.membership == MembershipState::Stable
            && !state.revoking
            && now.duration_since(state.last_heartbeat_ok) > config.session_timeout
        {
            warn!(group_id, "Session timed out");
            state.lose();
            return;
        }

        if state.join.is_some_and(|(_, d)| now >= d) {
            warn!(group_id, "Join group timed out");
            state.join = None;
            rejoin_later(&mut state.join_backoff);
        }
        let can_resolve = !subscription.has_patterns() || snapshot.is_some();
        if state.need_join && state.join.is_none() && !state.revoking && state.join_backoff.ready() && can_resolve
        {
            let topics = subscription.resolve(snapshot.as_deref());
            let request = ApiRequest::JoinGroup(JoinGroupRequestData {
                group_id: group_id.to_string(),
                member_id: state.member_id.clone(),
                client_id: config.client_id.clone(),
                session_timeout: config.session_timeout,
                topics: topics.clone(),
            });
            match self.core.send(request) {
                Ok(id) => {
                    debug!(group_id, topics = ?topics, "Joining group");
                    state.join = Some((id, now + config.session_timeout + config.request_timeout));
                    state.joined_topics = topics;
                }
                Err(e) => warn!(group_id, error = %e, "Failed to send join"),
            }
        }

        if state.membership != MembershipState::Stable || state.revoking {
            return;
        }
        if state.heartbeat.is_some_and(|(_, d)| now >= d) {
            state.heartbeat = None;
        }
        if state.heartbeat.is_none() && now >= state.next_heartbeat {
            let request = ApiRequest::Heartbeat(HeartbeatRequestData {
                group_id: group_id.to_string(),
                member_id: state.member_id.clone().unwrap_or_default(),
                generation_id: state.generation,
            });
            match self.core.send(request) {
                Ok(id) => state.heartbeat = Some((id, now + config.request_timeout)),
                Err(e) => warn!(group_id, error = %e, "Failed to send heartbeat"),
            }
            state.next_heartbeat = now + config.heartbeat_interval;
        }

        if state.join.is_none() && state.active() {
            let wanted = subscription.resolve(snapshot.as_deref());
            if wanted != state.joined_topics {
                info!(group_id, topics = ?wanted, "Subscription changed, rejoining");
                state.begin_rebalance();
            }
        }
    }

    /// Find start offsets for partitions that have none.
    fn resolve_offsets(&self, state: &mut ConsumerState, now: Instant) {
        if state.offset_fetch.is_some_and(|(_, d)| now >= d) {
            state.offset_fetch = None;
            state.offset_fetch_backoff.fail();
        }
        if !state.active() || state.offset_fetch.is_some() || !state.offset_fetch_backoff.ready() {
            return;
        }
        let unresolved = state.unresolved();
        if unresolved.is_empty() {
            return;
        }
        let Ok(group_id) = self.group_id() else {
            for tp in unresolved {
                self.apply_reset(state, &tp);
            }
            return;
        };
        let request = ApiRequest::OffsetFetch(OffsetFetchRequestData {
            group_id: group_id.to_string(),
            partitions: unresolved,
        });
        match self.core.send(request) {
            Ok(id) => state.offset_fetch = Some((id, now + self.core.config.request_timeout)),
            Err(e) => warn!(error = %e, "Failed to fetch committed offsets"),
        }
    }

    /// Apply `auto.offset.reset` to a partition with no usable offset.
    fn apply_reset(&self, state: &mut ConsumerState, tp: &TopicPartition) {
        let policy = self.core.config.auto_offset_reset;
        let Some(ps) = state.assignment.get_mut(tp) else {
            return;
        };
        match reset_offset(policy) {
            Some(offset) => {
                debug!(topic = %tp.topic, partition = tp.partition, offset = %offset, "Resetting offset");
                ps.seek(offset);
            }
            None => {
                ps.errored = true;
                ps.records.clear();
                state.errors.push_back(Error::Partition {
                    topic: tp.topic.clone(),
                    partition: tp.partition,
                    code: KafkaCode::OffsetOutOfRange,
                });
            }
        }
    }

    fn send_fetch(&self, state: &mut ConsumerState, now: Instant) {
        let config = &self.core.config;
        if state.fetch.as_ref().is_some_and(|f| now >= f.deadline) {
            debug!("Fetch timed out");
            state.fetch = None;
            state.fetch_backoff.fail();
        }
        if state.fetch.is_some() || !state.fetch_backoff.ready() {
            return;
        }
        let targets = state.fetch_targets(config.queued_min_messages);
        if targets.is_empty() {
            return;
        }
        let request = ApiRequest::Fetch(FetchRequestData {
            max_wait: config.fetch_wait_max,
            max_records: DEFAULT_FETCH_MAX_RECORDS,
            partitions: targets
                .iter()
                .map(|(tp, offset)| FetchPartitionData {
                    topic: tp.topic.clone(),
                    partition: tp.partition,
                    fetch_offset: *offset,
                })
                .collect(),
        });
        match self.core.send(request) {
            Ok(correlation_id) => {
                state.fetch = Some(InFlightFetch {
                    correlation_id,
                    deadline: now + config.fetch_wait_max + config.request_timeout,
                    sent: targets.into_iter().collect::<HashMap<_, _>>(),
                });
            }
            Err(e) => warn!(error = %e, "Failed to send fetch"),
        }
    }

    fn auto_commit(&self, state: &mut ConsumerState, now: Instant) {
        let config = &self.core.config;
        if !config.enable_auto_commit || now < state.next_auto_commit {
            return;
        }
        let Ok(group_id) = self.group_id() else {
            return;
        };
        let usable = match state.mode {
            AssignmentMode::Subscribed => state.membership == MembershipState::Stable && state.active(),
            AssignmentMode::Manual => true,
            AssignmentMode::None => false,
        };
        if !usable {
            return;
        }
        state.next_auto_commit = now + config.auto_commit_interval;
        let offsets = state.uncommitted_positions();
        if offsets.is_empty() {
            return;
        }
        let (generation_id, member_id) = match state.mode {
            AssignmentMode::Subscribed => (state.generation, state.member_id.clone().unwrap_or_default()),
            _ => (GenerationId::INVALID, String::new()),
        };
        let request = ApiRequest::OffsetCommit(OffsetCommitRequestData {
            group_id: group_id.to_string(),
            generation_id,
            member_id,
            offsets: offsets.clone(),
        });
        match self.core.send(request) {
            Ok(id) => {
                trace!(count = offsets.len(), "Auto-committing");
                state.async_commits.insert(id, (offsets, now + config.request_timeout));
            }
            Err(e) => warn!(error = %e, "Auto-commit failed to send"),
        }
    }

    fn handle_event(&self, event: Event) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match event {
            Event::Response {
                correlation_id,
                body,
            } => {
                let is_reply = |slot: Option<(CorrelationId, Instant)>| slot.is_some_and(|(id, _)| id == correlation_id);
                if is_reply(state.join) {
                    state.join = None;
                    self.handle_join(state, body);
                } else if is_reply(state.heartbeat) {
                    state.heartbeat = None;
                    self.handle_heartbeat(state, body);
                } else if state.fetch.as_ref().is_some_and(|f| f.correlation_id == correlation_id) {
                    if let Some(fetch) = state.fetch.take() {
                        self.handle_fetch(state, fetch, body);
                    }
                } else if is_reply(state.offset_fetch) {
                    state.offset_fetch = None;
                    self.handle_offset_fetch(state, body);
                } else if is_reply(state.metadata) {
                    state.metadata = None;
                    let _ = self.core.apply_metadata(body.map_err(Error::from_code), false);
                } else if let Some((offsets, _)) = state.async_commits.remove(&correlation_id) {
                    let result = commit_result(body.map_err(Error::from_code));
                    metrics::record_commit("async", result.is_ok());
                    if result.is_ok() {
                        state.mark_committed(&offsets);
                    }
                    state.actions.push_back(Action::Commit(result, offsets));
                } else {
                    trace!(correlation_id = %correlation_id, "Ignoring late response");
                }
            }
            Event::Error { code, reason, fatal } => {
                let error = self.core.engine_error(code, &reason, fatal);
                if error.is_fatal() && state.mode == AssignmentMode::Subscribed {
                    state.lose();
                }
                state.actions.push_back(Action::Error(error, reason));
            }
            Event::Stats(json) => state.actions.push_back(Action::Stats(json)),
        }
    }

    fn handle_join(&self, state: &mut ConsumerState, body: std::result::Result<ApiResponse, KafkaCode>) {
        if state.mode != AssignmentMode::Subscribed {
            return;
        }
        let result = match body {
            Ok(ApiResponse::JoinGroup(r)) if r.error_code.is_ok() => Ok(r),
            Ok(ApiResponse::JoinGroup(r)) => Err(r.error_code),
            Ok(_) => Err(KafkaCode::Unknown),
            Err(code) => Err(code),
        };
        let now = Instant::now();
        match result {
            Ok(r) => {
                info!(
                    member_id = %r.member_id,
                    generation = %r.generation_id,
                    partitions = r.assignment.len(),
                    "Joined group"
                );
                state.join_backoff.reset();
                state.member_id = Some(r.member_id);
                state.generation = r.generation_id;
                state.membership = MembershipState::Stable;
                state.need_join = false;
                state.last_heartbeat_ok = now;
                state.next_heartbeat = now + self.core.config.heartbeat_interval;
                state.install(&r.assignment);
                state.assign_pending = true;
                metrics::record_rebalance("assign");
                state.actions.push_back(Action::Assign(r.assignment));
            }
            Err(KafkaCode::UnknownMemberId) => {
                debug!("Member id unknown to coordinator, rejoining fresh");
                state.member_id = None;
                rejoin_later(&mut state.join_backoff);
            }
            Err(code)
                if code.is_retriable()
                    || matches!(code, KafkaCode::RebalanceInProgress | KafkaCode::IllegalGeneration) =>
            {
                debug!(code = ?code, "Join failed, retrying");
                rejoin_later(&mut state.join_backoff);
            }
            Err(code) => {
                let error = Error::from_code(code);
                warn!(error = %error, "Join group failed");
                state.lose();
                state.actions.push_back(Action::Error(error, "join group failed".to_string()));
            }
        }
    }

    fn handle_heartbeat(&self, state: &mut ConsumerState, body: std::result::Result<ApiResponse, KafkaCode>) {
        if state.membership != MembershipState::Stable || state.revoking {
            return;
        }
        let code = match body {
            Ok(ApiResponse::Heartbeat(r)) => r.error_code,
            Ok(_) => KafkaCode::Unknown,
            Err(code) => code,
        };
        match code {
            KafkaCode::None => state.last_heartbeat_ok = Instant::now(),
            KafkaCode::RebalanceInProgress | KafkaCode::IllegalGeneration => {
                info!(code = ?code, "Group is rebalancing");
                state.begin_rebalance();
            }
            KafkaCode::UnknownMemberId => {
                warn!("Member was evicted from the group");
                state.lose();
            }
            code if code.is_fatal() => self.fail_fatal(state, code, "heartbeat failed"),
            code => {
                warn!(code = ?code, "Heartbeat failed, rejoining");
                state.begin_rebalance();
            }
        }
    }

    /// Surface an authorization or fatal code. A group member gives up its
    /// membership; retrying the same request would fail the same way.
    fn fail_fatal(&self, state: &mut ConsumerState, code: KafkaCode, reason: &str) {
        let error = Error::from_code(code);
        warn!(error = %error, reason, "Consumer request failed");
        if state.mode == AssignmentMode::Subscribed {
            state.lose();
        }
        state.actions.push_back(Action::Error(error, reason.to_string()));
    }

    fn handle_offset_fetch(&self, state: &mut ConsumerState, body: std::result::Result<ApiResponse, KafkaCode>) {
        let failed = |state: &mut ConsumerState, code: KafkaCode| {
            if code.is_fatal() {
                return self.fail_fatal(state, code, "committed offset lookup failed");
            }
            debug!(code = ?code, "Committed offset lookup failed");
            state.offset_fetch_backoff.fail();
        };
        let partitions = match body {
            Ok(ApiResponse::OffsetFetch(r)) if r.error_code.is_ok() => r.partitions,
            Ok(ApiResponse::OffsetFetch(r)) => return failed(state, r.error_code),
            Ok(_) => return failed(state, KafkaCode::Unknown),
            Err(code) => return failed(state, code),
        };
        state.offset_fetch_backoff.reset();
        for tp in partitions {
            let Some(ps) = state.assignment.get_mut(&tp) else {
                continue;
            };
            // Repositioned while the lookup was in flight.
            if ps.fetch_offset.is_some() || ps.errored {
                continue;
            }
            match tp.offset.filter(|o| o.is_valid()) {
                Some(committed) => {
                    ps.seek(committed);
                    ps.committed = Some(committed);
                }
                None => self.apply_reset(state, &tp),
            }
        }
    }

    fn handle_fetch(
        &self,
        state: &mut ConsumerState,
        fetch: InFlightFetch,
        body: std::result::Result<ApiResponse, KafkaCode>,
    ) {
        let response = match body {
            Ok(ApiResponse::Fetch(r)) => r,
            other => {
                let code = match other {
                    Ok(_) => KafkaCode::Unknown,
                    Err(code) => code,
                };
                if code.is_fatal() {
                    return self.fail_fatal(state, code, "fetch failed");
                }
                if code.invalidates_metadata() {
                    self.core.metadata.mark_stale();
                }
                state.fetch_backoff.fail();
                return;
            }
        };

        let mut retry = false;
        let mut fatal = None;
        for p in response.partitions {
            let key = TopicPartition::new(p.topic.clone(), p.partition);
            let Some(sent) = fetch.sent.get(&key).copied() else {
                continue;
            };
            let Some(ps) = state.assignment.get_mut(&key) else {
                continue;
            };
            if ps.fetch_offset != Some(sent) {
                continue;
            }
            match p.error_code {
                KafkaCode::None => {
                    ps.high_watermark = Some(p.high_watermark);
                    if ps.position.is_none_or(Offset::is_special) {
                        ps.position = Some(p.fetch_offset);
                    }
                    let mut next = p.fetch_offset;
                    for record in p.records {
                        if let Some(offset) = record.offset {
                            if offset < next {
                                continue;
                            }
                            next = offset.next();
                        }
                        ps.records.push_back(record);
                    }
                    ps.fetch_offset = Some(next);
                }
                KafkaCode::OffsetOutOfRange => {
                    warn!(topic = %p.topic, partition = p.partition, offset = %sent, "Offset out of range");
                    self.apply_reset(state, &key);
                }
                code if code.is_retriable() || code == KafkaCode::UnknownTopicOrPartition => {
                    if code.invalidates_metadata() || code == KafkaCode::UnknownTopicOrPartition {
                        self.core.metadata.mark_stale();
                    }
                    metrics::record_retry("fetch");
                    retry = true;
                }
                code if code.is_fatal() => {
                    ps.errored = true;
                    fatal = Some(code);
                }
                code => {
                    ps.errored = true;
                    let error = Error::Partition {
                        topic: p.topic,
                        partition: p.partition,
                        code,
                    };
                    warn!(error = %error, "Fetch failed");
                    state.actions.push_back(Action::Error(error, "fetch failed".to_string()));
                }
            }
        }
        if let Some(code) = fatal {
            return self.fail_fatal(state, code, "fetch failed");
        }
        if retry {
            state.fetch_backoff.fail();
        } else {
            state.fetch_backoff.reset();
        }
    }

    /// Run queued callbacks, one at a time, without holding the state lock.
    fn dispatch_actions(&self) {
        loop {
            let Some(action) = self.state.lock().actions.pop_front() else {
                return;
            };
            match action {
                Action::Assign(partitions) => {
                    self.context.on_assign(self, &partitions);
                    self.state.lock().assign_pending = false;
                }
                Action::Revoke(partitions) => {
                    self.context.on_revoke(self, &partitions);
                    self.auto_commit_sync();
                    let mut state = self.state.lock();
                    state.clear_assignment();
                    if state.mode == AssignmentMode::Subscribed
                        && state.membership == MembershipState::Rebalancing
                    {
                        state.need_join = true;
                    }
                }
                Action::Lost(partitions) => {
                    self.context.on_lost(self, &partitions);
                    self.state.lock().clear_assignment();
                }
                Action::Commit(result, offsets) => self.context.commit_callback(result, &offsets),
                Action::Error(error, reason) => self.context.error(error, &reason),
                Action::Stats(json) => self.core.deliver_stats(&self.context, &json),
            }
        }
    }
}

/// Schedule the next join attempt; joins are retried for as long as the
/// consumer stays subscribed.
fn rejoin_later(backoff: &mut Backoff) {
    if !backoff.fail() {
        backoff.reset();
        backoff.fail();
    }
}

fn expire_commits(state: &mut ConsumerState, now: Instant) {
    let expired: Vec<CorrelationId> = state
        .async_commits
        .iter()
        .filter(|(_, (_, deadline))| now >= *deadline)
        .map(|(id, _)| *id)
        .collect();
    for id in expired {
        if let Some((offsets, _)) = state.async_commits.remove(&id) {
            metrics::record_commit("async", false);
            state.actions.push_back(Action::Commit(Err(Error::Timeout), offsets));
        }
    }
}

/// Outcome of an offset commit; the first failing partition decides.
fn commit_result(response: Result<ApiResponse>) -> Result<()> {
    let ApiResponse::OffsetCommit(r) = response? else {
        return Err(unexpected("offset_commit"));
    };
    match r.partitions.into_iter().find(|p| !p.error_code.is_ok()) {
        None => Ok(()),
        Some(p) if p.error_code.is_group_coordinator() || p.error_code.is_authorization() => {
            Err(Error::from_code(p.error_code))
        }
        Some(p) => Err(Error::Partition {
            topic: p.topic,
            partition: p.partition,
            code: p.error_code,
        }),
    }
}

fn unexpected(operation: &str) -> Error {
    Error::Transport(format!("unexpected response to {}", operation))
}

/// Same as [`Consumer::close`]: `on_revoke` and commit callbacks run on the
/// dropping thread.
impl<C: ConsumerContext> Drop for Consumer<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Error closing consumer");
        }
    }
}

impl<C: ConsumerContext> std::fmt::Debug for Consumer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("core", &self.core)
            .field("membership", &self.membership_state())
            .finish()
    }
}
