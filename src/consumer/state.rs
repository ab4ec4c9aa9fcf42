//! Consumer bookkeeping that does not touch the transport.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use regex::Regex;

use crate::config::AutoOffsetReset;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::metadata::MetadataSnapshot;
use crate::metrics;
use crate::retry::Backoff;
use crate::types::{CorrelationId, GenerationId, Offset, TopicPartition};
use crate::validation::validate_topic_name;

/// Group membership as seen by this member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    /// Not part of a group (never subscribed, unsubscribed, or manual mode).
    Unjoined,
    /// First join in progress.
    Joining,
    /// Holding an assignment for the current generation.
    Stable,
    /// Assignment revoked, rejoining.
    Rebalancing,
    /// Ownership lost; only a new `subscribe` rejoins.
    Lost,
}

/// How `commit` waits for its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Block until the coordinator acknowledges.
    Sync,
    /// Return at once; the outcome goes to `commit_callback` during `poll`.
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignmentMode {
    None,
    Subscribed,
    Manual,
}

/// Topic list of a subscription. Entries starting with `^` are patterns.
#[derive(Debug, Clone)]
pub(crate) struct Subscription {
    pub entries: Vec<String>,
    topics: Vec<String>,
    patterns: Vec<Regex>,
}

impl Subscription {
    pub fn new(entries: &[&str]) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::InvalidState("empty subscription".to_string()));
        }
        let mut topics = Vec::new();
        let mut patterns = Vec::new();
        for entry in entries {
            if entry.starts_with('^') {
                let re = Regex::new(entry)
                    .map_err(|e| Error::InvalidTopic(format!("bad pattern {}: {}", entry, e)))?;
                patterns.push(re);
            } else {
                validate_topic_name(entry)?;
                topics.push(entry.to_string());
            }
        }
        Ok(Self {
            entries: entries.iter().map(|e| e.to_string()).collect(),
            topics,
            patterns,
        })
    }

    pub fn has_patterns(&self) -> bool {
        !self.patterns.is_empty()
    }

    /// Literal topics plus every non-internal topic in `snapshot` matching a
    /// pattern, sorted and deduplicated.
    pub fn resolve(&self, snapshot: Option<&MetadataSnapshot>) -> Vec<String> {
        let mut out = self.topics.clone();
        if let Some(snapshot) = snapshot {
            for name in snapshot.topics.keys() {
                if name.starts_with("__") {
                    continue;
                }
                if self.patterns.iter().any(|re| re.is_match(name)) {
                    out.push(name.clone());
                }
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

/// Per-partition fetch and delivery state.
#[derive(Debug, Default)]
pub(crate) struct PartitionState {
    /// Offset of the next record handed to the application. May be a
    /// logical offset until the first fetch resolves it.
    pub position: Option<Offset>,
    /// Offset the next fetch starts from.
    pub fetch_offset: Option<Offset>,
    pub committed: Option<Offset>,
    pub high_watermark: Option<Offset>,
    pub paused: bool,
    /// A surfaced error stops fetching until `seek`.
    pub errored: bool,
    pub records: VecDeque<Message>,
}

impl PartitionState {
    pub fn starting_at(offset: Option<Offset>) -> Self {
        Self {
            position: offset,
            fetch_offset: offset,
            ..Default::default()
        }
    }

    /// Reposition and drop everything buffered.
    pub fn seek(&mut self, offset: Offset) {
        self.position = Some(offset);
        self.fetch_offset = Some(offset);
        self.records.clear();
        self.errored = false;
    }

    pub fn fetchable(&self, queued_min: usize) -> bool {
        self.fetch_offset.is_some() && !self.paused && !self.errored && self.records.len() < queued_min
    }

    /// Concrete position worth committing.
    pub fn commit_position(&self) -> Option<Offset> {
        self.position.filter(|o| o.is_valid())
    }
}

/// Fetch start for a partition without a usable committed offset.
pub(crate) fn reset_offset(policy: AutoOffsetReset) -> Option<Offset> {
    match policy {
        AutoOffsetReset::Earliest => Some(Offset::BEGINNING),
        AutoOffsetReset::Latest => Some(Offset::END),
        AutoOffsetReset::Error => None,
    }
}

/// A fetch request waiting for its response.
#[derive(Debug)]
pub(crate) struct InFlightFetch {
    pub correlation_id: CorrelationId,
    pub deadline: Instant,
    /// Offsets the request asked for; a partition repositioned since is
    /// ignored in the response.
    pub sent: HashMap<TopicPartition, Offset>,
}

/// Callback work queued while the state lock is held.
pub(crate) enum Action {
    Assign(Vec<TopicPartition>),
    Revoke(Vec<TopicPartition>),
    Lost(Vec<TopicPartition>),
    Commit(Result<()>, Vec<TopicPartition>),
    Error(Error, String),
    Stats(String),
}

pub(crate) struct ConsumerState {
    pub membership: MembershipState,
    pub mode: AssignmentMode,
    pub subscription: Option<Subscription>,
    pub member_id: Option<String>,
    pub generation: GenerationId,
    pub assignment: BTreeMap<TopicPartition, PartitionState>,
    /// Assignment installed, `on_assign` not run yet.
    pub assign_pending: bool,
    /// `on_revoke` or `on_lost` queued for the current assignment.
    pub revoking: bool,
    pub need_join: bool,
    /// Topics sent with the last join.
    pub joined_topics: Vec<String>,
    pub join: Option<(CorrelationId, Instant)>,
    pub join_backoff: Backoff,
    pub heartbeat: Option<(CorrelationId, Instant)>,
    pub next_heartbeat: Instant,
    pub last_heartbeat_ok: Instant,
    pub fetch: Option<InFlightFetch>,
    pub fetch_backoff: Backoff,
    pub offset_fetch: Option<(CorrelationId, Instant)>,
    pub offset_fetch_backoff: Backoff,
    pub metadata: Option<(CorrelationId, Instant)>,
    pub async_commits: HashMap<CorrelationId, (Vec<TopicPartition>, Instant)>,
    pub next_auto_commit: Instant,
    pub actions: VecDeque<Action>,
    pub errors: VecDeque<Error>,
    cursor: usize,
}

impl ConsumerState {
    pub fn new(join_backoff: Backoff, fetch_backoff: Backoff, offset_fetch_backoff: Backoff) -> Self {
        let now = Instant::now();
        Self {
            membership: MembershipState::Unjoined,
            mode: AssignmentMode::None,
            subscription: None,
            member_id: None,
            generation: GenerationId::INVALID,
            assignment: BTreeMap::new(),
            assign_pending: false,
            revoking: false,
            need_join: false,
            joined_topics: Vec::new(),
            join: None,
            join_backoff,
            heartbeat: None,
            next_heartbeat: now,
            last_heartbeat_ok: now,
            fetch: None,
            fetch_backoff,
            offset_fetch: None,
            offset_fetch_backoff,
            metadata: None,
            async_commits: HashMap::new(),
            next_auto_commit: now,
            actions: VecDeque::new(),
            errors: VecDeque::new(),
            cursor: 0,
        }
    }

    /// Partition list of the current assignment.
    pub fn assigned(&self) -> Vec<TopicPartition> {
        self.assignment.keys().cloned().collect()
    }

    /// Whether records may flow from the assignment.
    pub fn active(&self) -> bool {
        !self.assign_pending && !self.revoking
    }

    /// Replace the assignment wholesale.
    pub fn install(&mut self, partitions: &[TopicPartition]) {
        self.assignment = partitions
            .iter()
            .map(|tp| {
                let key = TopicPartition::new(tp.topic.clone(), tp.partition);
                (key, PartitionState::starting_at(tp.offset))
            })
            .collect();
        self.fetch = None;
        self.offset_fetch = None;
        self.cursor = 0;
    }

    pub fn clear_assignment(&mut self) {
        self.install(&[]);
        self.assign_pending = false;
        self.revoking = false;
    }

    /// Forget group membership and everything in flight for it.
    pub fn reset_membership(&mut self) {
        self.member_id = None;
        self.generation = GenerationId::INVALID;
        self.join = None;
        self.heartbeat = None;
        self.need_join = false;
    }

    /// Give up the assignment and rejoin. `on_revoke` runs first when there
    /// is something to revoke.
    pub fn begin_rebalance(&mut self) {
        self.membership = MembershipState::Rebalancing;
        self.heartbeat = None;
        if self.assignment.is_empty() {
            self.need_join = true;
            return;
        }
        self.revoking = true;
        if self.assign_pending {
            // on_assign never ran, so there is nothing to revoke.
            self.actions.retain(|a| !matches!(a, Action::Assign(_)));
            self.clear_assignment();
            self.need_join = true;
            return;
        }
        metrics::record_rebalance("revoke");
        let partitions = self.assigned();
        self.actions.push_back(Action::Revoke(partitions));
    }

    /// Drop group membership; the assignment goes to `on_lost`.
    pub fn lose(&mut self) {
        self.membership = MembershipState::Lost;
        self.reset_membership();
        if self.assignment.is_empty() {
            return;
        }
        metrics::record_rebalance("lost");
        if self.assign_pending {
            self.actions.retain(|a| !matches!(a, Action::Assign(_)));
            self.clear_assignment();
            return;
        }
        if self.revoking {
            // Ownership is gone; a queued revoke becomes a loss.
            self.actions.retain(|a| !matches!(a, Action::Revoke(_)));
        }
        self.revoking = true;
        let partitions = self.assigned();
        self.actions.push_back(Action::Lost(partitions));
    }

    pub fn partition_mut(&mut self, topic: &str, partition: i32) -> Result<&mut PartitionState> {
        let key = TopicPartition::new(topic, partition);
        self.assignment.get_mut(&key).ok_or_else(|| Error::NotAssigned {
            topic: topic.to_string(),
            partition,
        })
    }

    /// Fail with `NotAssigned` for the first partition outside the assignment.
    pub fn check_assigned(&self, partitions: &[TopicPartition]) -> Result<()> {
        match partitions.iter().find(|tp| !self.assignment.contains_key(*tp)) {
            Some(tp) => Err(Error::NotAssigned {
                topic: tp.topic.clone(),
                partition: tp.partition,
            }),
            None => Ok(()),
        }
    }

    /// Current consumed positions, for a commit of the whole assignment.
    pub fn positions(&self) -> Vec<TopicPartition> {
        self.assignment
            .iter()
            .filter_map(|(tp, ps)| ps.commit_position().map(|o| tp.at(o)))
            .collect()
    }

    /// Positions that moved since their last commit.
    pub fn uncommitted_positions(&self) -> Vec<TopicPartition> {
        self.assignment
            .iter()
            .filter_map(|(tp, ps)| {
                let pos = ps.commit_position()?;
                (ps.committed != Some(pos)).then(|| tp.at(pos))
            })
            .collect()
    }

    pub fn mark_committed(&mut self, offsets: &[TopicPartition]) {
        for tp in offsets {
            if let (Some(ps), Some(o)) = (self.assignment.get_mut(tp), tp.offset) {
                ps.committed = Some(o);
            }
        }
    }

    /// Partitions whose start offset is still unknown.
    pub fn unresolved(&self) -> Vec<TopicPartition> {
        self.assignment
            .iter()
            .filter(|(_, ps)| ps.fetch_offset.is_none() && !ps.errored)
            .map(|(tp, _)| tp.clone())
            .collect()
    }

    /// Partitions to include in the next fetch and their offsets.
    pub fn fetch_targets(&self, queued_min: usize) -> Vec<(TopicPartition, Offset)> {
        if !self.active() {
            return Vec::new();
        }
        self.assignment
            .iter()
            .filter(|(_, ps)| ps.fetchable(queued_min))
            .filter_map(|(tp, ps)| ps.fetch_offset.map(|o| (tp.clone(), o)))
            .collect()
    }

    /// Take the next buffered record, rotating across partitions.
    pub fn next_record(&mut self) -> Option<Message> {
        if !self.active() {
            return None;
        }
        let ready: Vec<TopicPartition> = self
            .assignment
            .iter()
            .filter(|(_, ps)| !ps.paused && !ps.errored && !ps.records.is_empty())
            .map(|(tp, _)| tp.clone())
            .collect();
        if ready.is_empty() {
            return None;
        }
        let tp = &ready[self.cursor % ready.len()];
        self.cursor = self.cursor.wrapping_add(1);
        let ps = self.assignment.get_mut(tp)?;
        let message = ps.records.pop_front()?;
        if let Some(offset) = message.offset {
            ps.position = Some(offset.next());
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    fn state() -> ConsumerState {
        let p = RetryPolicy::fast();
        ConsumerState::new(p.start(), p.start(), p.start())
    }

    fn record(topic: &str, partition: i32, offset: i64) -> Message {
        let mut m = Message::to(topic).partition(partition).payload("x");
        m.offset = Some(Offset::new(offset));
        m
    }

    #[test]
    fn test_subscription_patterns() {
        let sub = Subscription::new(&["orders", "^metrics-.*"]).unwrap();
        assert!(sub.has_patterns());
        assert_eq!(sub.resolve(None), vec!["orders".to_string()]);
        assert!(Subscription::new(&["^(unclosed"]).is_err());
        assert!(Subscription::new(&["bad name"]).is_err());
        assert!(Subscription::new(&[]).is_err());
    }

    #[test]
    fn test_install_replaces_assignment() {
        let mut s = state();
        s.install(&[TopicPartition::new("a", 0), TopicPartition::new("a", 1)]);
        s.install(&[TopicPartition::with_offset("b", 0, Offset::new(7))]);
        assert_eq!(s.assigned(), vec![TopicPartition::new("b", 0)]);
        let ps = s.partition_mut("b", 0).unwrap();
        assert_eq!(ps.fetch_offset, Some(Offset::new(7)));
        assert!(matches!(
            s.partition_mut("a", 0),
            Err(Error::NotAssigned { partition: 0, .. })
        ));
    }

    #[test]
    fn test_next_record_rotates_and_advances_position() {
        let mut s = state();
        s.install(&[TopicPartition::new("t", 0), TopicPartition::new("t", 1)]);
        for p in 0..2 {
            let ps = s.partition_mut("t", p).unwrap();
            ps.records.push_back(record("t", p, 10));
            ps.records.push_back(record("t", p, 11));
        }
        let order: Vec<(i32, i64)> = std::iter::from_fn(|| s.next_record())
            .map(|m| (m.partition.unwrap(), m.offset.unwrap().value()))
            .collect();
        assert_eq!(order, vec![(0, 10), (1, 10), (0, 11), (1, 11)]);
        assert_eq!(s.positions(), vec![
            TopicPartition::with_offset("t", 0, Offset::new(12)),
            TopicPartition::with_offset("t", 1, Offset::new(12)),
        ]);
    }

    #[test]
    fn test_paused_and_pending_partitions_hold_records() {
        let mut s = state();
        s.install(&[TopicPartition::new("t", 0)]);
        s.partition_mut("t", 0).unwrap().records.push_back(record("t", 0, 0));

        s.assign_pending = true;
        assert!(s.next_record().is_none());
        s.assign_pending = false;

        s.partition_mut("t", 0).unwrap().paused = true;
        assert!(s.next_record().is_none());
        s.partition_mut("t", 0).unwrap().paused = false;
        assert!(s.next_record().is_some());
    }

    #[test]
    fn test_uncommitted_positions() {
        let mut s = state();
        // Logical offsets are never committed.
        s.install(&[
            TopicPartition::with_offset("t", 0, Offset::new(5)),
            TopicPartition::with_offset("t", 1, Offset::BEGINNING),
        ]);
        let pending = s.uncommitted_positions();
        assert_eq!(pending.len(), 1);
        s.mark_committed(&pending);
        assert!(s.uncommitted_positions().is_empty());
    }

    #[test]
    fn test_check_assigned() {
        let mut s = state();
        s.install(&[TopicPartition::new("t", 0)]);
        assert!(s.check_assigned(&[TopicPartition::new("t", 0)]).is_ok());
        assert_eq!(
            s.check_assigned(&[TopicPartition::new("t", 3)]),
            Err(Error::NotAssigned {
                topic: "t".to_string(),
                partition: 3
            })
        );
    }

    #[test]
    fn test_rebalance_queues_revoke_once_assigned() {
        let mut s = state();
        s.membership = MembershipState::Stable;
        s.install(&[TopicPartition::new("t", 0)]);
        s.begin_rebalance();
        assert_eq!(s.membership, MembershipState::Rebalancing);
        assert!(s.revoking);
        assert!(!s.need_join);
        assert!(matches!(s.actions.front(), Some(Action::Revoke(p)) if p.len() == 1));
    }

    #[test]
    fn test_rebalance_before_on_assign_skips_revoke() {
        let mut s = state();
        s.membership = MembershipState::Stable;
        s.install(&[TopicPartition::new("t", 0)]);
        s.assign_pending = true;
        let partitions = s.assigned();
        s.actions.push_back(Action::Assign(partitions));
        s.begin_rebalance();
        assert!(s.actions.is_empty());
        assert!(s.assignment.is_empty());
        assert!(s.need_join);
    }

    #[test]
    fn test_lose_replaces_queued_revoke() {
        let mut s = state();
        s.membership = MembershipState::Stable;
        s.member_id = Some("m-1".to_string());
        s.install(&[TopicPartition::new("t", 0)]);
        s.begin_rebalance();
        s.lose();
        assert_eq!(s.membership, MembershipState::Lost);
        assert!(s.member_id.is_none());
        assert_eq!(s.actions.len(), 1);
        assert!(matches!(s.actions.front(), Some(Action::Lost(_))));
    }

    #[test]
    fn test_seek_clears_buffer_and_error() {
        let mut ps = PartitionState::starting_at(Some(Offset::new(3)));
        ps.records.push_back(record("t", 0, 3));
        ps.errored = true;
        ps.seek(Offset::new(0));
        assert!(ps.records.is_empty());
        assert!(ps.fetchable(1));
        assert_eq!(ps.position, Some(Offset::new(0)));
    }
}
