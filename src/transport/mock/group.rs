//! Group coordinator state for the mock cluster.
//!
//! Membership follows the classic eager protocol with a join barrier: when a
//! rebalance starts every member must rejoin before the new generation is
//! formed; members that fail to rejoin before the rebalance deadline are
//! evicted. Assignment is done coordinator-side with a range assignor.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::error::KafkaCode;
use crate::transport::{DescribedGroupData, GroupMemberData, JoinGroupResponseData};
use crate::types::{GenerationId, Offset, TopicPartition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPhase {
    Empty,
    PreparingRebalance,
    Stable,
}

impl fmt::Display for GroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupPhase::Empty => "Empty",
            GroupPhase::PreparingRebalance => "PreparingRebalance",
            GroupPhase::Stable => "Stable",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct MemberState {
    pub client_id: String,
    pub topics: Vec<String>,
    pub session_timeout: Duration,
    pub last_seen: Instant,
    /// Rejoined during the current rebalance round.
    pub joined: bool,
    /// A JoinGroup from this member is parked waiting for the barrier.
    pub awaiting_join: bool,
    pub assignment: Vec<TopicPartition>,
}

#[derive(Debug, Clone)]
pub struct GroupState {
    pub generation: GenerationId,
    pub phase: GroupPhase,
    pub members: BTreeMap<String, MemberState>,
    pub leader: Option<String>,
    pub rebalance_deadline: Option<Instant>,
    pub offsets: BTreeMap<(String, i32), Offset>,
}

impl Default for GroupState {
    fn default() -> Self {
        Self {
            generation: GenerationId::new(0),
            phase: GroupPhase::Empty,
            members: BTreeMap::new(),
            leader: None,
            rebalance_deadline: None,
            offsets: BTreeMap::new(),
        }
    }
}

impl GroupState {
    /// Register a (re)join. Returns the member id to park the join under.
    pub fn join(
        &mut self,
        member_id: Option<&str>,
        client_id: &str,
        session_timeout: Duration,
        topics: Vec<String>,
        now: Instant,
    ) -> Result<String, KafkaCode> {
        let member_id = match member_id.filter(|id| !id.is_empty()) {
            Some(id) if self.members.contains_key(id) => id.to_string(),
            Some(_) => return Err(KafkaCode::UnknownMemberId),
            None => {
                let id = format!("{}-{}", client_id, Uuid::new_v4());
                self.members.insert(
                    id.clone(),
                    MemberState {
                        client_id: client_id.to_string(),
                        topics: Vec::new(),
                        session_timeout,
                        last_seen: now,
                        joined: false,
                        awaiting_join: false,
                        assignment: Vec::new(),
                    },
                );
                id
            }
        };

        if self.phase != GroupPhase::PreparingRebalance {
            self.start_rebalance(now);
        }

        if let Some(member) = self.members.get_mut(&member_id) {
            member.topics = topics;
            member.session_timeout = session_timeout;
            member.last_seen = now;
            member.joined = true;
            member.awaiting_join = true;
        }
        Ok(member_id)
    }

    /// Move to PreparingRebalance; every member has to rejoin.
    pub fn start_rebalance(&mut self, now: Instant) {
        let timeout = self
            .members
            .values()
            .map(|m| m.session_timeout)
            .max()
            .unwrap_or_default();
        debug!(generation = %self.generation, members = self.members.len(), "Starting rebalance");
        self.phase = GroupPhase::PreparingRebalance;
        self.rebalance_deadline = Some(now + timeout);
        for member in self.members.values_mut() {
            member.joined = false;
        }
    }

    /// Form the next generation once the join barrier is satisfied.
    pub fn try_complete_rebalance<F>(&mut self, now: Instant, partition_count: F) -> bool
    where
        F: Fn(&str) -> Option<i32>,
    {
        if self.phase != GroupPhase::PreparingRebalance {
            return false;
        }
        let all_joined = self.members.values().all(|m| m.joined);
        let expired = self.rebalance_deadline.is_some_and(|d| now >= d);
        if !all_joined && !expired {
            return false;
        }

        self.members.retain(|_, m| m.joined);
        self.rebalance_deadline = None;
        if self.members.is_empty() {
            self.phase = GroupPhase::Empty;
            self.leader = None;
            return true;
        }

        self.generation = GenerationId::new(self.generation.value().wrapping_add(1).max(1));
        self.leader = self.members.keys().next().cloned();
        self.assign(partition_count);
        for member in self.members.values_mut() {
            member.last_seen = now;
        }
        self.phase = GroupPhase::Stable;
        debug!(generation = %self.generation, members = self.members.len(), "Rebalance complete");
        true
    }

    /// Range assignor: per topic, contiguous partition ranges over the
    /// subscribed members in member id order.
    fn assign<F>(&mut self, partition_count: F)
    where
        F: Fn(&str) -> Option<i32>,
    {
        for member in self.members.values_mut() {
            member.assignment.clear();
        }
        let mut topics: Vec<String> = self
            .members
            .values()
            .flat_map(|m| m.topics.iter().cloned())
            .collect();
        topics.sort();
        topics.dedup();

        for topic in topics {
            let Some(count) = partition_count(&topic) else {
                continue;
            };
            let subscribers: Vec<String> = self
                .members
                .iter()
                .filter(|(_, m)| m.topics.contains(&topic))
                .map(|(id, _)| id.clone())
                .collect();
            let n = subscribers.len() as i32;
            let per_member = count / n;
            let extra = count % n;
            let mut next = 0;
            for (i, id) in subscribers.iter().enumerate() {
                let take = per_member + i32::from((i as i32) < extra);
                if let Some(member) = self.members.get_mut(id) {
                    for p in next..next + take {
                        member.assignment.push(TopicPartition::new(topic.clone(), p));
                    }
                }
                next += take;
            }
        }
    }

    /// Answer for a parked join, once there is one.
    pub fn join_result(&mut self, member_id: &str) -> Option<Result<JoinGroupResponseData, KafkaCode>> {
        let Some(member) = self.members.get_mut(member_id) else {
            return Some(Err(KafkaCode::UnknownMemberId));
        };
        if self.phase != GroupPhase::Stable || !member.awaiting_join {
            return None;
        }
        member.awaiting_join = false;
        Some(Ok(JoinGroupResponseData {
            error_code: KafkaCode::None,
            generation_id: self.generation,
            member_id: member_id.to_string(),
            leader_id: self.leader.clone().unwrap_or_default(),
            assignment: member.assignment.clone(),
        }))
    }

    pub fn heartbeat(&mut self, member_id: &str, generation: GenerationId, now: Instant) -> KafkaCode {
        let Some(member) = self.members.get_mut(member_id) else {
            return KafkaCode::UnknownMemberId;
        };
        member.last_seen = now;
        if self.phase == GroupPhase::PreparingRebalance {
            return KafkaCode::RebalanceInProgress;
        }
        if generation != self.generation {
            return KafkaCode::IllegalGeneration;
        }
        KafkaCode::None
    }

    pub fn leave(&mut self, member_id: &str, now: Instant) -> KafkaCode {
        if self.members.remove(member_id).is_none() {
            return KafkaCode::UnknownMemberId;
        }
        if self.members.is_empty() {
            self.phase = GroupPhase::Empty;
            self.leader = None;
            self.rebalance_deadline = None;
        } else {
            self.start_rebalance(now);
        }
        KafkaCode::None
    }

    /// Evict one member as if its session had timed out.
    pub fn evict(&mut self, member_id: &str, now: Instant) -> bool {
        let found = self.members.contains_key(member_id);
        if found {
            self.leave(member_id, now);
        }
        found
    }

    /// Evict members whose session timed out.
    pub fn expire_members(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .members
            .iter()
            .filter(|(_, m)| !m.awaiting_join && now.duration_since(m.last_seen) > m.session_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            debug!(member_id = %id, "Member session expired");
            self.leave(&id, now);
        }
    }

    /// Validate a commit's membership fields.
    pub fn check_commit(&mut self, member_id: &str, generation: GenerationId, now: Instant) -> KafkaCode {
        if generation == GenerationId::INVALID {
            return KafkaCode::None;
        }
        let Some(member) = self.members.get_mut(member_id) else {
            return KafkaCode::UnknownMemberId;
        };
        member.last_seen = now;
        if generation != self.generation {
            return KafkaCode::IllegalGeneration;
        }
        KafkaCode::None
    }

    pub fn describe(&self, group_id: &str) -> DescribedGroupData {
        DescribedGroupData {
            error_code: KafkaCode::None,
            group_id: group_id.to_string(),
            state: self.phase.to_string(),
            protocol_type: "consumer".to_string(),
            members: self
                .members
                .iter()
                .map(|(id, m)| GroupMemberData {
                    member_id: id.clone(),
                    client_id: m.client_id.clone(),
                    assignment: m.assignment.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(topic: &str) -> Option<i32> {
        match topic {
            "t" => Some(5),
            "u" => Some(1),
            _ => None,
        }
    }

    #[test]
    fn test_single_member_gets_every_partition() {
        let now = Instant::now();
        let mut group = GroupState::default();
        let id = group
            .join(None, "c1", Duration::from_secs(10), vec!["t".to_string()], now)
            .unwrap();
        assert!(group.try_complete_rebalance(now, count));
        let result = group.join_result(&id).unwrap().unwrap();
        assert_eq!(result.generation_id, GenerationId::new(1));
        assert_eq!(result.assignment.len(), 5);
        // Answered once.
        assert!(group.join_result(&id).is_none());
    }

    #[test]
    fn test_barrier_waits_for_every_member() {
        let now = Instant::now();
        let mut group = GroupState::default();
        let a = group
            .join(None, "a", Duration::from_secs(10), vec!["t".to_string()], now)
            .unwrap();
        group.try_complete_rebalance(now, count);
        group.join_result(&a);

        let b = group
            .join(None, "b", Duration::from_secs(10), vec!["t".to_string()], now)
            .unwrap();
        assert!(!group.try_complete_rebalance(now, count));
        assert_eq!(
            group.heartbeat(&a, GenerationId::new(1), now),
            KafkaCode::RebalanceInProgress
        );

        group
            .join(Some(&a), "a", Duration::from_secs(10), vec!["t".to_string()], now)
            .unwrap();
        assert!(group.try_complete_rebalance(now, count));
        let ra = group.join_result(&a).unwrap().unwrap();
        let rb = group.join_result(&b).unwrap().unwrap();
        assert_eq!(ra.generation_id, GenerationId::new(2));
        assert_eq!(ra.assignment.len() + rb.assignment.len(), 5);
        assert_eq!(ra.assignment.len().abs_diff(rb.assignment.len()), 1);
    }

    #[test]
    fn test_member_missing_barrier_is_evicted() {
        let now = Instant::now();
        let mut group = GroupState::default();
        let a = group
            .join(None, "a", Duration::from_millis(10), vec!["u".to_string()], now)
            .unwrap();
        group.try_complete_rebalance(now, count);
        group.join_result(&a);
        group.start_rebalance(now);

        let later = now + Duration::from_millis(50);
        assert!(group.try_complete_rebalance(later, count));
        assert_eq!(group.phase, GroupPhase::Empty);
        assert_eq!(group.join_result(&a).unwrap().unwrap_err(), KafkaCode::UnknownMemberId);
    }

    #[test]
    fn test_expired_session_triggers_rebalance() {
        let now = Instant::now();
        let mut group = GroupState::default();
        let a = group
            .join(None, "a", Duration::from_millis(10), vec!["t".to_string()], now)
            .unwrap();
        let b = group
            .join(None, "b", Duration::from_secs(10), vec!["t".to_string()], now)
            .unwrap();
        group.try_complete_rebalance(now, count);
        group.join_result(&a);
        group.join_result(&b);

        let later = now + Duration::from_millis(50);
        group.heartbeat(&b, GenerationId::new(1), later);
        group.expire_members(later);
        assert!(!group.members.contains_key(&a));
        assert_eq!(group.phase, GroupPhase::PreparingRebalance);
        assert_eq!(group.heartbeat(&a, GenerationId::new(1), later), KafkaCode::UnknownMemberId);
    }

    #[test]
    fn test_commit_checks_generation() {
        let now = Instant::now();
        let mut group = GroupState::default();
        let a = group
            .join(None, "a", Duration::from_secs(10), vec!["t".to_string()], now)
            .unwrap();
        group.try_complete_rebalance(now, count);
        assert_eq!(group.check_commit(&a, GenerationId::new(1), now), KafkaCode::None);
        assert_eq!(
            group.check_commit(&a, GenerationId::new(7), now),
            KafkaCode::IllegalGeneration
        );
        assert_eq!(
            group.check_commit("ghost", GenerationId::new(1), now),
            KafkaCode::UnknownMemberId
        );
        assert_eq!(
            group.check_commit("", GenerationId::INVALID, now),
            KafkaCode::None
        );
    }
}
