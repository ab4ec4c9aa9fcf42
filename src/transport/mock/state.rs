//! Cluster data and request handling for the mock engine.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::Inbound;
use super::group::{GroupPhase, GroupState};
use crate::error::KafkaCode;
use crate::message::{Message, Timestamp};
use crate::transport::*;
use crate::types::{BrokerId, GenerationId, Offset, TopicPartition};
use crate::validation::validate_topic_name;

/// Topic-level config defaults reported by describe_configs.
const TOPIC_CONFIG_DEFAULTS: &[(&str, &str)] = &[
    ("cleanup.policy", "delete"),
    ("compression.type", "producer"),
    ("max.message.bytes", "1048588"),
    ("message.timestamp.type", "CreateTime"),
    ("min.insync.replicas", "1"),
    ("retention.bytes", "-1"),
    ("retention.ms", "604800000"),
    ("segment.bytes", "1073741824"),
];

const SENSITIVE_BROKER_CONFIGS: &[&str] = &["ssl.keystore.password"];

#[derive(Debug, Clone, Default)]
pub struct PartitionLog {
    pub records: Vec<Message>,
    pub log_start: i64,
}

impl PartitionLog {
    pub fn high_watermark(&self) -> i64 {
        self.log_start + self.records.len() as i64
    }
}

#[derive(Debug, Clone)]
pub struct TopicState {
    pub partitions: Vec<PartitionLog>,
    pub replication_factor: i16,
    pub configs: BTreeMap<String, String>,
}

impl TopicState {
    fn new(partitions: i32, replication_factor: i16) -> Self {
        Self {
            partitions: (0..partitions).map(|_| PartitionLog::default()).collect(),
            replication_factor,
            configs: BTreeMap::new(),
        }
    }
}

/// What the I/O thread should do with a request.
pub enum Outcome {
    Reply(std::result::Result<ApiResponse, KafkaCode>),
    /// JoinGroup waiting on the barrier.
    ParkJoin { group: String, member: String },
    /// Long-poll fetch with nothing to return yet.
    ParkFetch {
        request: FetchRequestData,
        deadline: Instant,
    },
}

pub struct ClusterState {
    pub brokers: i32,
    pub auto_create_topics: bool,
    pub default_partitions: i32,
    pub max_message_bytes: usize,
    pub coordinator_available: bool,
    pub topics: BTreeMap<String, TopicState>,
    pub groups: BTreeMap<String, GroupState>,
    pub injected: HashMap<ApiKey, VecDeque<KafkaCode>>,
    pub latency: HashMap<ApiKey, Duration>,
    pub connections: Vec<Sender<Inbound>>,
}

impl ClusterState {
    pub fn new(brokers: i32) -> Self {
        Self {
            brokers: brokers.max(1),
            auto_create_topics: true,
            default_partitions: 1,
            max_message_bytes: 1_048_588,
            coordinator_available: true,
            topics: BTreeMap::new(),
            groups: BTreeMap::new(),
            injected: HashMap::new(),
            latency: HashMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn leader_for(&self, partition: i32) -> BrokerId {
        BrokerId::new(partition % self.brokers)
    }

    pub fn take_injected(&mut self, api: ApiKey) -> Option<KafkaCode> {
        self.injected.get_mut(&api).and_then(VecDeque::pop_front)
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.topics.get(topic).map(|t| t.partitions.len() as i32)
    }

    pub fn create_topic(&mut self, name: &str, partitions: i32, replication_factor: i16) -> KafkaCode {
        if validate_topic_name(name).is_err() {
            return KafkaCode::InvalidTopic;
        }
        if self.topics.contains_key(name) {
            return KafkaCode::TopicAlreadyExists;
        }
        if partitions <= 0 {
            return KafkaCode::InvalidPartitions;
        }
        if replication_factor <= 0 || i32::from(replication_factor) > self.brokers {
            return KafkaCode::InvalidReplicationFactor;
        }
        self.topics
            .insert(name.to_string(), TopicState::new(partitions, replication_factor));
        KafkaCode::None
    }

    pub fn log(&self, topic: &str, partition: i32) -> Option<&PartitionLog> {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.topics.get(topic)?.partitions.get(p))
    }

    fn log_mut(&mut self, topic: &str, partition: i32) -> Option<&mut PartitionLog> {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.topics.get_mut(topic)?.partitions.get_mut(p))
    }

    /// Append records; returns the base offset.
    pub fn append(
        &mut self,
        topic: &str,
        partition: i32,
        records: impl IntoIterator<Item = RecordData>,
    ) -> std::result::Result<Offset, KafkaCode> {
        let log = self
            .log_mut(topic, partition)
            .ok_or(KafkaCode::UnknownTopicOrPartition)?;
        let base = log.high_watermark();
        for (i, record) in records.into_iter().enumerate() {
            let timestamp = match record.timestamp {
                Timestamp::NotAvailable => Timestamp::now(),
                ts => ts,
            };
            log.records.push(Message {
                topic: topic.to_string(),
                partition: Some(partition),
                key: record.key,
                value: record.value,
                headers: record.headers,
                timestamp,
                offset: Some(Offset::new(base + i as i64)),
            });
        }
        Ok(Offset::new(base))
    }

    /// Evict expired group members and complete pending rebalances.
    pub fn tick_groups(&mut self, now: Instant) {
        let counts: HashMap<String, i32> = self
            .topics
            .iter()
            .map(|(name, t)| (name.clone(), t.partitions.len() as i32))
            .collect();
        for group in self.groups.values_mut() {
            group.expire_members(now);
            group.try_complete_rebalance(now, |t| counts.get(t).copied());
        }
    }

    pub fn join_result(&mut self, group: &str, member: &str) -> Option<std::result::Result<ApiResponse, KafkaCode>> {
        let Some(state) = self.groups.get_mut(group) else {
            return Some(Err(KafkaCode::UnknownMemberId));
        };
        state
            .join_result(member)
            .map(|r| r.map(ApiResponse::JoinGroup))
    }

    pub fn handle(&mut self, api: ApiRequest, now: Instant) -> Outcome {
        match api {
            ApiRequest::Metadata(req) => Outcome::Reply(Ok(ApiResponse::Metadata(self.metadata(req)))),
            ApiRequest::Produce(req) => Outcome::Reply(Ok(ApiResponse::Produce(self.produce(req)))),
            ApiRequest::Fetch(req) => {
                let (response, records) = self.fetch(&req);
                if records == 0 && !req.max_wait.is_zero() && !has_errors(&response) {
                    let deadline = now + req.max_wait;
                    Outcome::ParkFetch {
                        request: req,
                        deadline,
                    }
                } else {
                    Outcome::Reply(Ok(ApiResponse::Fetch(response)))
                }
            }
            ApiRequest::ListOffsets(req) => {
                Outcome::Reply(Ok(ApiResponse::ListOffsets(self.list_offsets(req))))
            }
            ApiRequest::JoinGroup(req) => self.join_group(req, now),
            ApiRequest::Heartbeat(req) => {
                if !self.coordinator_available {
                    return Outcome::Reply(Err(KafkaCode::GroupCoordinatorNotAvailable));
                }
                let code = match self.groups.get_mut(&req.group_id) {
                    Some(group) => group.heartbeat(&req.member_id, req.generation_id, now),
                    None => KafkaCode::UnknownMemberId,
                };
                Outcome::Reply(Ok(ApiResponse::Heartbeat(HeartbeatResponseData {
                    error_code: code,
                })))
            }
            ApiRequest::LeaveGroup(req) => {
                let code = match self.groups.get_mut(&req.group_id) {
                    Some(group) => group.leave(&req.member_id, now),
                    None => KafkaCode::UnknownMemberId,
                };
                Outcome::Reply(Ok(ApiResponse::LeaveGroup(LeaveGroupResponseData {
                    error_code: code,
                })))
            }
            ApiRequest::OffsetCommit(req) => {
                if !self.coordinator_available {
                    return Outcome::Reply(Err(KafkaCode::GroupCoordinatorNotAvailable));
                }
                Outcome::Reply(Ok(ApiResponse::OffsetCommit(self.offset_commit(req, now))))
            }
            ApiRequest::OffsetFetch(req) => {
                if !self.coordinator_available {
                    return Outcome::Reply(Err(KafkaCode::GroupCoordinatorNotAvailable));
                }
                Outcome::Reply(Ok(ApiResponse::OffsetFetch(self.offset_fetch(req))))
            }
            ApiRequest::CreateTopics(req) => {
                Outcome::Reply(Ok(ApiResponse::CreateTopics(self.create_topics(req))))
            }
            ApiRequest::DeleteTopics(req) => {
                Outcome::Reply(Ok(ApiResponse::DeleteTopics(self.delete_topics(req))))
            }
            ApiRequest::CreatePartitions(req) => Outcome::Reply(Ok(ApiResponse::CreatePartitions(
                self.create_partitions(req),
            ))),
            ApiRequest::DescribeConfigs(req) => Outcome::Reply(Ok(ApiResponse::DescribeConfigs(
                self.describe_configs(req),
            ))),
            ApiRequest::AlterConfigs(req) => {
                Outcome::Reply(Ok(ApiResponse::AlterConfigs(self.alter_configs(req))))
            }
            ApiRequest::ListGroups => Outcome::Reply(Ok(ApiResponse::ListGroups(ListGroupsResponseData {
                error_code: KafkaCode::None,
                groups: self
                    .groups
                    .iter()
                    .map(|(id, g)| ListedGroupData {
                        group_id: id.clone(),
                        protocol_type: "consumer".to_string(),
                        state: g.phase.to_string(),
                    })
                    .collect(),
            }))),
            ApiRequest::DescribeGroups(req) => Outcome::Reply(Ok(ApiResponse::DescribeGroups(
                DescribeGroupsResponseData {
                    groups: req
                        .groups
                        .iter()
                        .map(|id| match self.groups.get(id) {
                            Some(group) => group.describe(id),
                            None => DescribedGroupData {
                                error_code: KafkaCode::None,
                                group_id: id.clone(),
                                state: "Dead".to_string(),
                                protocol_type: String::new(),
                                members: Vec::new(),
                            },
                        })
                        .collect(),
                },
            ))),
            ApiRequest::DeleteGroups(req) => {
                Outcome::Reply(Ok(ApiResponse::DeleteGroups(self.delete_groups(req))))
            }
        }
    }

    fn metadata(&mut self, req: MetadataRequestData) -> MetadataResponseData {
        let names: Vec<String> = match req.topics {
            Some(names) => names,
            None => self.topics.keys().cloned().collect(),
        };
        let mut topics = Vec::with_capacity(names.len());
        for name in names {
            if validate_topic_name(&name).is_err() {
                topics.push(topic_error(name, KafkaCode::InvalidTopic));
                continue;
            }
            if !self.topics.contains_key(&name) {
                if req.allow_auto_topic_creation && self.auto_create_topics {
                    self.create_topic(&name, self.default_partitions, 1);
                } else {
                    topics.push(topic_error(name, KafkaCode::UnknownTopicOrPartition));
                    continue;
                }
            }
            let count = self.partition_count(&name).unwrap_or_default();
            let partitions = (0..count)
                .map(|p| {
                    let leader = self.leader_for(p);
                    PartitionMetadataData {
                        error_code: KafkaCode::None,
                        partition_index: p,
                        leader_id: leader,
                        replica_nodes: vec![leader],
                        isr_nodes: vec![leader],
                    }
                })
                .collect();
            topics.push(TopicMetadataData {
                error_code: KafkaCode::None,
                name,
                is_internal: false,
                partitions,
            });
        }
        MetadataResponseData {
            brokers: (0..self.brokers)
                .map(|id| BrokerData {
                    node_id: BrokerId::new(id),
                    host: format!("mock-broker-{}", id),
                    port: 9092 + id,
                    rack: None,
                })
                .collect(),
            controller_id: BrokerId::new(0),
            topics,
        }
    }

    fn produce(&mut self, req: ProduceRequestData) -> ProduceResponseData {
        let mut response = ProduceResponseData {
            topic: req.topic.clone(),
            partition: req.partition,
            error_code: KafkaCode::None,
            base_offset: Offset::INVALID,
            log_append_time: None,
        };
        let size: usize = req
            .records
            .iter()
            .map(|r| {
                r.key.as_ref().map_or(0, |k| k.len())
                    + r.value.as_ref().map_or(0, |v| v.len())
                    + r.headers.size()
            })
            .max()
            .unwrap_or_default();
        if size > self.max_message_bytes {
            response.error_code = KafkaCode::MessageSizeTooLarge;
            return response;
        }
        let acks = req.acks;
        match self.append(&req.topic, req.partition, req.records) {
            Ok(base) if acks != 0 => response.base_offset = base,
            Ok(_) => {}
            Err(code) => response.error_code = code,
        }
        response
    }

    /// Build a fetch response; also returns the number of records in it.
    pub fn fetch(&self, req: &FetchRequestData) -> (FetchResponseData, usize) {
        let mut total = 0;
        let partitions = req
            .partitions
            .iter()
            .map(|p| {
                let mut out = FetchPartitionResponseData {
                    topic: p.topic.clone(),
                    partition: p.partition,
                    error_code: KafkaCode::None,
                    high_watermark: Offset::INVALID,
                    log_start_offset: Offset::INVALID,
                    fetch_offset: p.fetch_offset,
                    records: Vec::new(),
                };
                let Some(log) = self.log(&p.topic, p.partition) else {
                    out.error_code = KafkaCode::UnknownTopicOrPartition;
                    return out;
                };
                let hw = log.high_watermark();
                out.high_watermark = Offset::new(hw);
                out.log_start_offset = Offset::new(log.log_start);
                let offset = match p.fetch_offset {
                    Offset::BEGINNING => log.log_start,
                    Offset::END => hw,
                    Offset(o) => o,
                };
                if offset < log.log_start || offset > hw {
                    out.error_code = KafkaCode::OffsetOutOfRange;
                    return out;
                }
                out.fetch_offset = Offset::new(offset);
                let start = (offset - log.log_start) as usize;
                out.records = log.records[start..]
                    .iter()
                    .take(req.max_records.max(1))
                    .cloned()
                    .collect();
                total += out.records.len();
                out
            })
            .collect();
        (FetchResponseData { partitions }, total)
    }

    fn list_offsets(&self, req: ListOffsetsRequestData) -> ListOffsetsResponseData {
        ListOffsetsResponseData {
            partitions: req
                .partitions
                .into_iter()
                .map(|tp| match self.log(&tp.topic, tp.partition) {
                    Some(log) => ListOffsetsPartitionResponseData {
                        topic: tp.topic,
                        partition: tp.partition,
                        error_code: KafkaCode::None,
                        log_start_offset: Offset::new(log.log_start),
                        high_watermark: Offset::new(log.high_watermark()),
                    },
                    None => ListOffsetsPartitionResponseData {
                        topic: tp.topic,
                        partition: tp.partition,
                        error_code: KafkaCode::UnknownTopicOrPartition,
                        log_start_offset: Offset::INVALID,
                        high_watermark: Offset::INVALID,
                    },
                })
                .collect(),
        }
    }

    fn join_group(&mut self, req: JoinGroupRequestData, now: Instant) -> Outcome {
        if !self.coordinator_available {
            return Outcome::Reply(Err(KafkaCode::GroupCoordinatorNotAvailable));
        }
        let group = self.groups.entry(req.group_id.clone()).or_default();
        match group.join(
            req.member_id.as_deref(),
            &req.client_id,
            req.session_timeout,
            req.topics,
            now,
        ) {
            Ok(member) => {
                self.tick_groups(now);
                Outcome::ParkJoin {
                    group: req.group_id,
                    member,
                }
            }
            Err(code) => Outcome::Reply(Ok(ApiResponse::JoinGroup(JoinGroupResponseData {
                error_code: code,
                generation_id: GenerationId::INVALID,
                member_id: String::new(),
                leader_id: String::new(),
                assignment: Vec::new(),
            }))),
        }
    }

    fn offset_commit(&mut self, req: OffsetCommitRequestData, now: Instant) -> OffsetCommitResponseData {
        let known: Vec<bool> = req
            .offsets
            .iter()
            .map(|tp| self.log(&tp.topic, tp.partition).is_some())
            .collect();
        let group = self.groups.entry(req.group_id).or_default();
        let group_code = group.check_commit(&req.member_id, req.generation_id, now);
        let partitions = req
            .offsets
            .into_iter()
            .zip(known)
            .map(|(tp, known)| {
                let error_code = if !group_code.is_ok() {
                    group_code
                } else if !known {
                    KafkaCode::UnknownTopicOrPartition
                } else {
                    group.offsets.insert(
                        (tp.topic.clone(), tp.partition),
                        tp.offset.unwrap_or(Offset::INVALID),
                    );
                    KafkaCode::None
                };
                PartitionErrorData {
                    topic: tp.topic,
                    partition: tp.partition,
                    error_code,
                }
            })
            .collect();
        OffsetCommitResponseData { partitions }
    }

    fn offset_fetch(&self, req: OffsetFetchRequestData) -> OffsetFetchResponseData {
        let group = self.groups.get(&req.group_id);
        OffsetFetchResponseData {
            error_code: KafkaCode::None,
            partitions: req
                .partitions
                .into_iter()
                .map(|tp| {
                    let committed = group
                        .and_then(|g| g.offsets.get(&(tp.topic.clone(), tp.partition)).copied())
                        .unwrap_or(Offset::INVALID);
                    tp.at(committed)
                })
                .collect(),
        }
    }

    fn create_topics(&mut self, req: CreateTopicsRequestData) -> TopicsResponseData {
        let topics = req
            .topics
            .into_iter()
            .map(|topic| {
                let unknown_config = topic
                    .configs
                    .iter()
                    .find(|(k, _)| !TOPIC_CONFIG_DEFAULTS.iter().any(|(d, _)| d == k));
                let code = if let Some((key, _)) = unknown_config {
                    return TopicErrorData {
                        name: topic.name,
                        error_code: KafkaCode::InvalidConfig,
                        error_message: Some(format!("Unknown topic config '{}'", key)),
                    };
                } else if req.validate_only {
                    self.validate_new_topic(&topic)
                } else {
                    let code =
                        self.create_topic(&topic.name, topic.num_partitions, topic.replication_factor);
                    if code.is_ok()
                        && let Some(state) = self.topics.get_mut(&topic.name)
                    {
                        state.configs.extend(topic.configs.iter().cloned());
                    }
                    code
                };
                TopicErrorData {
                    name: topic.name,
                    error_code: code,
                    error_message: None,
                }
            })
            .collect();
        TopicsResponseData { topics }
    }

    fn validate_new_topic(&self, topic: &NewTopic) -> KafkaCode {
        if validate_topic_name(&topic.name).is_err() {
            KafkaCode::InvalidTopic
        } else if self.topics.contains_key(&topic.name) {
            KafkaCode::TopicAlreadyExists
        } else if topic.num_partitions <= 0 {
            KafkaCode::InvalidPartitions
        } else if topic.replication_factor <= 0 || i32::from(topic.replication_factor) > self.brokers {
            KafkaCode::InvalidReplicationFactor
        } else {
            KafkaCode::None
        }
    }

    fn delete_topics(&mut self, req: DeleteTopicsRequestData) -> TopicsResponseData {
        TopicsResponseData {
            topics: req
                .topics
                .into_iter()
                .map(|name| {
                    let error_code = if self.topics.remove(&name).is_some() {
                        KafkaCode::None
                    } else {
                        KafkaCode::UnknownTopicOrPartition
                    };
                    TopicErrorData {
                        name,
                        error_code,
                        error_message: None,
                    }
                })
                .collect(),
        }
    }

    fn create_partitions(&mut self, req: CreatePartitionsRequestData) -> TopicsResponseData {
        TopicsResponseData {
            topics: req
                .topics
                .into_iter()
                .map(|np| {
                    let (error_code, error_message) = match self.topics.get_mut(&np.topic) {
                        None => (KafkaCode::UnknownTopicOrPartition, None),
                        Some(topic) if np.total_count <= topic.partitions.len() as i32 => (
                            KafkaCode::InvalidPartitions,
                            Some(format!(
                                "Topic currently has {} partitions, which is higher than or equal to the requested {}",
                                topic.partitions.len(),
                                np.total_count
                            )),
                        ),
                        Some(topic) => {
                            if !req.validate_only {
                                topic
                                    .partitions
                                    .resize_with(np.total_count as usize, PartitionLog::default);
                            }
                            (KafkaCode::None, None)
                        }
                    };
                    TopicErrorData {
                        name: np.topic,
                        error_code,
                        error_message,
                    }
                })
                .collect(),
        }
    }

    fn describe_configs(&self, req: DescribeConfigsRequestData) -> DescribeConfigsResponseData {
        let resources = req
            .resources
            .into_iter()
            .map(|resource| {
                let mut result = DescribeConfigsResultData {
                    resource_type: resource.resource_type,
                    name: resource.name.clone(),
                    error_code: KafkaCode::None,
                    error_message: None,
                    entries: Vec::new(),
                };
                match resource.resource_type {
                    ResourceType::Topic => match self.topics.get(&resource.name) {
                        Some(topic) => {
                            result.entries = TOPIC_CONFIG_DEFAULTS
                                .iter()
                                .map(|(name, default)| {
                                    let value = topic.configs.get(*name);
                                    ConfigEntryData {
                                        name: name.to_string(),
                                        value: Some(
                                            value.cloned().unwrap_or_else(|| default.to_string()),
                                        ),
                                        read_only: false,
                                        is_default: value.is_none(),
                                        is_sensitive: false,
                                    }
                                })
                                .collect();
                        }
                        None => result.error_code = KafkaCode::UnknownTopicOrPartition,
                    },
                    ResourceType::Broker => match resource.name.parse::<i32>() {
                        Ok(id) if (0..self.brokers).contains(&id) => {
                            result.entries = self.broker_configs(id);
                        }
                        _ => {
                            result.error_code = KafkaCode::InvalidRequest;
                            result.error_message = Some(format!("Unknown broker '{}'", resource.name));
                        }
                    },
                    ResourceType::Group => {
                        result.error_code = KafkaCode::InvalidRequest;
                        result.error_message = Some("Group configs are not supported".to_string());
                    }
                }
                result
            })
            .collect();
        DescribeConfigsResponseData { resources }
    }

    fn broker_configs(&self, id: i32) -> Vec<ConfigEntryData> {
        let entry = |name: &str, value: String| ConfigEntryData {
            name: name.to_string(),
            value: (!SENSITIVE_BROKER_CONFIGS.contains(&name)).then_some(value),
            read_only: true,
            is_default: false,
            is_sensitive: SENSITIVE_BROKER_CONFIGS.contains(&name),
        };
        vec![
            entry("auto.create.topics.enable", self.auto_create_topics.to_string()),
            entry("broker.id", id.to_string()),
            entry("message.max.bytes", self.max_message_bytes.to_string()),
            entry("num.partitions", self.default_partitions.to_string()),
            entry("ssl.keystore.password", String::new()),
        ]
    }

    fn alter_configs(&mut self, req: AlterConfigsRequestData) -> AlterConfigsResponseData {
        let resources = req
            .resources
            .into_iter()
            .map(|alter| {
                let mut result = AlterConfigsResultData {
                    resource_type: alter.resource.resource_type,
                    name: alter.resource.name.clone(),
                    error_code: KafkaCode::None,
                    error_message: None,
                };
                if alter.resource.resource_type != ResourceType::Topic {
                    result.error_code = KafkaCode::InvalidRequest;
                    result.error_message = Some("Only topic configs can be altered".to_string());
                    return result;
                }
                if let Some((key, _)) = alter
                    .entries
                    .iter()
                    .find(|(k, _)| !TOPIC_CONFIG_DEFAULTS.iter().any(|(d, _)| d == k))
                {
                    result.error_code = KafkaCode::InvalidConfig;
                    result.error_message = Some(format!("Unknown topic config '{}'", key));
                    return result;
                }
                match self.topics.get_mut(&alter.resource.name) {
                    // Non-incremental: the given set replaces every override.
                    Some(topic) if !req.validate_only => {
                        topic.configs = alter
                            .entries
                            .into_iter()
                            .filter_map(|(k, v)| v.map(|v| (k, v)))
                            .collect();
                    }
                    Some(_) => {}
                    None => result.error_code = KafkaCode::UnknownTopicOrPartition,
                }
                result
            })
            .collect();
        AlterConfigsResponseData { resources }
    }

    fn delete_groups(&mut self, req: DeleteGroupsRequestData) -> DeleteGroupsResponseData {
        DeleteGroupsResponseData {
            results: req
                .groups
                .into_iter()
                .map(|group_id| {
                    let error_code = match self.groups.get(&group_id) {
                        None => KafkaCode::GroupIdNotFound,
                        Some(g) if g.phase != GroupPhase::Empty || !g.members.is_empty() => {
                            KafkaCode::NonEmptyGroup
                        }
                        Some(_) => {
                            self.groups.remove(&group_id);
                            KafkaCode::None
                        }
                    };
                    GroupErrorData {
                        group_id,
                        error_code,
                    }
                })
                .collect(),
        }
    }
}

fn topic_error(name: String, code: KafkaCode) -> TopicMetadataData {
    TopicMetadataData {
        error_code: code,
        name,
        is_internal: false,
        partitions: Vec::new(),
    }
}

fn has_errors(response: &FetchResponseData) -> bool {
    response.partitions.iter().any(|p| !p.error_code.is_ok())
}

/// Committed offsets for a group, used by cluster assertions.
pub fn committed(state: &ClusterState, group: &str, tp: &TopicPartition) -> Option<Offset> {
    state
        .groups
        .get(group)?
        .offsets
        .get(&(tp.topic.clone(), tp.partition))
        .copied()
}
