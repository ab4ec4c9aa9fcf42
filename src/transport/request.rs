//! Request data handed to the transport engine.
//!
//! These are the decoded, protocol-level payloads; framing, versioning and
//! broker routing are the engine's business.

use std::time::Duration;

use bytes::Bytes;

use crate::message::{Headers, Timestamp};
use crate::types::{CorrelationId, GenerationId, Offset, TopicPartition};

/// A request tagged with the id its response will carry.
#[derive(Debug, Clone)]
pub struct Request {
    pub correlation_id: CorrelationId,
    pub api: ApiRequest,
}

/// API identifier, used for logging, metrics and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiKey {
    Metadata,
    Produce,
    Fetch,
    ListOffsets,
    JoinGroup,
    Heartbeat,
    LeaveGroup,
    OffsetCommit,
    OffsetFetch,
    CreateTopics,
    DeleteTopics,
    CreatePartitions,
    DescribeConfigs,
    AlterConfigs,
    ListGroups,
    DescribeGroups,
    DeleteGroups,
}

impl ApiKey {
    pub fn name(self) -> &'static str {
        match self {
            ApiKey::Metadata => "metadata",
            ApiKey::Produce => "produce",
            ApiKey::Fetch => "fetch",
            ApiKey::ListOffsets => "list_offsets",
            ApiKey::JoinGroup => "join_group",
            ApiKey::Heartbeat => "heartbeat",
            ApiKey::LeaveGroup => "leave_group",
            ApiKey::OffsetCommit => "offset_commit",
            ApiKey::OffsetFetch => "offset_fetch",
            ApiKey::CreateTopics => "create_topics",
            ApiKey::DeleteTopics => "delete_topics",
            ApiKey::CreatePartitions => "create_partitions",
            ApiKey::DescribeConfigs => "describe_configs",
            ApiKey::AlterConfigs => "alter_configs",
            ApiKey::ListGroups => "list_groups",
            ApiKey::DescribeGroups => "describe_groups",
            ApiKey::DeleteGroups => "delete_groups",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ApiRequest {
    Metadata(MetadataRequestData),
    Produce(ProduceRequestData),
    Fetch(FetchRequestData),
    ListOffsets(ListOffsetsRequestData),
    JoinGroup(JoinGroupRequestData),
    Heartbeat(HeartbeatRequestData),
    LeaveGroup(LeaveGroupRequestData),
    OffsetCommit(OffsetCommitRequestData),
    OffsetFetch(OffsetFetchRequestData),
    CreateTopics(CreateTopicsRequestData),
    DeleteTopics(DeleteTopicsRequestData),
    CreatePartitions(CreatePartitionsRequestData),
    DescribeConfigs(DescribeConfigsRequestData),
    AlterConfigs(AlterConfigsRequestData),
    ListGroups,
    DescribeGroups(DescribeGroupsRequestData),
    DeleteGroups(DeleteGroupsRequestData),
}

impl ApiRequest {
    pub fn key(&self) -> ApiKey {
        match self {
            ApiRequest::Metadata(_) => ApiKey::Metadata,
            ApiRequest::Produce(_) => ApiKey::Produce,
            ApiRequest::Fetch(_) => ApiKey::Fetch,
            ApiRequest::ListOffsets(_) => ApiKey::ListOffsets,
            ApiRequest::JoinGroup(_) => ApiKey::JoinGroup,
            ApiRequest::Heartbeat(_) => ApiKey::Heartbeat,
            ApiRequest::LeaveGroup(_) => ApiKey::LeaveGroup,
            ApiRequest::OffsetCommit(_) => ApiKey::OffsetCommit,
            ApiRequest::OffsetFetch(_) => ApiKey::OffsetFetch,
            ApiRequest::CreateTopics(_) => ApiKey::CreateTopics,
            ApiRequest::DeleteTopics(_) => ApiKey::DeleteTopics,
            ApiRequest::CreatePartitions(_) => ApiKey::CreatePartitions,
            ApiRequest::DescribeConfigs(_) => ApiKey::DescribeConfigs,
            ApiRequest::AlterConfigs(_) => ApiKey::AlterConfigs,
            ApiRequest::ListGroups => ApiKey::ListGroups,
            ApiRequest::DescribeGroups(_) => ApiKey::DescribeGroups,
            ApiRequest::DeleteGroups(_) => ApiKey::DeleteGroups,
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MetadataRequestData {
    /// `None` requests every topic.
    pub topics: Option<Vec<String>>,
    pub allow_auto_topic_creation: bool,
}

// ============================================================================
// Produce
// ============================================================================

/// One batch for one partition.
#[derive(Debug, Clone)]
pub struct ProduceRequestData {
    pub acks: i16,
    pub timeout: Duration,
    pub topic: String,
    pub partition: i32,
    pub records: Vec<RecordData>,
}

#[derive(Debug, Clone)]
pub struct RecordData {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Headers,
    pub timestamp: Timestamp,
}

// ============================================================================
// Fetch / ListOffsets
// ============================================================================

#[derive(Debug, Clone)]
pub struct FetchRequestData {
    /// Long-poll bound when no partition has data.
    pub max_wait: Duration,
    /// Upper bound on records returned per partition.
    pub max_records: usize,
    pub partitions: Vec<FetchPartitionData>,
}

#[derive(Debug, Clone)]
pub struct FetchPartitionData {
    pub topic: String,
    pub partition: i32,
    /// May be [`Offset::BEGINNING`] or [`Offset::END`]; the engine resolves it.
    pub fetch_offset: Offset,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsRequestData {
    pub partitions: Vec<TopicPartition>,
}

// ============================================================================
// Groups
// ============================================================================

/// Join (or rejoin) a group. The coordinator assigns partitions for the
/// subscribed topics and answers once the generation is complete.
#[derive(Debug, Clone)]
pub struct JoinGroupRequestData {
    pub group_id: String,
    pub member_id: Option<String>,
    pub client_id: String,
    pub session_timeout: Duration,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatRequestData {
    pub group_id: String,
    pub member_id: String,
    pub generation_id: GenerationId,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupRequestData {
    pub group_id: String,
    pub member_id: String,
}

#[derive(Debug, Clone)]
pub struct OffsetCommitRequestData {
    pub group_id: String,
    /// [`GenerationId::INVALID`] for manually assigned consumers.
    pub generation_id: GenerationId,
    pub member_id: String,
    pub offsets: Vec<TopicPartition>,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchRequestData {
    pub group_id: String,
    pub partitions: Vec<TopicPartition>,
}

#[derive(Debug, Clone)]
pub struct DescribeGroupsRequestData {
    pub groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteGroupsRequestData {
    pub groups: Vec<String>,
}

// ============================================================================
// Topics and configs
// ============================================================================

/// Topic to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i16,
    pub configs: Vec<(String, String)>,
}

impl NewTopic {
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor,
            configs: Vec::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateTopicsRequestData {
    pub topics: Vec<NewTopic>,
    pub timeout: Duration,
    pub validate_only: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteTopicsRequestData {
    pub topics: Vec<String>,
    pub timeout: Duration,
}

/// New total partition count for an existing topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPartitions {
    pub topic: String,
    pub total_count: i32,
}

impl NewPartitions {
    pub fn new(topic: impl Into<String>, total_count: i32) -> Self {
        Self {
            topic: topic.into(),
            total_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePartitionsRequestData {
    pub topics: Vec<NewPartitions>,
    pub timeout: Duration,
    pub validate_only: bool,
}

/// Kind of resource a config belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Topic,
    Broker,
    Group,
}

/// A config-bearing resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigResource {
    pub resource_type: ResourceType,
    pub name: String,
}

impl ConfigResource {
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            resource_type: ResourceType::Topic,
            name: name.into(),
        }
    }

    pub fn broker(id: i32) -> Self {
        Self {
            resource_type: ResourceType::Broker,
            name: id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescribeConfigsRequestData {
    pub resources: Vec<ConfigResource>,
}

/// Replacement config set for one resource. `None` values reset to default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterConfig {
    pub resource: ConfigResource,
    pub entries: Vec<(String, Option<String>)>,
}

impl AlterConfig {
    pub fn new(resource: ConfigResource) -> Self {
        Self {
            resource,
            entries: Vec::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((key.into(), Some(value.into())));
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.entries.push((key.into(), None));
        self
    }
}

#[derive(Debug, Clone)]
pub struct AlterConfigsRequestData {
    pub resources: Vec<AlterConfig>,
    pub validate_only: bool,
}
