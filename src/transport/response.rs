//! Response data delivered by the transport engine.

use crate::error::KafkaCode;
use crate::message::Message;
use crate::transport::request::ResourceType;
use crate::types::{BrokerId, GenerationId, Offset, TopicPartition};

#[derive(Debug, Clone)]
pub enum ApiResponse {
    Metadata(MetadataResponseData),
    Produce(ProduceResponseData),
    Fetch(FetchResponseData),
    ListOffsets(ListOffsetsResponseData),
    JoinGroup(JoinGroupResponseData),
    Heartbeat(HeartbeatResponseData),
    LeaveGroup(LeaveGroupResponseData),
    OffsetCommit(OffsetCommitResponseData),
    OffsetFetch(OffsetFetchResponseData),
    CreateTopics(TopicsResponseData),
    DeleteTopics(TopicsResponseData),
    CreatePartitions(TopicsResponseData),
    DescribeConfigs(DescribeConfigsResponseData),
    AlterConfigs(AlterConfigsResponseData),
    ListGroups(ListGroupsResponseData),
    DescribeGroups(DescribeGroupsResponseData),
    DeleteGroups(DeleteGroupsResponseData),
}

// ============================================================================
// Metadata
// ============================================================================

#[derive(Debug, Clone)]
pub struct MetadataResponseData {
    pub brokers: Vec<BrokerData>,
    pub controller_id: BrokerId,
    pub topics: Vec<TopicMetadataData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerData {
    pub node_id: BrokerId,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TopicMetadataData {
    pub error_code: KafkaCode,
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<PartitionMetadataData>,
}

#[derive(Debug, Clone)]
pub struct PartitionMetadataData {
    pub error_code: KafkaCode,
    pub partition_index: i32,
    pub leader_id: BrokerId,
    pub replica_nodes: Vec<BrokerId>,
    pub isr_nodes: Vec<BrokerId>,
}

// ============================================================================
// Produce
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProduceResponseData {
    pub topic: String,
    pub partition: i32,
    pub error_code: KafkaCode,
    /// Offset of the first record; `-1` when acks=0.
    pub base_offset: Offset,
    /// Broker append time in ms, if the topic uses log-append time.
    pub log_append_time: Option<i64>,
}

// ============================================================================
// Fetch / ListOffsets
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FetchResponseData {
    pub partitions: Vec<FetchPartitionResponseData>,
}

#[derive(Debug, Clone)]
pub struct FetchPartitionResponseData {
    pub topic: String,
    pub partition: i32,
    pub error_code: KafkaCode,
    pub high_watermark: Offset,
    pub log_start_offset: Offset,
    /// The concrete offset the fetch started from (resolves special offsets).
    pub fetch_offset: Offset,
    /// Records with topic, partition and offset set.
    pub records: Vec<Message>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOffsetsResponseData {
    pub partitions: Vec<ListOffsetsPartitionResponseData>,
}

#[derive(Debug, Clone)]
pub struct ListOffsetsPartitionResponseData {
    pub topic: String,
    pub partition: i32,
    pub error_code: KafkaCode,
    pub log_start_offset: Offset,
    pub high_watermark: Offset,
}

// ============================================================================
// Groups
// ============================================================================

#[derive(Debug, Clone)]
pub struct JoinGroupResponseData {
    pub error_code: KafkaCode,
    pub generation_id: GenerationId,
    pub member_id: String,
    pub leader_id: String,
    /// Partitions assigned to this member for the new generation.
    pub assignment: Vec<TopicPartition>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatResponseData {
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone)]
pub struct LeaveGroupResponseData {
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone, Default)]
pub struct OffsetCommitResponseData {
    pub partitions: Vec<PartitionErrorData>,
}

#[derive(Debug, Clone)]
pub struct PartitionErrorData {
    pub topic: String,
    pub partition: i32,
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone)]
pub struct OffsetFetchResponseData {
    pub error_code: KafkaCode,
    /// Offsets are [`Offset::INVALID`] where nothing was committed.
    pub partitions: Vec<TopicPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedGroupData {
    pub group_id: String,
    pub protocol_type: String,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListGroupsResponseData {
    pub error_code: KafkaCode,
    pub groups: Vec<ListedGroupData>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMemberData {
    pub member_id: String,
    pub client_id: String,
    pub assignment: Vec<TopicPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedGroupData {
    pub error_code: KafkaCode,
    pub group_id: String,
    pub state: String,
    pub protocol_type: String,
    pub members: Vec<GroupMemberData>,
}

#[derive(Debug, Clone, Default)]
pub struct DescribeGroupsResponseData {
    pub groups: Vec<DescribedGroupData>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteGroupsResponseData {
    pub results: Vec<GroupErrorData>,
}

#[derive(Debug, Clone)]
pub struct GroupErrorData {
    pub group_id: String,
    pub error_code: KafkaCode,
}

// ============================================================================
// Topics and configs
// ============================================================================

/// Per-topic outcome shared by create/delete topics and create partitions.
#[derive(Debug, Clone, Default)]
pub struct TopicsResponseData {
    pub topics: Vec<TopicErrorData>,
}

#[derive(Debug, Clone)]
pub struct TopicErrorData {
    pub name: String,
    pub error_code: KafkaCode,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntryData {
    pub name: String,
    pub value: Option<String>,
    pub read_only: bool,
    pub is_default: bool,
    pub is_sensitive: bool,
}

#[derive(Debug, Clone)]
pub struct DescribeConfigsResultData {
    pub resource_type: ResourceType,
    pub name: String,
    pub error_code: KafkaCode,
    pub error_message: Option<String>,
    pub entries: Vec<ConfigEntryData>,
}

#[derive(Debug, Clone, Default)]
pub struct DescribeConfigsResponseData {
    pub resources: Vec<DescribeConfigsResultData>,
}

#[derive(Debug, Clone)]
pub struct AlterConfigsResultData {
    pub resource_type: ResourceType,
    pub name: String,
    pub error_code: KafkaCode,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlterConfigsResponseData {
    pub resources: Vec<AlterConfigsResultData>,
}
