//! Admin core.
//!
//! Every operation submits one request and returns an [`AdminFuture`] tied to
//! its correlation id. Responses are routed into the future's slot by
//! whichever thread drains the client's event queue: [`AdminClient::poll`],
//! [`AdminFuture::wait`] (which drives the queue itself), or an `.await` on
//! the future. Any number of operations may be in flight; each resolves on
//! its own.
//!
//! A request that gets no answer within its `request_timeout` resolves with
//! [`Error::Timeout`]. Whatever the broker did in the meantime is not rolled
//! back, and the late response is dropped.
//!
//! ```no_run
//! use kafkaesque_client::admin::{AdminClient, AdminOptions};
//! use kafkaesque_client::config::ClientConfig;
//! use kafkaesque_client::transport::NewTopic;
//! use kafkaesque_client::transport::mock::MockCluster;
//!
//! let cluster = MockCluster::new(3);
//! let mut config = ClientConfig::new();
//! config.set("bootstrap.servers", cluster.bootstrap_servers()).unwrap();
//! let admin = AdminClient::new(config, cluster.connect()).unwrap();
//!
//! let results = admin
//!     .create_topics(&[NewTopic::new("orders", 6, 3)], &AdminOptions::new())
//!     .unwrap()
//!     .wait()
//!     .unwrap();
//! for result in results {
//!     match result {
//!         Ok(topic) => println!("created {}", topic),
//!         Err((topic, e)) => println!("{} failed: {}", topic, e),
//!     }
//! }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, trace, warn};

use crate::client::ClientCore;
use crate::config::ClientConfig;
use crate::constants::{ADMIN_FUTURE_PAUSE_MS, MAX_POLL_TICK_MS};
use crate::context::{ClientContext, DefaultContext};
use crate::error::{Error, KafkaCode, Result};
use crate::event::Event;
use crate::metadata::MetadataSnapshot;
use crate::metrics;
use crate::transport::{
    AlterConfig, AlterConfigsRequestData, ApiRequest, ApiResponse, ConfigEntryData, ConfigResource,
    CreatePartitionsRequestData, CreateTopicsRequestData, DeleteGroupsRequestData,
    DeleteTopicsRequestData, DescribeConfigsRequestData, DescribeGroupsRequestData, NewPartitions,
    NewTopic, TopicsResponseData, Transport,
};
use crate::types::{Timeout, TopicPartition};
use crate::validation::{validate_group_id, validate_topic_name};

/// Outcome for one topic: its name, or the name with the error.
pub type TopicResult = std::result::Result<String, (String, Error)>;

/// Outcome for one group.
pub type GroupResult = std::result::Result<String, (String, Error)>;

/// Outcome of altering one resource's configuration.
pub type AlterConfigResult = std::result::Result<ConfigResource, (ConfigResource, Error)>;

/// Outcome of describing one resource's configuration.
pub type ConfigResult = std::result::Result<ResourceConfig, (ConfigResource, Error)>;

/// Outcome of describing one group.
pub type GroupDescriptionResult = std::result::Result<GroupDescription, (String, Error)>;

/// Per-call admin options.
#[derive(Debug, Clone, Default)]
pub struct AdminOptions {
    request_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    validate_only: bool,
}

impl AdminOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait for the response. Defaults to `request.timeout.ms`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// How long the broker may take to apply a topic change before replying.
    /// Defaults to the request timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Ask the broker to check the request without applying it.
    pub fn validate_only(mut self, validate_only: bool) -> Self {
        self.validate_only = validate_only;
        self
    }

    fn timeouts(&self, config: &ClientConfig) -> (Duration, Duration) {
        let request = self.request_timeout.unwrap_or(config.request_timeout);
        (request, self.operation_timeout.unwrap_or(request))
    }
}

/// Configuration of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    pub resource: ConfigResource,
    pub entries: Vec<ConfigEntryData>,
}

impl ResourceConfig {
    pub fn get(&self, name: &str) -> Option<&ConfigEntryData> {
        self.entries.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupListing {
    pub group_id: String,
    pub protocol_type: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub member_id: String,
    pub client_id: String,
    pub assignment: Vec<TopicPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDescription {
    pub group_id: String,
    pub state: String,
    pub protocol_type: String,
    pub members: Vec<GroupMember>,
}

type Convert<T> = fn(ApiResponse) -> Result<T>;

/// A pending admin operation.
///
/// Resolve it with [`wait`](Self::wait), by awaiting it, or by calling
/// [`AdminClient::poll`] and then [`try_result`](Self::try_result).
#[must_use = "an admin future does nothing unless resolved"]
pub struct AdminFuture<T> {
    core: Arc<ClientCore>,
    rx: oneshot::Receiver<Result<ApiResponse>>,
    convert: Convert<T>,
    operation: &'static str,
    _result: PhantomData<fn() -> T>,
}

impl<T> AdminFuture<T> {
    fn finish(&self, response: Result<ApiResponse>) -> Result<T> {
        let result = response.and_then(self.convert);
        metrics::record_admin(self.operation, result.is_ok());
        match &result {
            Ok(_) => debug!(operation = self.operation, "Admin operation completed"),
            Err(e) => warn!(operation = self.operation, error = %e, "Admin operation failed"),
        }
        result
    }

    /// The result, if the response has already been routed.
    pub fn try_result(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(response) => Some(self.finish(response)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(self.finish(Err(Error::Destroyed))),
        }
    }

    /// Block until the operation resolves, draining the event queue while
    /// no other thread is polling it.
    pub fn wait(mut self) -> Result<T> {
        let tick = Duration::from_millis(MAX_POLL_TICK_MS);
        loop {
            if let Some(result) = self.try_result() {
                return result;
            }
            match self.core.queue.try_enter() {
                Some(_guard) => {
                    self.core.queue.pump(tick);
                }
                // Another thread is draining and will route our response.
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
    }
}

impl<T> Future for AdminFuture<T> {
    type Output = Result<T>;

    /// Routes whatever is already queued, then checks the reply slot.
    ///
    /// There is no background thread driving the queue, so a pending future
    /// asks to be polled again. Before that it blocks the executor thread for
    /// up to 5 ms, waiting on the queue or on whichever thread is draining it.
    /// An awaited operation therefore costs one short blocking wait per poll
    /// instead of a busy loop. Prefer [`wait`](AdminFuture::wait) on a
    /// dedicated thread when executor latency matters.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(_guard) = this.core.queue.try_enter() {
            this.core.queue.pump(Duration::ZERO);
        }
        if let Poll::Ready(response) = Pin::new(&mut this.rx).poll(cx) {
            return Poll::Ready(this.finish(response.unwrap_or(Err(Error::Destroyed))));
        }

        let pause = Duration::from_millis(ADMIN_FUTURE_PAUSE_MS);
        match this.core.queue.try_enter() {
            Some(_guard) => {
                this.core.queue.pump(pause);
            }
            None => std::thread::sleep(pause),
        }
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(response) => Poll::Ready(this.finish(response.unwrap_or(Err(Error::Destroyed)))),
            Poll::Pending => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for AdminFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminFuture")
            .field("operation", &self.operation)
            .finish()
    }
}

/// Cluster management client.
pub struct AdminClient<C: ClientContext = DefaultContext> {
    core: Arc<ClientCore>,
    context: C,
}

impl AdminClient<DefaultContext> {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        Self::with_context(config, transport, DefaultContext)
    }
}

impl<C: ClientContext> AdminClient<C> {
    pub fn with_context(config: ClientConfig, transport: impl Transport + 'static, context: C) -> Result<Self> {
        let core = ClientCore::new(config, Box::new(transport))?;
        Ok(Self {
            core: Arc::new(core),
            context,
        })
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    fn submit<T>(
        &self,
        request: ApiRequest,
        timeout: Duration,
        operation: &'static str,
        convert: Convert<T>,
    ) -> Result<AdminFuture<T>> {
        let rx = self.core.request_future(request, timeout, operation)?;
        Ok(AdminFuture {
            core: Arc::clone(&self.core),
            rx,
            convert,
            operation,
            _result: PhantomData,
        })
    }

    /// Create topics. Each entry resolves to the topic name or its error.
    pub fn create_topics(&self, topics: &[NewTopic], options: &AdminOptions) -> Result<AdminFuture<Vec<TopicResult>>> {
        non_empty(topics, "topics")?;
        for topic in topics {
            validate_topic_name(&topic.name)?;
            if topic.num_partitions < 1 {
                return Err(Error::InvalidState(format!(
                    "topic '{}' needs at least one partition",
                    topic.name
                )));
            }
        }
        let (timeout, operation_timeout) = options.timeouts(&self.core.config);
        let request = ApiRequest::CreateTopics(CreateTopicsRequestData {
            topics: topics.to_vec(),
            timeout: operation_timeout,
            validate_only: options.validate_only,
        });
        info!(count = topics.len(), validate_only = options.validate_only, "Creating topics");
        self.core.metadata.mark_stale();
        self.submit(request, timeout, "create_topics", |r| match r {
            ApiResponse::CreateTopics(data) => Ok(topic_results(data)),
            _ => Err(unexpected("create_topics")),
        })
    }

    pub fn delete_topics(&self, topics: &[&str], options: &AdminOptions) -> Result<AdminFuture<Vec<TopicResult>>> {
        non_empty(topics, "topics")?;
        for topic in topics {
            validate_topic_name(topic)?;
        }
        let (timeout, operation_timeout) = options.timeouts(&self.core.config);
        let request = ApiRequest::DeleteTopics(DeleteTopicsRequestData {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            timeout: operation_timeout,
        });
        info!(topics = ?topics, "Deleting topics");
        self.core.metadata.mark_stale();
        self.submit(request, timeout, "delete_topics", |r| match r {
            ApiResponse::DeleteTopics(data) => Ok(topic_results(data)),
            _ => Err(unexpected("delete_topics")),
        })
    }

    /// Grow topics to a new total partition count.
    pub fn create_partitions(
        &self,
        partitions: &[NewPartitions],
        options: &AdminOptions,
    ) -> Result<AdminFuture<Vec<TopicResult>>> {
        non_empty(partitions, "partitions")?;
        for np in partitions {
            validate_topic_name(&np.topic)?;
        }
        let (timeout, operation_timeout) = options.timeouts(&self.core.config);
        let request = ApiRequest::CreatePartitions(CreatePartitionsRequestData {
            topics: partitions.to_vec(),
            timeout: operation_timeout,
            validate_only: options.validate_only,
        });
        self.core.metadata.mark_stale();
        self.submit(request, timeout, "create_partitions", |r| match r {
            ApiResponse::CreatePartitions(data) => Ok(topic_results(data)),
            _ => Err(unexpected("create_partitions")),
        })
    }

    pub fn describe_configs(
        &self,
        resources: &[ConfigResource],
        options: &AdminOptions,
    ) -> Result<AdminFuture<Vec<ConfigResult>>> {
        non_empty(resources, "resources")?;
        let (timeout, _) = options.timeouts(&self.core.config);
        let request = ApiRequest::DescribeConfigs(DescribeConfigsRequestData {
            resources: resources.to_vec(),
        });
        self.submit(request, timeout, "describe_configs", |r| {
            let ApiResponse::DescribeConfigs(data) = r else {
                return Err(unexpected("describe_configs"));
            };
            Ok(data
                .resources
                .into_iter()
                .map(|res| {
                    let resource = ConfigResource {
                        resource_type: res.resource_type,
                        name: res.name,
                    };
                    if res.error_code.is_ok() {
                        Ok(ResourceConfig {
                            resource,
                            entries: res.entries,
                        })
                    } else {
                        Err((resource, item_error(res.error_code, res.error_message.as_deref())))
                    }
                })
                .collect())
        })
    }

    /// Replace the configuration of resources. Keys left out revert to
    /// their defaults.
    pub fn alter_configs(
        &self,
        configs: &[AlterConfig],
        options: &AdminOptions,
    ) -> Result<AdminFuture<Vec<AlterConfigResult>>> {
        non_empty(configs, "configs")?;
        let (timeout, _) = options.timeouts(&self.core.config);
        let request = ApiRequest::AlterConfigs(AlterConfigsRequestData {
            resources: configs.to_vec(),
            validate_only: options.validate_only,
        });
        self.submit(request, timeout, "alter_configs", |r| {
            let ApiResponse::AlterConfigs(data) = r else {
                return Err(unexpected("alter_configs"));
            };
            Ok(data
                .resources
                .into_iter()
                .map(|res| {
                    let resource = ConfigResource {
                        resource_type: res.resource_type,
                        name: res.name,
                    };
                    if res.error_code.is_ok() {
                        Ok(resource)
                    } else {
                        Err((resource, item_error(res.error_code, res.error_message.as_deref())))
                    }
                })
                .collect())
        })
    }

    pub fn list_groups(&self, options: &AdminOptions) -> Result<AdminFuture<Vec<GroupListing>>> {
        let (timeout, _) = options.timeouts(&self.core.config);
        self.submit(ApiRequest::ListGroups, timeout, "list_groups", |r| {
            let ApiResponse::ListGroups(data) = r else {
                return Err(unexpected("list_groups"));
            };
            if !data.error_code.is_ok() {
                return Err(Error::from_code(data.error_code));
            }
            let mut groups: Vec<GroupListing> = data
                .groups
                .into_iter()
                .map(|g| GroupListing {
                    group_id: g.group_id,
                    protocol_type: g.protocol_type,
                    state: g.state,
                })
                .collect();
            groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
            Ok(groups)
        })
    }

    pub fn describe_groups(
        &self,
        groups: &[&str],
        options: &AdminOptions,
    ) -> Result<AdminFuture<Vec<GroupDescriptionResult>>> {
        non_empty(groups, "groups")?;
        for group in groups {
            validate_group_id(group)?;
        }
        let (timeout, _) = options.timeouts(&self.core.config);
        let request = ApiRequest::DescribeGroups(DescribeGroupsRequestData {
            groups: groups.iter().map(|g| g.to_string()).collect(),
        });
        self.submit(request, timeout, "describe_groups", |r| {
            let ApiResponse::DescribeGroups(data) = r else {
                return Err(unexpected("describe_groups"));
            };
            Ok(data
                .groups
                .into_iter()
                .map(|g| {
                    if !g.error_code.is_ok() {
                        return Err((g.group_id, Error::from_code(g.error_code)));
                    }
                    Ok(GroupDescription {
                        group_id: g.group_id,
                        state: g.state,
                        protocol_type: g.protocol_type,
                        members: g
                            .members
                            .into_iter()
                            .map(|m| GroupMember {
                                member_id: m.member_id,
                                client_id: m.client_id,
                                assignment: m.assignment,
                            })
                            .collect(),
                    })
                })
                .collect())
        })
    }

    /// Delete groups. Only groups without active members can be deleted.
    pub fn delete_groups(&self, groups: &[&str], options: &AdminOptions) -> Result<AdminFuture<Vec<GroupResult>>> {
        non_empty(groups, "groups")?;
        for group in groups {
            validate_group_id(group)?;
        }
        let (timeout, _) = options.timeouts(&self.core.config);
        let request = ApiRequest::DeleteGroups(DeleteGroupsRequestData {
            groups: groups.iter().map(|g| g.to_string()).collect(),
        });
        self.submit(request, timeout, "delete_groups", |r| {
            let ApiResponse::DeleteGroups(data) = r else {
                return Err(unexpected("delete_groups"));
            };
            Ok(data
                .results
                .into_iter()
                .map(|g| {
                    if g.error_code.is_ok() {
                        Ok(g.group_id)
                    } else {
                        Err((g.group_id, Error::from_code(g.error_code)))
                    }
                })
                .collect())
        })
    }

    /// Drain the event queue: resolve pending futures and run the error and
    /// stats callbacks. Returns the number of events processed.
    pub fn poll(&self, timeout: impl Into<Timeout>) -> Result<usize> {
        self.core.ensure_open()?;
        self.core.queue.poll(timeout.into(), |event| match event {
            Event::Response { correlation_id, .. } => {
                trace!(correlation_id = %correlation_id, "Discarding late admin response");
            }
            Event::Error { code, reason, fatal } => {
                let error = self.core.engine_error(code, &reason, fatal);
                self.context.error(error, &reason);
            }
            Event::Stats(json) => self.core.deliver_stats(&self.context, &json),
        })
    }

    pub fn fetch_metadata(&self, topic: Option<&str>, timeout: Duration) -> Result<Arc<MetadataSnapshot>> {
        self.core.ensure_open()?;
        let topics = topic.map(|t| vec![t.to_string()]);
        self.core.fetch_metadata(topics.as_deref(), timeout)
    }

    /// Resolve every pending future with [`Error::Destroyed`] and close the
    /// transport.
    pub fn close(&self) {
        self.core.close();
    }
}

impl<C: ClientContext> Drop for AdminClient<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: ClientContext> std::fmt::Debug for AdminClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminClient").field("core", &self.core).finish()
    }
}

fn non_empty<T>(items: &[T], what: &str) -> Result<()> {
    if items.is_empty() {
        return Err(Error::InvalidState(format!("no {} given", what)));
    }
    Ok(())
}

fn item_error(code: KafkaCode, message: Option<&str>) -> Error {
    if let Some(message) = message {
        debug!(code = ?code, message, "Broker rejected admin item");
    }
    Error::from_code(code)
}

fn topic_results(data: TopicsResponseData) -> Vec<TopicResult> {
    data.topics
        .into_iter()
        .map(|t| {
            if t.error_code.is_ok() {
                Ok(t.name)
            } else {
                let error = item_error(t.error_code, t.error_message.as_deref());
                Err((t.name, error))
            }
        })
        .collect()
}

fn unexpected(operation: &str) -> Error {
    Error::Transport(format!("unexpected response to {}", operation))
}
