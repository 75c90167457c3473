use crate::domain::{DeviceIdentity, DomainResult, NamespaceId, Sequence, TelemetryMessage};
use async_trait::async_trait;

/// Input for upserting a batch of device identities
#[derive(Debug, Clone)]
pub struct UpsertDevicesInput {
    pub namespace: NamespaceId,
    pub devices: Vec<DeviceIdentity>,
}

/// Input for inserting a batch of telemetry messages
#[derive(Debug, Clone)]
pub struct InsertMessagesInput {
    pub namespace: NamespaceId,
    pub messages: Vec<TelemetryMessage>,
}

/// Input for a sequence-range message query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessagesInput {
    pub namespace: NamespaceId,
    pub device_ids: Vec<i64>,
    /// Inclusive lower bound
    pub from: Sequence,
    /// Inclusive upper bound
    pub to: Sequence,
    /// Maximum number of rows across all devices
    pub limit: i64,
}

/// Repository trait for tracker identity and message storage
/// Infrastructure layer (e.g., common::postgres) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TrackerRepository: Send + Sync {
    /// Create the namespace's tables and indexes if they do not exist
    async fn ensure_schema(&self, namespace: NamespaceId) -> DomainResult<()>;

    /// Load the ids of every device stored for the namespace
    async fn load_device_ids(&self, namespace: NamespaceId) -> DomainResult<Vec<i64>>;

    /// Idempotently register a batch of identities in one statement
    async fn upsert_devices(&self, input: UpsertDevicesInput) -> DomainResult<()>;

    /// Append a batch of messages in one statement
    async fn insert_messages(&self, input: InsertMessagesInput) -> DomainResult<()>;

    /// Messages for the given devices within the sequence range, ascending by sequence
    async fn query_messages(&self, input: QueryMessagesInput)
        -> DomainResult<Vec<TelemetryMessage>>;

    /// Highest sequence value stored for the namespace
    async fn latest_sequence(&self, namespace: NamespaceId) -> DomainResult<Option<Sequence>>;
}
