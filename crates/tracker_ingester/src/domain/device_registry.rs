use crate::domain::device_search::{search_key, SearchKey};
use crate::domain::{
    FlushAction, QueueError, TelemetryParser, WriteQueue, WriteQueueConfig, TRACKER_PARSER_PROFILE,
};
use chrono::{DateTime, Utc};
use common::domain::{
    DeviceIdentity, DomainError, DomainResult, Eui64, InsertMessagesInput, NamespaceId,
    QueryMessagesInput, Sequence, TelemetryMessage, TrackerRepository, UpsertDevicesInput,
    UplinkEnvelope,
};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on rows returned by a single `messages_for` call
pub const MAX_MESSAGES_PER_QUERY: i64 = 8192;

/// What happened to one inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not an uplink
    Ignored,
    /// Bad address or malformed payload
    ParseFailed,
    /// Parser had nothing to decode
    NotApplicable,
    Stored {
        device: DeviceIdentity,
        /// The identity was first seen with this message
        created: bool,
    },
    /// Registry is shutting down
    Rejected,
}

type DeviceBatch = BTreeMap<i64, DeviceIdentity>;
type MessageBatch = Vec<TelemetryMessage>;

#[derive(Default)]
struct Identities {
    by_id: BTreeMap<i64, DeviceIdentity>,
    // Pagination view; stale whenever its length differs from `by_id`
    view: Vec<DeviceIdentity>,
}

impl Identities {
    fn view(&mut self) -> &[DeviceIdentity] {
        if self.view.len() != self.by_id.len() {
            self.view = self.by_id.values().cloned().collect();
        }
        &self.view
    }
}

/// In-memory identity map for one namespace, backed by two write queues
///
/// Identity resolution and ingestion only touch memory and enqueue; durable
/// writes happen on the queues' background flushers.
pub struct DeviceRegistry {
    namespace: NamespaceId,
    repository: Arc<dyn TrackerRepository>,
    parser: Arc<dyn TelemetryParser>,
    identities: Mutex<Identities>,
    device_queue: WriteQueue<DeviceBatch>,
    message_queue: WriteQueue<MessageBatch>,
}

impl DeviceRegistry {
    pub fn new(
        namespace: NamespaceId,
        repository: Arc<dyn TrackerRepository>,
        parser: Arc<dyn TelemetryParser>,
        config: WriteQueueConfig,
    ) -> Self {
        let repo = repository.clone();
        let flush_devices: FlushAction<DeviceBatch> = Arc::new(move |batch: DeviceBatch| {
            let repo = repo.clone();
            Box::pin(async move {
                repo.upsert_devices(UpsertDevicesInput {
                    namespace,
                    devices: batch.into_values().collect(),
                })
                .await?;
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        });

        let repo = repository.clone();
        let flush_messages: FlushAction<MessageBatch> = Arc::new(move |batch: MessageBatch| {
            let repo = repo.clone();
            Box::pin(async move {
                repo.insert_messages(InsertMessagesInput {
                    namespace,
                    messages: batch,
                })
                .await?;
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        });

        Self {
            namespace,
            repository,
            parser,
            identities: Mutex::new(Identities::default()),
            device_queue: WriteQueue::new("devices", config.clone(), flush_devices),
            message_queue: WriteQueue::new("messages", config, flush_messages),
        }
    }

    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    fn identities(&self) -> MutexGuard<'_, Identities> {
        self.identities.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create the namespace schema, load stored identities and start flushing
    #[instrument(skip(self), fields(namespace = self.namespace))]
    pub async fn init(&self) -> DomainResult<()> {
        self.repository.ensure_schema(self.namespace).await?;
        let ids = self.repository.load_device_ids(self.namespace).await?;

        let loaded = ids.len();
        {
            let mut identities = self.identities();
            for id in ids {
                identities
                    .by_id
                    .insert(id, DeviceIdentity::from_id(id, self.namespace));
            }
        }

        self.device_queue.start();
        self.message_queue.start();

        info!(namespace = self.namespace, loaded, "device registry initialized");
        Ok(())
    }

    /// Stop both queues, flushing everything accepted so far
    ///
    /// Both queues close before either drains, so no uplink can register an
    /// identity and then lose its message to a closed queue.
    #[instrument(skip(self), fields(namespace = self.namespace))]
    pub async fn shutdown(&self) {
        self.device_queue.close();
        self.message_queue.close();
        self.device_queue.stop().await;
        self.message_queue.stop().await;
        info!(namespace = self.namespace, "device registry shut down");
    }

    // Map lock is held across the enqueue so two callers cannot both create
    fn resolve(&self, address: Eui64) -> Result<(DeviceIdentity, bool), QueueError> {
        let mut identities = self.identities();
        if let Some(existing) = identities.by_id.get(&address.id()) {
            return Ok((existing.clone(), false));
        }

        let identity = DeviceIdentity::new(address, self.namespace);
        self.device_queue.enqueue(|batch| {
            batch.insert(identity.id(), identity.clone());
        })?;
        identities.by_id.insert(identity.id(), identity.clone());

        debug!(device = %identity, "registered new device");
        Ok((identity, true))
    }

    /// Identity for `address`, registering it if unseen
    pub fn get_or_create(&self, address: Eui64) -> DomainResult<DeviceIdentity> {
        self.resolve(address)
            .map(|(identity, _)| identity)
            .map_err(|e| DomainError::RepositoryError(e.into()))
    }

    /// Register a new identity, failing if the id is already known
    pub fn add(&self, address: Eui64) -> DomainResult<DeviceIdentity> {
        let mut identities = self.identities();
        if identities.by_id.contains_key(&address.id()) {
            return Err(DomainError::IdentityConflict(address.to_string()));
        }

        let identity = DeviceIdentity::new(address, self.namespace);
        self.device_queue
            .enqueue(|batch| {
                batch.insert(identity.id(), identity.clone());
            })
            .map_err(|e| DomainError::RepositoryError(e.into()))?;
        identities.by_id.insert(identity.id(), identity.clone());

        Ok(identity)
    }

    pub fn lookup(&self, address: Eui64) -> Option<DeviceIdentity> {
        self.identities().by_id.get(&address.id()).cloned()
    }

    /// Known identities among `ids`, ascending by id
    pub fn filter(&self, ids: &[i64]) -> Vec<DeviceIdentity> {
        let identities = self.identities();
        let mut found: Vec<DeviceIdentity> = ids
            .iter()
            .filter_map(|id| identities.by_id.get(id).cloned())
            .collect();
        found.sort_by_key(|d| d.id());
        found.dedup_by_key(|d| d.id());
        found
    }

    /// Page of identities ordered by id
    pub fn list(&self, offset: usize, count: usize) -> Vec<DeviceIdentity> {
        let mut identities = self.identities();
        identities
            .view()
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.identities().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a label scan, partial or full address to a known identity
    ///
    /// Partial matches go to the lowest id whose address ends with the query.
    pub fn search(&self, query: &str) -> Option<DeviceIdentity> {
        let key = search_key(query)?;
        let identities = self.identities();
        match key {
            SearchKey::Address(address) => identities.by_id.get(&address.id()).cloned(),
            SearchKey::Suffix(suffix) => identities
                .by_id
                .values()
                .find(|d| d.address().to_string().ends_with(&suffix))
                .cloned(),
        }
    }

    /// Decode one envelope and queue the resulting identity and message
    ///
    /// Never fails; every failure is logged and reported as an outcome.
    #[instrument(skip(self, envelope), fields(dev_eui = %envelope.dev_eui))]
    pub async fn ingest(&self, envelope: &UplinkEnvelope) -> IngestOutcome {
        if !envelope.is_uplink() {
            debug!(class = ?envelope.class, "ignoring non-uplink message");
            return IngestOutcome::Ignored;
        }

        let address = match Eui64::parse(&envelope.dev_eui) {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "uplink with undecodable device address");
                return IngestOutcome::ParseFailed;
            }
        };

        let known = self.lookup(address).is_some();
        let message = match self
            .parser
            .parse(TRACKER_PARSER_PROFILE, address.id(), envelope)
            .await
        {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!(device_id = address.id(), known, "no telemetry decoded from uplink");
                return IngestOutcome::NotApplicable;
            }
            Err(e) => {
                error!(device_id = address.id(), known, error = %e, "failed to parse uplink");
                return IngestOutcome::ParseFailed;
            }
        };

        let stored = self.resolve(address).and_then(|(device, created)| {
            self.message_queue.enqueue(|batch| batch.push(message))?;
            Ok(IngestOutcome::Stored { device, created })
        });

        match stored {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(device_id = address.id(), error = %e, "rejected uplink");
                IngestOutcome::Rejected
            }
        }
    }

    /// Stored messages of the known `ids` received within `[from, to]`
    ///
    /// Ascending by sequence per device, at most [`MAX_MESSAGES_PER_QUERY`]
    /// rows overall.
    #[instrument(skip(self, ids), fields(namespace = self.namespace, requested = ids.len()))]
    pub async fn messages_for(
        &self,
        ids: &[i64],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<BTreeMap<i64, Vec<TelemetryMessage>>> {
        let known: Vec<i64> = self.filter(ids).iter().map(|d| d.id()).collect();
        if known.is_empty() {
            return Ok(BTreeMap::new());
        }

        let rows = self
            .repository
            .query_messages(QueryMessagesInput {
                namespace: self.namespace,
                device_ids: known,
                from: Sequence::from_datetime(from),
                to: Sequence::from_datetime(to),
                limit: MAX_MESSAGES_PER_QUERY,
            })
            .await?;

        let mut grouped: BTreeMap<i64, Vec<TelemetryMessage>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.device_id).or_default().push(row);
        }
        Ok(grouped)
    }

    pub async fn latest_sequence(&self) -> DomainResult<Option<Sequence>> {
        self.repository.latest_sequence(self.namespace).await
    }
}
