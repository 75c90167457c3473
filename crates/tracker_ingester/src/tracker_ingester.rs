use crate::domain::DeviceRegistry;
use crate::nats::create_uplink_processor;
use common::nats::{NatsClient, NatsConsumer, NatsConsumerConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct TrackerIngesterConfig {
    pub uplink_stream: String,
    pub uplink_subject: String,
    pub consumer_name: String,
    pub batch_size: usize,
    pub batch_wait_secs: u64,
}

type ProcessFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Long-running process body handed to the runner
pub type IngesterProcess = Box<dyn FnOnce(CancellationToken) -> ProcessFuture + Send>;

/// Uplink consumer wired to a device registry
pub struct TrackerIngester {
    registry: Arc<DeviceRegistry>,
    consumer: NatsConsumer,
}

impl TrackerIngester {
    pub async fn new(
        registry: Arc<DeviceRegistry>,
        nats_client: &NatsClient,
        config: TrackerIngesterConfig,
    ) -> anyhow::Result<Self> {
        info!(
            namespace = registry.namespace(),
            stream = %config.uplink_stream,
            "Initializing tracker ingester"
        );

        nats_client
            .ensure_stream(&config.uplink_stream, &config.uplink_subject)
            .await?;

        let consumer = NatsConsumer::new(
            nats_client.jetstream(),
            NatsConsumerConfig {
                stream_name: config.uplink_stream,
                consumer_name: config.consumer_name,
                subject_filter: config.uplink_subject,
                batch_size: config.batch_size,
                max_wait: Duration::from_secs(config.batch_wait_secs),
            },
            create_uplink_processor(registry.clone()),
        )
        .await?;

        info!("Tracker ingester initialized");
        Ok(Self { registry, consumer })
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    pub fn into_runner_process(self) -> IngesterProcess {
        let consumer = self.consumer;
        Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }))
    }
}
