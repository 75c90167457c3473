mod config;

use common::nats::NatsClient;
use common::postgres::{PostgresClient, PostgresTrackerRepository};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracker_ingester::{
    DeviceRegistry, LppTrackerParser, TrackerIngester, TrackerIngesterConfig,
};
use tracker_runner::{RunOutcome, Runner};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        namespace = config.namespace_id,
        otel_enabled = config.otel_enabled,
        "Starting tracker-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let (registry, ingester) =
        match tokio::time::timeout(startup_timeout, initialize(&config, startup_timeout)).await {
            Ok(Ok(initialized)) => initialized,
            Ok(Err(e)) => {
                error!(error = format!("{:#}", e), "Failed to initialize service");
                shutdown_telemetry(telemetry_providers);
                std::process::exit(1);
            }
            Err(_) => {
                error!(
                    timeout_secs = config.startup_timeout_secs,
                    "Service initialization timed out"
                );
                shutdown_telemetry(telemetry_providers);
                std::process::exit(1);
            }
        };

    let outcome = Runner::new()
        .with_boxed_process("uplink_ingester", ingester.into_runner_process())
        .with_closer("device_registry", move || async move {
            info!("Draining write queues");
            registry.shutdown().await;
            Ok(())
        })
        .with_closer("telemetry", move || async move {
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(
            Duration::from_secs(config.write_queue_stop_grace_secs) * 2 + Duration::from_secs(5),
        )
        .run()
        .await;

    if let RunOutcome::Failed(process, e) = &outcome {
        eprintln!("Process {} failed: {:#}", process, e);
    }
    std::process::exit(outcome.exit_code());
}

async fn initialize(
    config: &ServiceConfig,
    nats_timeout: Duration,
) -> anyhow::Result<(Arc<DeviceRegistry>, TrackerIngester)> {
    info!("Initializing PostgreSQL...");
    let postgres_client = PostgresClient::new(&config.postgres())?;
    postgres_client.ping().await?;

    let registry = Arc::new(DeviceRegistry::new(
        config.namespace_id,
        Arc::new(PostgresTrackerRepository::new(postgres_client)),
        Arc::new(LppTrackerParser::new()),
        config.write_queue(),
    ));
    registry.init().await?;
    info!(devices = registry.len(), "Device registry ready");

    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(&config.nats_url, nats_timeout).await?;
    let ingester = TrackerIngester::new(
        registry.clone(),
        &nats_client,
        TrackerIngesterConfig {
            uplink_stream: config.nats_uplink_stream.clone(),
            uplink_subject: config.nats_uplink_subject.clone(),
            consumer_name: config.nats_consumer_name.clone(),
            batch_size: config.nats_batch_size,
            batch_wait_secs: config.nats_batch_wait_secs,
        },
    )
    .await?;

    Ok((registry, ingester))
}
