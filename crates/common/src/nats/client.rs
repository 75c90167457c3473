use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use std::time::Duration;
use tracing::info;

pub struct NatsClient {
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Successfully connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    /// Create the stream if it is missing, capturing `subject`
    pub async fn ensure_stream(&self, stream_name: &str, subject: &str) -> Result<()> {
        info!(stream = %stream_name, subject = %subject, "Ensuring stream exists");

        if self.jetstream.get_stream(stream_name).await.is_ok() {
            info!(stream = %stream_name, "Stream already exists");
            return Ok(());
        }

        self.jetstream
            .create_stream(StreamConfig {
                name: stream_name.to_string(),
                subjects: vec![subject.to_string()],
                description: Some("Tracker uplink envelopes".to_string()),
                ..Default::default()
            })
            .await
            .context("Failed to create stream")?;

        info!(stream = %stream_name, "Created stream");
        Ok(())
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }
}
