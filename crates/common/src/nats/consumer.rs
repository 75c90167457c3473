use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::PullConsumer, AckKind, Message};
use futures::{future::BoxFuture, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of processing a batch of messages
/// Provides fine-grained control over which messages to acknowledge vs reject
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Indices of messages to acknowledge (Ack)
    pub ack: Vec<usize>,
    /// Indices of messages to reject (Nak) with optional error details
    pub nak: Vec<(usize, Option<String>)>,
}

impl ProcessingResult {
    pub fn ack_all(count: usize) -> Self {
        Self {
            ack: (0..count).collect(),
            nak: Vec::new(),
        }
    }

    pub fn nak_all(count: usize, error: Option<String>) -> Self {
        Self {
            ack: Vec::new(),
            nak: (0..count).map(|i| (i, error.clone())).collect(),
        }
    }
}

/// Message handed to a [`BatchProcessor`], detached from the NATS ack handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Batch processor function
/// Indices in the returned ProcessingResult refer to positions in the input batch
pub type BatchProcessor =
    Box<dyn Fn(Vec<ConsumedMessage>) -> BoxFuture<'static, Result<ProcessingResult>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct NatsConsumerConfig {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject_filter: String,
    pub batch_size: usize,
    pub max_wait: Duration,
}

/// NATS JetStream pull consumer that hands batches to a processor
/// and settles each message according to the processor's result
pub struct NatsConsumer {
    consumer: PullConsumer,
    config: NatsConsumerConfig,
    processor: BatchProcessor,
}

impl NatsConsumer {
    pub async fn new(
        jetstream: &jetstream::Context,
        config: NatsConsumerConfig,
        processor: BatchProcessor,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            subject = %config.subject_filter,
            "Creating JetStream consumer"
        );

        let consumer = jetstream
            .create_consumer_on_stream(
                jetstream::consumer::pull::Config {
                    name: Some(config.consumer_name.clone()),
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject_filter.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
                config.stream_name.as_str(),
            )
            .await
            .context("Failed to create consumer")?;

        info!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            "Consumer created successfully"
        );

        Ok(Self {
            consumer,
            config,
            processor,
        })
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(consumer = %self.config.consumer_name, "Starting consumer loop");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("Received shutdown signal, stopping consumer");
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(error = %e, "Error processing batch");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!("Consumer stopped gracefully");
        Ok(())
    }

    async fn fetch_and_process_batch(&self) -> Result<()> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(self.config.batch_size)
            .expires(self.config.max_wait)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let mut raw_messages: Vec<Message> = Vec::new();
        while let Some(result) = batch.next().await {
            match result {
                Ok(msg) => raw_messages.push(msg),
                Err(e) => warn!(error = %e, "Error receiving message from batch"),
            }
        }

        if raw_messages.is_empty() {
            debug!("No messages in batch");
            return Ok(());
        }

        debug!(message_count = raw_messages.len(), "Received message batch");

        let consumed = raw_messages
            .iter()
            .map(|msg| ConsumedMessage {
                subject: msg.subject.to_string(),
                payload: msg.payload.to_vec(),
            })
            .collect();

        let result = match (self.processor)(consumed).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Processor returned error, rejecting all messages");
                ProcessingResult::nak_all(raw_messages.len(), Some(e.to_string()))
            }
        };

        settle(&raw_messages, result).await;
        Ok(())
    }
}

async fn settle(messages: &[Message], result: ProcessingResult) {
    let ack_count = result.ack.len();
    for idx in result.ack {
        match messages.get(idx) {
            Some(msg) => {
                if let Err(e) = msg.ack().await {
                    error!(error = %e, message_index = idx, "Failed to acknowledge message");
                }
            }
            None => warn!(message_index = idx, "Invalid ack index in ProcessingResult"),
        }
    }

    let nak_count = result.nak.len();
    for (idx, reason) in result.nak {
        match messages.get(idx) {
            Some(msg) => {
                warn!(
                    message_index = idx,
                    subject = %msg.subject,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "Rejecting message"
                );
                if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                    error!(error = %e, message_index = idx, "Failed to reject message");
                }
            }
            None => warn!(message_index = idx, "Invalid nak index in ProcessingResult"),
        }
    }

    debug!(ack_count, nak_count, "Settled message batch");
}
