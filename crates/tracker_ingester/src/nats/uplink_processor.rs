use crate::domain::{DeviceRegistry, IngestOutcome};
use anyhow::Result;
use common::domain::UplinkEnvelope;
use common::nats::{BatchProcessor, ConsumedMessage, ProcessingResult};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-batch tally of ingestion outcomes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UplinkBatchStats {
    pub malformed: usize,
    pub ignored: usize,
    pub parse_failed: usize,
    pub not_applicable: usize,
    pub stored: usize,
    pub created: usize,
    pub rejected: usize,
}

impl UplinkBatchStats {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Ignored => self.ignored += 1,
            IngestOutcome::ParseFailed => self.parse_failed += 1,
            IngestOutcome::NotApplicable => self.not_applicable += 1,
            IngestOutcome::Stored { created, .. } => {
                self.stored += 1;
                if *created {
                    self.created += 1;
                }
            }
            IngestOutcome::Rejected => self.rejected += 1,
        }
    }
}

/// Feed one batch of raw uplinks into the registry
///
/// Messages that are not valid envelope JSON are counted and skipped;
/// redelivering them would not change the outcome.
pub async fn ingest_batch(registry: &DeviceRegistry, messages: &[ConsumedMessage]) -> UplinkBatchStats {
    let mut stats = UplinkBatchStats::default();

    for (index, msg) in messages.iter().enumerate() {
        let envelope: UplinkEnvelope = match serde_json::from_slice(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    message_index = index,
                    subject = %msg.subject,
                    error = %e,
                    "dropping malformed uplink envelope"
                );
                stats.malformed += 1;
                continue;
            }
        };

        let outcome = registry.ingest(&envelope).await;
        stats.record(&outcome);
    }

    stats
}

/// Batch processor that ingests uplink envelopes and acknowledges every message
pub fn create_uplink_processor(registry: Arc<DeviceRegistry>) -> BatchProcessor {
    Box::new(move |messages: Vec<ConsumedMessage>| {
        let registry = registry.clone();

        Box::pin(async move {
            let stats = ingest_batch(&registry, &messages).await;
            debug!(
                message_count = messages.len(),
                stored = stats.stored,
                created = stats.created,
                ignored = stats.ignored,
                parse_failed = stats.parse_failed,
                malformed = stats.malformed,
                rejected = stats.rejected,
                "processed uplink batch"
            );
            Ok(ProcessingResult::ack_all(messages.len()))
        }) as BoxFuture<'static, Result<ProcessingResult>>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockTelemetryParser, WriteQueueConfig};
    use common::domain::{MockTrackerRepository, Position, Sequence, TelemetryMessage};
    use serde_json::json;

    fn consumed(payload: serde_json::Value) -> ConsumedMessage {
        ConsumedMessage {
            subject: "uplinks.trackers".to_string(),
            payload: serde_json::to_vec(&payload).unwrap(),
        }
    }

    fn registry() -> Arc<DeviceRegistry> {
        let mut parser = MockTelemetryParser::new();
        parser.expect_parse().returning(|_, device_id, _| {
            Ok(Some(TelemetryMessage {
                device_id,
                seq: Sequence::new(1),
                envelope: json!({}),
                received_at: chrono::Utc::now(),
                position: Position::default(),
                accuracy: 0,
                error: None,
                sensors: json!({}),
            }))
        });
        Arc::new(DeviceRegistry::new(
            1,
            Arc::new(MockTrackerRepository::new()),
            Arc::new(parser),
            WriteQueueConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_acks_every_message() {
        // Arrange
        let registry = registry();
        let processor = create_uplink_processor(registry.clone());
        let batch = vec![
            consumed(json!({"msgtype": "upinfo", "DevEui": "58-A0-CB-00-00-20-07-B9"})),
            ConsumedMessage {
                subject: "uplinks.trackers".to_string(),
                payload: b"{not json".to_vec(),
            },
            consumed(json!({"msgtype": "joining", "DevEui": "58-A0-CB-00-00-20-07-BA"})),
        ];

        // Act
        let result = processor(batch).await.unwrap();

        // Assert
        assert_eq!(result, ProcessingResult::ack_all(3));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_stats() {
        let registry = registry();
        let batch = vec![
            consumed(json!({"msgtype": "upinfo", "DevEui": "58-A0-CB-00-00-20-07-B9"})),
            consumed(json!({"msgtype": "upinfo", "DevEui": "58-A0-CB-00-00-20-07-B9"})),
            consumed(json!({"msgtype": "dnacked", "DevEui": "58-A0-CB-00-00-20-07-B9"})),
            consumed(json!({"msgtype": "upinfo", "DevEui": "bogus"})),
            consumed(json!({"DevEui": "58-A0-CB-00-00-20-07-B9"})),
        ];

        let stats = ingest_batch(&registry, &batch).await;

        assert_eq!(
            stats,
            UplinkBatchStats {
                malformed: 1,
                ignored: 1,
                parse_failed: 1,
                stored: 2,
                created: 1,
                ..Default::default()
            }
        );
    }
}
