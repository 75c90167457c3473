use crate::domain::cayenne_lpp::{decode_frame, records_to_object, LppValue};
use crate::domain::{ParseError, TelemetryParser, TRACKER_PARSER_PROFILE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::domain::{Position, Sequence, TelemetryMessage, UplinkEnvelope};
use tracing::debug;

const PAYLOAD_FIELD: &str = "FRMPayload";
const ARRIVAL_TIME_FIELD: &str = "ArrTime";
const NO_GPS_FIX: &str = "no gps fix";

/// Tracker parser for uplinks carrying a hex-encoded Cayenne LPP frame
#[derive(Debug, Default, Clone)]
pub struct LppTrackerParser;

impl LppTrackerParser {
    pub fn new() -> Self {
        Self
    }
}

fn arrival_time(envelope: &UplinkEnvelope) -> DateTime<Utc> {
    envelope
        .field(ARRIVAL_TIME_FIELD)
        .and_then(|v| v.as_f64())
        .and_then(|secs| DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl TelemetryParser for LppTrackerParser {
    async fn parse(
        &self,
        profile: &str,
        device_id: i64,
        envelope: &UplinkEnvelope,
    ) -> Result<Option<TelemetryMessage>, ParseError> {
        if profile != TRACKER_PARSER_PROFILE {
            debug!(profile, "unsupported parser profile");
            return Ok(None);
        }

        let payload = match envelope.field(PAYLOAD_FIELD).and_then(|v| v.as_str()) {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(None),
        };

        let frame = hex::decode(payload).map_err(|e| ParseError::InvalidEncoding(e.to_string()))?;
        let records = decode_frame(&frame)?;

        let gps = records.iter().find_map(|r| match r.value {
            LppValue::Gps {
                latitude,
                longitude,
                ..
            } => Some(Position::new(latitude, longitude)),
            _ => None,
        });
        let sensors = records_to_object(
            records
                .iter()
                .filter(|r| !matches!(r.value, LppValue::Gps { .. })),
        );

        let received_at = arrival_time(envelope);
        let (position, error) = match gps {
            Some(position) => (position, None),
            None => (Position::default(), Some(NO_GPS_FIX.to_string())),
        };

        Ok(Some(TelemetryMessage {
            device_id,
            seq: Sequence::from_datetime(received_at),
            envelope: envelope.to_json(),
            received_at,
            position,
            accuracy: 0,
            error,
            sensors,
        }))
    }
}
