use async_trait::async_trait;
use common::domain::{TelemetryMessage, UplinkEnvelope};
use thiserror::Error;

/// Parser profile selected for tracker uplinks
pub const TRACKER_PARSER_PROFILE: &str = "system/trackers/any/v10/beapp";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid payload encoding: {0}")]
    InvalidEncoding(String),

    #[error("payload truncated: channel needs {expected} bytes, {actual} left")]
    Truncated { expected: usize, actual: usize },

    #[error("unsupported data type {data_type} on channel {channel}")]
    UnsupportedType { channel: u8, data_type: u8 },
}

/// Decodes an uplink envelope into a telemetry message
///
/// `Ok(None)` means the parser has nothing to say about this envelope
/// (wrong profile, no payload); it is not an error.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TelemetryParser: Send + Sync {
    async fn parse(
        &self,
        profile: &str,
        device_id: i64,
        envelope: &UplinkEnvelope,
    ) -> Result<Option<TelemetryMessage>, ParseError>;
}
