use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic ordering key derived from message receipt time
///
/// Encoded as microseconds since the UNIX epoch, so it orders messages and
/// doubles as a coarse time-range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(i64);

impl Sequence {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_micros())
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Decoded positional/sensor report from one uplink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub device_id: i64,
    pub seq: Sequence,
    /// Raw uplink envelope the message was decoded from
    pub envelope: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub position: Position,
    pub accuracy: u32,
    pub error: Option<String>,
    pub sensors: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sequence_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let seq = Sequence::from_datetime(dt);
        assert_eq!(seq.value(), 1_709_294_400_000_000);
        assert_eq!(seq.to_datetime(), Some(dt));
    }

    #[test]
    fn test_sequence_orders_by_time() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(Sequence::from_datetime(earlier) < Sequence::from_datetime(later));
    }
}
