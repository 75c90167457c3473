//! Cayenne LPP frame decoding.
//!
//! A frame is a sequence of `[channel, data type, value...]` records with
//! fixed value widths per data type, all integers big-endian.

use crate::domain::ParseError;
use serde_json::{json, Map, Value};

const DIGITAL_INPUT: u8 = 0;
const DIGITAL_OUTPUT: u8 = 1;
const ANALOG_INPUT: u8 = 2;
const ANALOG_OUTPUT: u8 = 3;
const ILLUMINANCE: u8 = 101;
const PRESENCE: u8 = 102;
const TEMPERATURE: u8 = 103;
const HUMIDITY: u8 = 104;
const ACCELEROMETER: u8 = 113;
const BAROMETER: u8 = 115;
const GYROMETER: u8 = 134;
const GPS: u8 = 136;

/// Decoded value of one LPP record
#[derive(Debug, Clone, PartialEq)]
pub enum LppValue {
    DigitalInput(u8),
    DigitalOutput(u8),
    AnalogInput(f64),
    AnalogOutput(f64),
    Illuminance(u16),
    Presence(u8),
    Temperature(f64),
    Humidity(f64),
    Accelerometer { x: f64, y: f64, z: f64 },
    Barometer(f64),
    Gyrometer { x: f64, y: f64, z: f64 },
    Gps {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
}

impl LppValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            LppValue::DigitalInput(_) => "digital_input",
            LppValue::DigitalOutput(_) => "digital_output",
            LppValue::AnalogInput(_) => "analog_input",
            LppValue::AnalogOutput(_) => "analog_output",
            LppValue::Illuminance(_) => "illuminance",
            LppValue::Presence(_) => "presence",
            LppValue::Temperature(_) => "temperature",
            LppValue::Humidity(_) => "humidity",
            LppValue::Accelerometer { .. } => "accelerometer",
            LppValue::Barometer(_) => "barometer",
            LppValue::Gyrometer { .. } => "gyrometer",
            LppValue::Gps { .. } => "gps",
        }
    }

    pub fn to_json(&self) -> Value {
        match *self {
            LppValue::DigitalInput(v) | LppValue::DigitalOutput(v) | LppValue::Presence(v) => {
                json!(v)
            }
            LppValue::Illuminance(v) => json!(v),
            LppValue::AnalogInput(v)
            | LppValue::AnalogOutput(v)
            | LppValue::Temperature(v)
            | LppValue::Humidity(v)
            | LppValue::Barometer(v) => json!(v),
            LppValue::Accelerometer { x, y, z } | LppValue::Gyrometer { x, y, z } => {
                json!({ "x": x, "y": y, "z": z })
            }
            LppValue::Gps {
                latitude,
                longitude,
                altitude,
            } => json!({
                "latitude": latitude,
                "longitude": longitude,
                "altitude": altitude,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LppRecord {
    pub channel: u8,
    pub value: LppValue,
}

impl LppRecord {
    /// Sensor key in `{type}_{channel}` form
    pub fn key(&self) -> String {
        format!("{}_{}", self.value.type_name(), self.channel)
    }
}

/// Flatten records into a `{type}_{channel}: value` object
pub fn records_to_object<'a>(records: impl IntoIterator<Item = &'a LppRecord>) -> Value {
    let fields: Map<String, Value> = records
        .into_iter()
        .map(|r| (r.key(), r.value.to_json()))
        .collect();
    Value::Object(fields)
}

fn value_width(data_type: u8) -> Option<usize> {
    match data_type {
        DIGITAL_INPUT | DIGITAL_OUTPUT | PRESENCE | HUMIDITY => Some(1),
        ANALOG_INPUT | ANALOG_OUTPUT | ILLUMINANCE | TEMPERATURE | BAROMETER => Some(2),
        ACCELEROMETER | GYROMETER => Some(6),
        GPS => Some(9),
        _ => None,
    }
}

fn i16_at(data: &[u8], at: usize) -> f64 {
    f64::from(i16::from_be_bytes([data[at], data[at + 1]]))
}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

// 24-bit two's complement
fn i24_at(data: &[u8], at: usize) -> f64 {
    let raw = i32::from_be_bytes([data[at], data[at + 1], data[at + 2], 0]) >> 8;
    f64::from(raw)
}

fn decode_value(data_type: u8, data: &[u8]) -> Option<LppValue> {
    let value = match data_type {
        DIGITAL_INPUT => LppValue::DigitalInput(data[0]),
        DIGITAL_OUTPUT => LppValue::DigitalOutput(data[0]),
        ANALOG_INPUT => LppValue::AnalogInput(i16_at(data, 0) / 100.0),
        ANALOG_OUTPUT => LppValue::AnalogOutput(i16_at(data, 0) / 100.0),
        ILLUMINANCE => LppValue::Illuminance(u16_at(data, 0)),
        PRESENCE => LppValue::Presence(data[0]),
        TEMPERATURE => LppValue::Temperature(i16_at(data, 0) / 10.0),
        HUMIDITY => LppValue::Humidity(f64::from(data[0]) / 2.0),
        ACCELEROMETER => LppValue::Accelerometer {
            x: i16_at(data, 0) / 1000.0,
            y: i16_at(data, 2) / 1000.0,
            z: i16_at(data, 4) / 1000.0,
        },
        BAROMETER => LppValue::Barometer(f64::from(u16_at(data, 0)) / 10.0),
        GYROMETER => LppValue::Gyrometer {
            x: i16_at(data, 0) / 100.0,
            y: i16_at(data, 2) / 100.0,
            z: i16_at(data, 4) / 100.0,
        },
        GPS => LppValue::Gps {
            latitude: i24_at(data, 0) / 10_000.0,
            longitude: i24_at(data, 3) / 10_000.0,
            altitude: i24_at(data, 6) / 100.0,
        },
        _ => return None,
    };
    Some(value)
}

/// Decode a whole LPP frame into its records, in frame order
pub fn decode_frame(frame: &[u8]) -> Result<Vec<LppRecord>, ParseError> {
    let mut records = Vec::new();
    let mut rest = frame;

    while !rest.is_empty() {
        let [channel, data_type, tail @ ..] = rest else {
            return Err(ParseError::Truncated {
                expected: 2,
                actual: rest.len(),
            });
        };
        let (channel, data_type) = (*channel, *data_type);

        let width = value_width(data_type)
            .ok_or(ParseError::UnsupportedType { channel, data_type })?;
        if tail.len() < width {
            return Err(ParseError::Truncated {
                expected: width,
                actual: tail.len(),
            });
        }

        let (data, next) = tail.split_at(width);
        let value = decode_value(data_type, data)
            .ok_or(ParseError::UnsupportedType { channel, data_type })?;
        records.push(LppRecord { channel, value });
        rest = next;
    }

    Ok(records)
}
