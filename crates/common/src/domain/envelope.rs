use serde::{Deserialize, Serialize};

/// Classification tag carried by every network-server message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageClass {
    /// Telemetry uplink from a device; the only class that is ingested
    #[serde(rename = "upinfo")]
    Uplink,
    #[serde(rename = "joining")]
    Join,
    #[serde(rename = "dntxed")]
    DownlinkSent,
    #[serde(rename = "dnacked")]
    DownlinkAcked,
    #[serde(other)]
    Other,
}

/// Structured uplink envelope as delivered by the network server
///
/// Only the classification and the device address are interpreted here;
/// everything else is kept verbatim in `fields` for the parser and for
/// storage alongside the decoded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkEnvelope {
    #[serde(rename = "msgtype")]
    pub class: MessageClass,
    #[serde(rename = "DevEui")]
    pub dev_eui: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl UplinkEnvelope {
    pub fn is_uplink(&self) -> bool {
        self.class == MessageClass::Uplink
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// The envelope as an opaque JSON document, in its wire shape
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = self.fields.clone();
        map.insert(
            "msgtype".to_string(),
            serde_json::to_value(self.class).unwrap_or(serde_json::Value::Null),
        );
        map.insert(
            "DevEui".to_string(),
            serde_json::Value::String(self.dev_eui.clone()),
        );
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_uplink() {
        let envelope: UplinkEnvelope = serde_json::from_value(json!({
            "msgtype": "upinfo",
            "DevEui": "58-A0-CB-00-00-20-07-B9",
            "FRMPayload": "0188",
            "FPort": 1
        }))
        .unwrap();

        assert!(envelope.is_uplink());
        assert_eq!(envelope.dev_eui, "58-A0-CB-00-00-20-07-B9");
        assert_eq!(envelope.field("FPort"), Some(&json!(1)));
        assert!(envelope.field("msgtype").is_none());
    }

    #[test]
    fn test_unknown_class_maps_to_other() {
        let envelope: UplinkEnvelope = serde_json::from_value(json!({
            "msgtype": "dntxed-late",
            "DevEui": "58-A0-CB-00-00-20-07-B9"
        }))
        .unwrap();

        assert_eq!(envelope.class, MessageClass::Other);
        assert!(!envelope.is_uplink());
    }

    #[test]
    fn test_to_json_restores_wire_shape() {
        let wire = json!({
            "msgtype": "joining",
            "DevEui": "58-A0-CB-00-00-20-07-B9",
            "DR": 5
        });
        let envelope: UplinkEnvelope = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(envelope.to_json(), wire);
    }
}
