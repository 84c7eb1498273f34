//! Simulation message and component request types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An application-level unit of communication between core and a plugin.
///
/// The payload is opaque to simbridge. On the wire it is hex encoded so
/// arbitrary bytes survive the JSON framing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimMessage {
    pub message_type: String,
    pub message_id: String,
    pub component_id: String,
    #[serde(default, with = "payload_hex")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl SimMessage {
    pub fn new(
        message_type: impl Into<String>,
        message_id: impl Into<String>,
        component_id: impl Into<String>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            message_id: message_id.into(),
            component_id: component_id.into(),
            payload: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Request to create a component instance inside a plugin process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreateComponentRequest {
    #[serde(default)]
    pub component_type: String,
    pub component_id: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl CreateComponentRequest {
    /// Request carrying only an ID, used when an `Init` creates a component implicitly.
    pub fn for_id(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            ..Self::default()
        }
    }
}

/// Binds a stream to a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInit {
    pub component_id: String,
}

/// Positive acknowledgement of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message_id: String,
}

/// Negative acknowledgement of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nak {
    pub message_id: String,
    pub error_message: String,
}

/// Orderly end of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginShutdown {
    #[serde(default)]
    pub reason: String,
}

mod payload_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_message_builder() {
        let msg = SimMessage::new("msg.test", "123", "comp01")
            .with_payload(br#"{"key":"value"}"#.to_vec())
            .with_metadata("trace", "abc123");

        assert_eq!(msg.message_type, "msg.test");
        assert_eq!(msg.component_id, "comp01");
        assert_eq!(msg.metadata.get("trace").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_payload_is_hex_on_the_wire() {
        let msg = SimMessage::new("t", "m", "c").with_payload(vec![0x00, 0xff, 0x10]);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["payload"], "00ff10");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_missing_payload_and_metadata_default_to_empty() {
        let msg: SimMessage = serde_json::from_str(
            r#"{"message_type":"t","message_id":"m","component_id":"c"}"#,
        )
        .unwrap();

        assert!(msg.payload.is_empty());
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_invalid_hex_payload_rejected() {
        let result: Result<SimMessage, _> = serde_json::from_str(
            r#"{"message_type":"t","message_id":"m","component_id":"c","payload":"zz"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_create_request_for_id() {
        let req = CreateComponentRequest::for_id("rx-1");
        assert_eq!(req.component_id, "rx-1");
        assert!(req.component_type.is_empty());
        assert!(req.parameters.is_empty());
    }
}
