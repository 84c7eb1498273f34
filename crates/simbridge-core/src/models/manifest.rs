//! Plugin manifest schema.
//!
//! Pure data describing the message, control-function, component and transport
//! types a plugin provides. JSON field names are camelCase to match the core's
//! catalog format.

use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Static description of a plugin, queryable before any component exists.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub message_types: Vec<MessageType>,
    #[serde(default)]
    pub control_functions: Vec<ControlFunctionType>,
    #[serde(default)]
    pub component_types: Vec<ComponentType>,
    #[serde(default)]
    pub transport_types: Vec<TransportType>,
}

/// A message that can be used in a simulation (metadata only, no payload).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageType {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

/// A field that must be filled in to configure a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Only meaningful for [`FieldType::Enum`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub repeated: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_fields: Vec<FieldSpec>,
}

/// A non-message block that alters control flow (Delay, Repeat, WaitForAck...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFunctionType {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
}

/// Something that sends or receives messages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentType {
    pub id: String,
    pub display_name: String,
    /// True if simulated internally by the core.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub supports_multiple_instances: bool,
}

/// A transport mechanism (e.g. "amqp").
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportType {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Core-managed rather than plugin-provided.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
}

/// Value type of a [`FieldSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Uint,
    Float,
    Bool,
    Enum,
    /// RFC3339 time value.
    Timestamp,
    Repeated,
    Object,
}

impl FieldType {
    pub const ALL: [FieldType; 9] = [
        FieldType::String,
        FieldType::Int,
        FieldType::Uint,
        FieldType::Float,
        FieldType::Bool,
        FieldType::Enum,
        FieldType::Timestamp,
        FieldType::Repeated,
        FieldType::Object,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Uint => "uint",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Enum => "enum",
            FieldType::Timestamp => "timestamp",
            FieldType::Repeated => "repeated",
            FieldType::Object => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SimError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        FieldType::ALL
            .into_iter()
            .find(|ft| ft.as_str() == normalized)
            .ok_or_else(|| SimError::InvalidParams {
                message: format!("unrecognized field type: {:?}", normalized),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_parse_is_case_insensitive() {
        assert_eq!(" Timestamp ".parse::<FieldType>().unwrap(), FieldType::Timestamp);
        assert_eq!("ENUM".parse::<FieldType>().unwrap(), FieldType::Enum);
        assert!("decimal".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_field_type_display_roundtrip() {
        for ft in FieldType::ALL {
            assert_eq!(ft.to_string().parse::<FieldType>().unwrap(), ft);
        }
    }

    #[test]
    fn test_manifest_json_uses_camel_case() {
        let manifest = Manifest {
            name: "amqp-plugin".into(),
            version: "1.0".into(),
            component_types: vec![ComponentType {
                id: "amqp-receiver".into(),
                display_name: "AMQP Receiver".into(),
                supports_multiple_instances: true,
                ..Default::default()
            }],
            message_types: vec![MessageType {
                id: "TrainDeparture".into(),
                display_name: "Train Departure".into(),
                description: String::new(),
                fields: vec![FieldSpec {
                    name: "platform".into(),
                    field_type: FieldType::Enum,
                    required: true,
                    enum_values: vec!["1".into(), "2".into()],
                    repeated: false,
                    description: String::new(),
                    subtype: None,
                    object_fields: Vec::new(),
                }],
            }],
            ..Default::default()
        };

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["componentTypes"][0]["supportsMultipleInstances"], true);
        assert_eq!(json["messageTypes"][0]["fields"][0]["type"], "enum");
        assert!(json["componentTypes"][0].get("internal").is_none());

        let back: Manifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
    }
}
