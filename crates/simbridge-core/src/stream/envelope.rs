//! The tagged-union unit exchanged over a message stream.
//!
//! Exactly one variant is populated per envelope. The tag is the `"type"` field;
//! an unrecognised or missing tag decodes to [`Envelope::Unknown`] so a newer
//! peer cannot take an older session down.

use crate::models::{Ack, Nak, PluginInit, PluginShutdown, SimMessage};
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Init(PluginInit),
    SimMessage(SimMessage),
    Ack(Ack),
    Nak(Nak),
    Shutdown(PluginShutdown),
    #[serde(other)]
    Unknown,
}

impl Envelope {
    pub fn init(component_id: impl Into<String>) -> Self {
        Envelope::Init(PluginInit {
            component_id: component_id.into(),
        })
    }

    pub fn sim(message: SimMessage) -> Self {
        Envelope::SimMessage(message)
    }

    pub fn ack(message_id: impl Into<String>) -> Self {
        Envelope::Ack(Ack {
            message_id: message_id.into(),
        })
    }

    pub fn nak(message_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Envelope::Nak(Nak {
            message_id: message_id.into(),
            error_message: error_message.into(),
        })
    }

    pub fn shutdown(reason: impl Into<String>) -> Self {
        Envelope::Shutdown(PluginShutdown {
            reason: reason.into(),
        })
    }

    /// Tag name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Init(_) => "init",
            Envelope::SimMessage(_) => "sim_message",
            Envelope::Ack(_) => "ack",
            Envelope::Nak(_) => "nak",
            Envelope::Shutdown(_) => "shutdown",
            Envelope::Unknown => "unknown",
        }
    }
}

/// Encode an envelope as a JSON frame payload.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode a frame payload into an envelope.
///
/// Payloads that are not a JSON object, or whose known tag carries malformed
/// content, are protocol errors.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(SimError::Protocol {
            message: "envelope must be a JSON object".to_string(),
        });
    }
    if !value.get("type").is_some_and(serde_json::Value::is_string) {
        return Ok(Envelope::Unknown);
    }
    serde_json::from_value(value).map_err(|e| SimError::Protocol {
        message: format!("malformed envelope: {}", e),
    })
}
