//! Wire protocol shared by the plugin server and the core-side client.
//!
//! Every unit on a plugin connection is a frame:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! A connection starts in request/response mode carrying JSON-RPC 2.0 frames.
//! A successful `message_stream` call switches both directions to envelope
//! frames for the rest of the connection.

use crate::config::ProtocolConfig;
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Correlation ID carried by requests and echoed in responses.
pub type RpcId = Option<serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub id: RpcId,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(id.into()),
        }
    }

    /// Request that opens a message stream on this connection.
    pub fn stream_upgrade() -> Self {
        Self::new(ProtocolConfig::STREAM_METHOD, serde_json::json!({}), 0)
    }

    pub fn is_stream_upgrade(&self) -> bool {
        self.method == ProtocolConfig::STREAM_METHOD
    }

    /// Reject requests that do not claim JSON-RPC 2.0.
    pub fn check_version(&self) -> Result<()> {
        if self.jsonrpc == ProtocolConfig::JSONRPC_VERSION {
            Ok(())
        } else {
            Err(SimError::Protocol {
                message: format!(
                    "expected jsonrpc {}, got {:?}",
                    ProtocolConfig::JSONRPC_VERSION,
                    self.jsonrpc
                ),
            })
        }
    }

    /// Params, or an empty object when the caller sent none.
    pub fn take_params(&mut self) -> serde_json::Value {
        self.params
            .take()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RpcId,
}

impl RpcResponse {
    pub fn success(id: RpcId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: RpcId, code: i32, message: String) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }

    /// Error response whose code follows [`SimError::to_rpc_error_code`].
    pub fn from_error(id: RpcId, err: &SimError) -> Self {
        Self::error(id, err.to_rpc_error_code(), err.to_string())
    }

    /// Unwrap into the call result; an error object becomes [`SimError::Remote`].
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self.error {
            Some(RpcError { code, message }) => Err(SimError::Remote { code, message }),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Read one frame.
///
/// `Ok(None)` means the peer closed the connection on a frame boundary. A
/// connection that ends inside a frame is [`SimError::StreamClosed`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > ProtocolConfig::MAX_FRAME_SIZE {
        return Err(SimError::Protocol {
            message: format!(
                "frame of {} bytes exceeds limit of {}",
                len,
                ProtocolConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => SimError::StreamClosed,
        _ => e.into(),
    })?;
    Ok(Some(payload))
}

/// Write one frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > ProtocolConfig::MAX_FRAME_SIZE {
        return Err(SimError::Protocol {
            message: format!("refusing to send {} byte frame", payload.len()),
        });
    }
    // Checked above, so the length fits in the u32 header.
    let header = (payload.len() as u32).to_be_bytes();
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_missing_params() {
        let mut req: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"get_manifest","id":7}"#).unwrap();
        assert!(req.check_version().is_ok());
        assert!(!req.is_stream_upgrade());
        assert_eq!(req.take_params(), serde_json::json!({}));
    }

    #[test]
    fn test_wrong_version_is_protocol_error() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"1.0","method":"get_manifest","id":1}"#).unwrap();
        assert!(matches!(req.check_version(), Err(SimError::Protocol { .. })));
    }

    #[test]
    fn test_error_response_maps_to_remote() {
        let err = SimError::UnknownComponent {
            component_id: "x".to_string(),
        };
        let resp = RpcResponse::from_error(Some(1.into()), &err);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"result\""));

        let parsed: RpcResponse = serde_json::from_str(&json).unwrap();
        match parsed.into_result() {
            Err(SimError::Remote { code, message }) => {
                assert_eq!(code, -32001);
                assert_eq!(message, "Unknown component ID: x");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_success_without_result_is_null() {
        let resp: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_frames_are_read_back_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"type":"init","component_id":"c1"}"#).await.unwrap();
        write_frame(&mut buf, b"").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(
            read_frame(&mut cursor).await.unwrap().unwrap(),
            br#"{"type":"init","component_id":"c1"}"#.to_vec()
        );
        assert_eq!(read_frame(&mut cursor).await.unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut cursor).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_stream_closed() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"abc");

        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor).await, Err(SimError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((ProtocolConfig::MAX_FRAME_SIZE + 1) as u32).to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor).await, Err(SimError::Protocol { .. })));
    }
}
