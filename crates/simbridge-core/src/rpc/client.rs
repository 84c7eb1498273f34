//! Core-side client for a plugin server.
//!
//! Unary calls share one connection guarded by a tokio `Mutex`. Each message
//! stream gets a dedicated connection, upgraded with `message_stream`.

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::config::ProtocolConfig;
use crate::models::{CreateComponentRequest, Manifest, SimMessage};
use crate::stream::{Envelope, EnvelopeSink, EnvelopeSource, FramedSink, FramedSource};
use crate::{Result, SimError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    tokio::time::timeout(ProtocolConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| SimError::Timeout(ProtocolConfig::CONNECT_TIMEOUT))?
        .map_err(|e| SimError::Network {
            message: format!("cannot connect to plugin at {}: {}", addr, e),
            source: None,
        })
}

/// One request/response exchange on `stream`.
async fn round_trip(stream: &mut TcpStream, request: &RpcRequest) -> Result<serde_json::Value> {
    let request_bytes = serde_json::to_vec(request)?;
    let (mut reader, mut writer) = stream.split();

    write_frame(&mut writer, &request_bytes)
        .await
        .map_err(|_| SimError::StreamClosed)?;

    let response_bytes = read_frame(&mut reader)
        .await
        .map_err(|_| SimError::StreamClosed)?
        .ok_or(SimError::StreamClosed)?;

    let response: RpcResponse =
        serde_json::from_slice(&response_bytes).map_err(|e| SimError::Json {
            message: format!("Failed to parse plugin response: {}", e),
            source: Some(e),
        })?;

    response.into_result()
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SimError::Json {
        message: format!("Unexpected result shape: {}", e),
        source: Some(e),
    })
}

/// Client for the unary plugin methods.
#[derive(Debug)]
pub struct PluginClient {
    stream: Mutex<TcpStream>,
    addr: SocketAddr,
    next_id: AtomicU64,
}

impl PluginClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = connect(addr).await?;
        debug!("Plugin client connected to {}", addr);

        Ok(Self {
            stream: Mutex::new(stream),
            addr,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Call a JSON-RPC method and return its raw result.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        let mut stream = self.stream.lock().await;
        round_trip(&mut stream, &request).await
    }

    pub async fn get_manifest(&self) -> Result<Manifest> {
        decode(self.call("get_manifest", serde_json::json!({})).await?)
    }

    pub async fn create_component_instance(&self, request: &CreateComponentRequest) -> Result<()> {
        self.call("create_component_instance", serde_json::to_value(request)?)
            .await
            .map(|_| ())
    }

    pub async fn destroy_component_instance(&self, component_id: &str) -> Result<()> {
        self.call(
            "destroy_component_instance",
            serde_json::json!({ "component_id": component_id }),
        )
        .await
        .map(|_| ())
    }

    pub async fn handle_message(&self, message: &SimMessage) -> Result<Vec<SimMessage>> {
        decode(self.call("handle_message", serde_json::to_value(message)?).await?)
    }

    /// Open a message stream on a new connection.
    pub async fn open_stream(&self) -> Result<CoreStream> {
        CoreStream::open(self.addr).await
    }
}

/// Core end of a message stream.
pub struct CoreStream {
    sink: FramedSink<OwnedWriteHalf>,
    source: FramedSource<OwnedReadHalf>,
}

impl CoreStream {
    pub async fn open(addr: SocketAddr) -> Result<Self> {
        let mut stream = connect(addr).await?;
        round_trip(&mut stream, &RpcRequest::stream_upgrade()).await?;
        debug!("Message stream opened to {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            sink: FramedSink::new(writer),
            source: FramedSource::new(reader),
        })
    }

    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.sink.send(envelope).await
    }

    /// Next envelope from the plugin, `None` once it closed the stream.
    pub async fn recv(&mut self) -> Result<Option<Envelope>> {
        self.source.recv().await
    }

    /// Close the core-to-plugin direction; the plugin sees a clean end of stream.
    pub async fn close(&self) -> Result<()> {
        self.sink.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_connect_to_dead_server_is_network_error() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = PluginClient::connect(addr).await;

        assert!(matches!(
            result,
            Err(SimError::Network { .. }) | Err(SimError::Timeout(_))
        ));
    }
}
