//! TCP server exposing a [`Plugin`] to the simulator core.
//!
//! Each accepted connection is handled in its own task. A connection starts in
//! request/response mode and answers JSON-RPC calls until the peer calls
//! `message_stream`; from then on it carries envelopes and is driven by a
//! [`StreamSession`] until the stream ends.
//!
//! # Methods
//!
//! | Method                       | Params                   | Result            |
//! |------------------------------|--------------------------|-------------------|
//! | `get_manifest`               | none                     | `Manifest`        |
//! | `create_component_instance`  | `CreateComponentRequest` | `{}`              |
//! | `destroy_component_instance` | `{"component_id": ..}`   | `{}`              |
//! | `handle_message`             | `SimMessage`             | `[SimMessage]`    |
//! | `message_stream`             | none                     | `{"streaming": true}`, then envelopes |

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::config::ProtocolConfig;
use crate::models::{CreateComponentRequest, SimMessage};
use crate::plugin::Plugin;
use crate::stream::{FramedSink, FramedSource, StreamSession};
use crate::{Result, SimError};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running plugin server. Dropping shuts down the server.
pub struct PluginServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PluginServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and signal every connection handler to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }

    /// Shut down and wait for the accept loop to exit.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PluginServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

#[derive(Deserialize)]
struct DestroyParams {
    component_id: String,
}

/// What a processed request asks the connection to do next.
enum Next {
    Reply(RpcResponse),
    Upgrade(RpcResponse),
}

pub struct PluginServer;

impl PluginServer {
    /// Bind `addr` and serve `plugin` on it.
    pub async fn bind<P: Plugin>(plugin: Arc<P>, addr: &str) -> Result<PluginServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        Self::start(plugin, listener)
    }

    /// Serve `plugin` on an already bound listener.
    pub fn start<P: Plugin>(plugin: Arc<P>, listener: TcpListener) -> Result<PluginServerHandle> {
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("Plugin server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            plugin,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(PluginServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<P: Plugin>(
        listener: TcpListener,
        plugin: Arc<P>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Plugin server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ProtocolConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    ProtocolConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let plugin = plugin.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, plugin, &mut conn_shutdown).await {
                                    debug!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<P: Plugin>(
        stream: TcpStream,
        plugin: Arc<P>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(());
                }
            };

            match Self::process_request(&frame, &*plugin).await {
                Next::Reply(response) => {
                    let response_bytes = serde_json::to_vec(&response)?;
                    write_frame(&mut writer, &response_bytes).await?;
                }
                Next::Upgrade(response) => {
                    let response_bytes = serde_json::to_vec(&response)?;
                    write_frame(&mut writer, &response_bytes).await?;
                    break;
                }
            }
        }

        debug!("Connection upgraded to message stream");
        let sink = Arc::new(FramedSink::new(writer));
        let source = FramedSource::new(reader);
        let session = StreamSession::run(plugin.stream_handler(), source, sink);

        tokio::select! {
            result = session => result,
            _ = shutdown_rx.changed() => Ok(()),
        }
    }

    async fn process_request<P: Plugin>(frame: &[u8], plugin: &P) -> Next {
        let mut request: RpcRequest = match serde_json::from_slice(frame) {
            Ok(req) => req,
            Err(e) => {
                return Next::Reply(RpcResponse::error(
                    None,
                    -32700,
                    format!("Parse error: {}", e),
                ));
            }
        };

        if let Err(e) = request.check_version() {
            return Next::Reply(RpcResponse::from_error(request.id, &e));
        }

        if request.is_stream_upgrade() {
            return Next::Upgrade(RpcResponse::success(
                request.id,
                serde_json::json!({ "streaming": true }),
            ));
        }

        let params = request.take_params();
        match Self::dispatch(plugin, &request.method, params).await {
            Ok(result) => Next::Reply(RpcResponse::success(request.id, result)),
            Err(e) => {
                debug!("{} failed: {}", request.method, e);
                Next::Reply(RpcResponse::from_error(request.id, &e))
            }
        }
    }

    async fn dispatch<P: Plugin>(
        plugin: &P,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match method {
            "get_manifest" => Ok(serde_json::to_value(plugin.manifest())?),
            "create_component_instance" => {
                let request: CreateComponentRequest = parse_params(params)?;
                plugin.create_component_instance(request).await?;
                Ok(serde_json::json!({}))
            }
            "destroy_component_instance" => {
                let DestroyParams { component_id } = parse_params(params)?;
                plugin.destroy_component_instance(&component_id).await?;
                Ok(serde_json::json!({}))
            }
            "handle_message" => {
                let message: SimMessage = parse_params(params)?;
                let replies = plugin.handle_message(message).await?;
                Ok(serde_json::to_value(replies)?)
            }
            _ => Err(SimError::MethodNotFound {
                method: method.to_string(),
            }),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| SimError::InvalidParams {
        message: e.to_string(),
    })
}
