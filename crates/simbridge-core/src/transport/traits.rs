//! Contracts implemented by concrete transports.

use crate::models::{CreateComponentRequest, SimMessage};
use crate::stream::StreamHandlerBinding;
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound transport owned by one sender component.
#[async_trait::async_trait]
pub trait TransportSender: Send + Sync {
    /// Bring the transport up. `cancel` fires when the instance is destroyed.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Send a complete message (type, ID, payload and metadata).
    async fn send_sim(&self, message: &SimMessage) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Inbound transport owned by one receiver component.
#[async_trait::async_trait]
pub trait TransportReceiver: Send + Sync {
    /// Bring the transport up. `cancel` fires when the instance is destroyed.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Tear the transport down.
    ///
    /// Implementations must close the inbound queue here: dropping its sender
    /// is the only thing that ends the forwarder relaying from it.
    async fn stop(&self) -> Result<()>;

    /// Hand out the inbound queue. Yields `Some` at most once.
    fn take_inbound(&self) -> Option<mpsc::Receiver<SimMessage>>;
}

/// Builds a sender for a create request; `None` means the request is not serviceable.
pub type SenderFactory =
    Arc<dyn Fn(&CreateComponentRequest) -> Option<Arc<dyn TransportSender>> + Send + Sync>;

/// Builds a receiver for a create request; `None` means the request is not serviceable.
pub type ReceiverFactory =
    Arc<dyn Fn(&CreateComponentRequest) -> Option<Arc<dyn TransportReceiver>> + Send + Sync>;

/// Builds a fresh stream handler binding.
pub type StreamHandlerFactory = Arc<dyn Fn() -> StreamHandlerBinding + Send + Sync>;
