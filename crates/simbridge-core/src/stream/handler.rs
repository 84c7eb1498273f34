//! Stream handler contracts.
//!
//! A [`StreamHandler`] reacts to the envelopes of one stream. Handlers that
//! also want to push unsolicited messages upstream expose a
//! [`StreamSenderSetter`] through their [`StreamHandlerBinding`]; the session
//! driver only injects a sender when that capability is present.

use super::sender::{StreamSender, StreamSenderSetter};
use crate::models::{PluginInit, SimMessage};
use crate::Result;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Reacts to the inbound envelopes of a message stream.
#[async_trait::async_trait]
pub trait StreamHandler: Send + Sync {
    /// A component announced itself on the stream. An error ends the session.
    async fn on_init(&self, init: &PluginInit) -> Result<()>;

    /// Handle one inbound message, returning any replies in send order.
    ///
    /// An error is reported to the peer as a `Nak` and the session continues.
    async fn on_sim_message(&self, message: SimMessage) -> Result<Vec<SimMessage>>;

    /// The peer asked the plugin to shut down. No error path.
    async fn on_shutdown(&self, reason: &str);
}

/// A handler plus its optional sender-injection capability.
#[derive(Clone)]
pub struct StreamHandlerBinding {
    pub handler: Arc<dyn StreamHandler>,
    pub sender_setter: Option<Arc<dyn StreamSenderSetter>>,
}

impl StreamHandlerBinding {
    /// Bind a handler that never receives a sender.
    pub fn new(handler: Arc<dyn StreamHandler>) -> Self {
        Self {
            handler,
            sender_setter: None,
        }
    }

    /// Bind a handler that is also its own sender setter.
    pub fn with_sender<H>(handler: Arc<H>) -> Self
    where
        H: StreamHandler + StreamSenderSetter + 'static,
    {
        Self {
            handler: handler.clone(),
            sender_setter: Some(handler),
        }
    }
}

impl std::fmt::Debug for StreamHandlerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandlerBinding")
            .field("accepts_sender", &self.sender_setter.is_some())
            .finish_non_exhaustive()
    }
}

/// Ignores everything, including any sender offered to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStreamHandler;

#[async_trait::async_trait]
impl StreamHandler for NoOpStreamHandler {
    async fn on_init(&self, _init: &PluginInit) -> Result<()> {
        Ok(())
    }

    async fn on_sim_message(&self, _message: SimMessage) -> Result<Vec<SimMessage>> {
        Ok(Vec::new())
    }

    async fn on_shutdown(&self, _reason: &str) {}
}

impl StreamSenderSetter for NoOpStreamHandler {
    fn set_stream_sender(&self, _sender: Arc<dyn StreamSender>) {}
}

/// Per-instance handler that keeps the injected sender and otherwise does nothing.
#[derive(Default)]
pub struct DefaultStreamHandler {
    sender: RwLock<Option<Arc<dyn StreamSender>>>,
}

impl DefaultStreamHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently injected sender, if any.
    pub fn sender(&self) -> Option<Arc<dyn StreamSender>> {
        self.sender.read().ok().and_then(|s| s.clone())
    }
}

#[async_trait::async_trait]
impl StreamHandler for DefaultStreamHandler {
    async fn on_init(&self, _init: &PluginInit) -> Result<()> {
        Ok(())
    }

    async fn on_sim_message(&self, _message: SimMessage) -> Result<Vec<SimMessage>> {
        Ok(Vec::new())
    }

    async fn on_shutdown(&self, _reason: &str) {}
}

impl StreamSenderSetter for DefaultStreamHandler {
    fn set_stream_sender(&self, sender: Arc<dyn StreamSender>) {
        debug!("[{}] sender stored on default handler", sender.component_id());
        if let Ok(mut slot) = self.sender.write() {
            *slot = Some(sender);
        }
    }
}

impl std::fmt::Debug for DefaultStreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultStreamHandler")
            .field("has_sender", &self.sender().is_some())
            .finish()
    }
}
