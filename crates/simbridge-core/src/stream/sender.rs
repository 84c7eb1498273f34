//! Outbound, component-bound send capability.

use super::envelope::Envelope;
use super::io::EnvelopeSink;
use crate::models::SimMessage;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Pushes one SimMessage at a time upstream for a single component.
///
/// Usable from any task; implementations serialize concurrent sends.
#[async_trait::async_trait]
pub trait StreamSender: Send + Sync {
    async fn send(&self, message: SimMessage) -> Result<()>;

    fn component_id(&self) -> &str;
}

/// Capability to receive a [`StreamSender`] once a stream serves a component.
pub trait StreamSenderSetter: Send + Sync {
    fn set_stream_sender(&self, sender: Arc<dyn StreamSender>);
}

/// A [`StreamSender`] writing `SimMessage` envelopes to a stream's sink.
pub struct ComponentStreamSender {
    component_id: String,
    sink: Arc<dyn EnvelopeSink>,
}

impl ComponentStreamSender {
    pub fn new(component_id: impl Into<String>, sink: Arc<dyn EnvelopeSink>) -> Self {
        Self {
            component_id: component_id.into(),
            sink,
        }
    }
}

#[async_trait::async_trait]
impl StreamSender for ComponentStreamSender {
    async fn send(&self, message: SimMessage) -> Result<()> {
        debug!(
            "[{}] streaming message {} upstream",
            self.component_id, message.message_id
        );
        self.sink.send(Envelope::sim(message)).await
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }
}

impl std::fmt::Debug for ComponentStreamSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentStreamSender")
            .field("component_id", &self.component_id)
            .finish_non_exhaustive()
    }
}
