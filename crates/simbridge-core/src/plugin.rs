//! The contract every plugin process serves.

use crate::models::{CreateComponentRequest, Manifest, SimMessage};
use crate::stream::StreamHandlerBinding;
use crate::Result;

/// A simulation plugin: a manifest, a component lifecycle and a stream handler.
///
/// [`SenderPlugin`](crate::transport::SenderPlugin) and
/// [`ReceiverPlugin`](crate::transport::ReceiverPlugin) implement this for
/// transport plugins.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Static description, available before any component exists.
    fn manifest(&self) -> Manifest;

    async fn create_component_instance(&self, request: CreateComponentRequest) -> Result<()>;

    /// Destroying an unknown component is not an error.
    async fn destroy_component_instance(&self, component_id: &str) -> Result<()>;

    /// Direct, unary message delivery to one component.
    async fn handle_message(&self, message: SimMessage) -> Result<Vec<SimMessage>>;

    /// Handler for a newly opened message stream.
    fn stream_handler(&self) -> StreamHandlerBinding;
}
