//! Sender-side component lifecycle registry.
//!
//! Maps component IDs to live [`TransportSender`]s. Each instance gets its own
//! child cancellation token, triggered on destroy without touching siblings.
//! The instance table lock is only held for map access; transport start, send
//! and close all run with no lock held. Creates for the same ID are serialized,
//! so a duplicate create waits for the first and never starts a second transport.

use super::create_gate::CreateGate;
use super::traits::{SenderFactory, StreamHandlerFactory, TransportSender};
use crate::config::TransportConfig;
use crate::models::{CreateComponentRequest, Manifest, SimMessage};
use crate::plugin::Plugin;
use crate::stream::{DefaultStreamHandler, StreamHandlerBinding};
use crate::{Result, SimError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct SenderInstance {
    sender: Arc<dyn TransportSender>,
    cancel: CancellationToken,
}

/// Plugin hosting any number of transport sender components.
pub struct SenderPlugin {
    manifest: Manifest,
    factory: SenderFactory,
    handler_factory: Option<StreamHandlerFactory>,
    root: CancellationToken,
    send_timeout: Duration,
    instances: RwLock<HashMap<String, SenderInstance>>,
    creating: CreateGate,
}

impl SenderPlugin {
    pub fn new(manifest: Manifest, factory: SenderFactory) -> Self {
        Self {
            manifest,
            factory,
            handler_factory: None,
            root: CancellationToken::new(),
            send_timeout: TransportConfig::SEND_TIMEOUT,
            instances: RwLock::new(HashMap::new()),
            creating: CreateGate::default(),
        }
    }

    /// Use `factory` for stream handlers instead of [`DefaultStreamHandler`].
    pub fn with_stream_handler(mut self, factory: StreamHandlerFactory) -> Self {
        self.handler_factory = Some(factory);
        self
    }

    /// Derive instance tokens from `root` so process shutdown reaches them.
    pub fn with_cancel_token(mut self, root: CancellationToken) -> Self {
        self.root = root;
        self
    }

    /// Override the per-call send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn contains(&self, component_id: &str) -> bool {
        self.instances
            .read()
            .map(|m| m.contains_key(component_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.instances.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, component_id: &str) -> Result<Option<Arc<dyn TransportSender>>> {
        let instances = self
            .instances
            .read()
            .map_err(|e| SimError::Lock(e.to_string()))?;
        Ok(instances.get(component_id).map(|i| i.sender.clone()))
    }

    /// Build and start a sender. Runs under the per-ID create gate.
    async fn create_locked(&self, request: CreateComponentRequest) -> Result<()> {
        let component_id = request.component_id.clone();
        if self.lookup(&component_id)?.is_some() {
            debug!("[{}] sender created concurrently; create is a no-op", component_id);
            return Ok(());
        }

        let sender = (self.factory)(&request).ok_or_else(|| SimError::Factory {
            component_id: component_id.clone(),
        })?;

        let cancel = self.root.child_token();
        if let Err(e) = sender.start(cancel.clone()).await {
            cancel.cancel();
            return Err(SimError::Start {
                component_id,
                message: e.to_string(),
            });
        }

        self.instances
            .write()
            .map_err(|e| SimError::Lock(e.to_string()))?
            .insert(component_id.clone(), SenderInstance { sender, cancel });

        info!("[{}] sender instance created", component_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Plugin for SenderPlugin {
    fn manifest(&self) -> Manifest {
        self.manifest.clone()
    }

    async fn create_component_instance(&self, request: CreateComponentRequest) -> Result<()> {
        let component_id = request.component_id.clone();
        if self.lookup(&component_id)?.is_some() {
            debug!("[{}] sender already exists; create is a no-op", component_id);
            return Ok(());
        }

        self.creating
            .serialize(&component_id, self.create_locked(request))
            .await
    }

    async fn destroy_component_instance(&self, component_id: &str) -> Result<()> {
        let removed = self
            .instances
            .write()
            .map_err(|e| SimError::Lock(e.to_string()))?
            .remove(component_id);

        let Some(instance) = removed else {
            debug!("[{}] destroy of unknown sender ignored", component_id);
            return Ok(());
        };

        instance.cancel.cancel();
        instance.sender.close().await.map_err(|e| SimError::Stop {
            component_id: component_id.to_string(),
            message: e.to_string(),
        })?;

        info!("[{}] sender instance destroyed", component_id);
        Ok(())
    }

    async fn handle_message(&self, message: SimMessage) -> Result<Vec<SimMessage>> {
        let component_id = message.component_id.clone();
        let sender = self
            .lookup(&component_id)?
            .ok_or_else(|| SimError::UnknownComponent {
                component_id: component_id.clone(),
            })?;

        match tokio::time::timeout(self.send_timeout, sender.send_sim(&message)).await {
            Ok(Ok(())) => {
                debug!("[{}] sent message {}", component_id, message.message_id);
                Ok(Vec::new())
            }
            Ok(Err(e)) => Err(SimError::Send {
                component_id,
                message: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    "[{}] send of {} timed out after {:?}",
                    component_id, message.message_id, self.send_timeout
                );
                Err(SimError::Timeout(self.send_timeout))
            }
        }
    }

    fn stream_handler(&self) -> StreamHandlerBinding {
        match &self.handler_factory {
            Some(factory) => factory(),
            None => StreamHandlerBinding::with_sender(Arc::new(DefaultStreamHandler::new())),
        }
    }
}
