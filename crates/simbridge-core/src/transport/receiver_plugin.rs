//! Receiver-side component lifecycle registry.
//!
//! Receivers only produce traffic: each one fills an inbound queue that a
//! forwarder relays to core through the stream sender currently bound to that
//! component. Three independently guarded tables back the plugin:
//!
//! - instances: component ID to live receiver and its cancellation token
//! - senders: component ID to the bound [`StreamSender`]
//! - handlers: component ID to its per-component handler binding
//!
//! A sender may be bound before the component or its handler exists, and a
//! handler may be created before any sender is bound; whichever arrives second
//! completes the wiring so both orders end in the same state.
//!
//! Creates for one component ID run one at a time; a duplicate init waits for
//! the first and finds the receiver already running.

use super::create_gate::CreateGate;
use super::forwarder::{Forwarder, Transform};
use super::traits::{ReceiverFactory, StreamHandlerFactory, TransportReceiver};
use crate::models::{CreateComponentRequest, Manifest, PluginInit, SimMessage};
use crate::plugin::Plugin;
use crate::stream::{
    DefaultStreamHandler, StreamHandler, StreamHandlerBinding, StreamSender, StreamSenderSetter,
};
use crate::{Result, SimError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ReceiverInstance {
    receiver: Arc<dyn TransportReceiver>,
    cancel: CancellationToken,
}

type SenderTable = Arc<RwLock<HashMap<String, Arc<dyn StreamSender>>>>;

#[derive(Default)]
struct ReceiverTables {
    instances: RwLock<HashMap<String, ReceiverInstance>>,
    senders: SenderTable,
    handlers: RwLock<HashMap<String, StreamHandlerBinding>>,
    /// Run-once forwarder gate. Entries are never removed.
    forwarding: Mutex<HashSet<String>>,
    creating: CreateGate,
}

fn lock_err<E: std::fmt::Display>(e: E) -> SimError {
    SimError::Lock(e.to_string())
}

/// Plugin hosting any number of transport receiver components.
///
/// Cloning is cheap and clones share all tables; the plugin hands a clone of
/// itself out as its stream handler.
#[derive(Clone)]
pub struct ReceiverPlugin {
    manifest: Manifest,
    factory: ReceiverFactory,
    handler_factory: StreamHandlerFactory,
    root: CancellationToken,
    transform: Option<Transform>,
    tables: Arc<ReceiverTables>,
}

impl ReceiverPlugin {
    pub fn new(manifest: Manifest, factory: ReceiverFactory) -> Self {
        Self {
            manifest,
            factory,
            handler_factory: Arc::new(|| {
                StreamHandlerBinding::with_sender(Arc::new(DefaultStreamHandler::new()))
            }),
            root: CancellationToken::new(),
            transform: None,
            tables: Arc::new(ReceiverTables::default()),
        }
    }

    /// Factory for per-component handlers returned by [`ReceiverPlugin::handler`].
    pub fn with_stream_handler(mut self, factory: StreamHandlerFactory) -> Self {
        self.handler_factory = factory;
        self
    }

    /// Derive instance and forwarder tokens from `root`.
    pub fn with_cancel_token(mut self, root: CancellationToken) -> Self {
        self.root = root;
        self
    }

    /// Transform applied by every forwarder before relaying.
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn contains(&self, component_id: &str) -> bool {
        self.tables
            .instances
            .read()
            .map(|m| m.contains_key(component_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tables.instances.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a forwarder was ever started for `component_id`.
    pub fn is_forwarding(&self, component_id: &str) -> bool {
        self.tables
            .forwarding
            .lock()
            .map(|g| g.contains(component_id))
            .unwrap_or(false)
    }

    /// The sender currently bound to `component_id`.
    pub fn bound_sender(&self, component_id: &str) -> Option<Arc<dyn StreamSender>> {
        self.tables
            .senders
            .read()
            .ok()
            .and_then(|m| m.get(component_id).cloned())
    }

    /// Get the per-component handler, creating it on first use.
    ///
    /// A freshly created handler immediately receives an already-bound sender.
    pub fn handler(&self, component_id: &str) -> Result<StreamHandlerBinding> {
        let (binding, created) = {
            let mut handlers = self.tables.handlers.write().map_err(lock_err)?;
            match handlers.get(component_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let binding = (self.handler_factory)();
                    handlers.insert(component_id.to_string(), binding.clone());
                    (binding, true)
                }
            }
        };

        if created {
            debug!("[{}] handler created", component_id);
            if let (Some(setter), Some(sender)) =
                (&binding.sender_setter, self.bound_sender(component_id))
            {
                setter.set_stream_sender(sender);
                info!("[{}] bound sender installed on new handler", component_id);
            }
        }
        Ok(binding)
    }

    /// Make sure a started receiver exists for `request.component_id`.
    async fn ensure_instance(&self, request: CreateComponentRequest) -> Result<()> {
        if self.contains(&request.component_id) {
            debug!("[{}] receiver already exists", request.component_id);
            return Ok(());
        }
        let component_id = request.component_id.clone();
        self.tables
            .creating
            .serialize(&component_id, self.create_locked(request))
            .await
    }

    /// Runs with the per-ID create lock held.
    async fn create_locked(&self, request: CreateComponentRequest) -> Result<()> {
        let component_id = request.component_id.clone();
        if self.contains(&component_id) {
            debug!("[{}] receiver created concurrently", component_id);
            return Ok(());
        }

        let receiver = (self.factory)(&request).ok_or_else(|| SimError::Factory {
            component_id: component_id.clone(),
        })?;

        let cancel = self.root.child_token();
        if let Err(e) = receiver.start(cancel.clone()).await {
            cancel.cancel();
            return Err(SimError::Start {
                component_id,
                message: e.to_string(),
            });
        }

        self.tables.instances.write().map_err(lock_err)?.insert(
            component_id.clone(),
            ReceiverInstance { receiver, cancel },
        );

        info!("[{}] receiver instance created", component_id);
        Ok(())
    }

    /// Start the forwarder for `component_id` unless one was ever started.
    fn start_forwarder_once(&self, component_id: &str) -> Result<()> {
        let mut forwarding = self.tables.forwarding.lock().map_err(lock_err)?;
        if forwarding.contains(component_id) {
            return Ok(());
        }

        let receiver = self
            .tables
            .instances
            .read()
            .map_err(lock_err)?
            .get(component_id)
            .map(|i| i.receiver.clone());
        let Some(receiver) = receiver else {
            warn!("[{}] no receiver to forward from", component_id);
            return Ok(());
        };

        forwarding.insert(component_id.to_string());
        let Some(inbound) = receiver.take_inbound() else {
            warn!("[{}] receiver inbound queue already taken", component_id);
            return Ok(());
        };

        let senders = self.tables.senders.clone();
        let key = component_id.to_string();
        let resolve = move || senders.read().ok().and_then(|m| m.get(&key).cloned());

        // The join handle is dropped; the task ends on queue close or root cancellation.
        let _ = Forwarder::start_resolving(
            component_id.to_string(),
            self.root.clone(),
            inbound,
            resolve,
            self.transform.clone(),
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Plugin for ReceiverPlugin {
    fn manifest(&self) -> Manifest {
        self.manifest.clone()
    }

    async fn create_component_instance(&self, request: CreateComponentRequest) -> Result<()> {
        self.ensure_instance(request).await
    }

    async fn destroy_component_instance(&self, component_id: &str) -> Result<()> {
        let removed = self
            .tables
            .instances
            .write()
            .map_err(lock_err)?
            .remove(component_id);

        let Some(instance) = removed else {
            debug!("[{}] destroy of unknown receiver ignored", component_id);
            return Ok(());
        };

        instance.cancel.cancel();
        if let Err(e) = instance.receiver.stop().await {
            warn!("[{}] receiver stop failed: {}", component_id, e);
        }
        info!("[{}] receiver instance destroyed", component_id);
        Ok(())
    }

    async fn handle_message(&self, message: SimMessage) -> Result<Vec<SimMessage>> {
        if !self.contains(&message.component_id) {
            return Err(SimError::UnknownComponent {
                component_id: message.component_id,
            });
        }
        Ok(Vec::new())
    }

    fn stream_handler(&self) -> StreamHandlerBinding {
        StreamHandlerBinding::with_sender(Arc::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl StreamHandler for ReceiverPlugin {
    async fn on_init(&self, init: &PluginInit) -> Result<()> {
        let id = init.component_id.as_str();
        self.ensure_instance(CreateComponentRequest::for_id(id)).await?;

        let handler = self
            .tables
            .handlers
            .read()
            .map_err(lock_err)?
            .get(id)
            .cloned();
        if let (Some(setter), Some(sender)) = (
            handler.and_then(|h| h.sender_setter),
            self.bound_sender(id),
        ) {
            setter.set_stream_sender(sender);
            info!("[{}] cached sender installed on handler", id);
        }

        self.start_forwarder_once(id)
    }

    async fn on_sim_message(&self, _message: SimMessage) -> Result<Vec<SimMessage>> {
        Ok(Vec::new())
    }

    async fn on_shutdown(&self, reason: &str) {
        info!("Receiver plugin shutting down: {}", reason);
        let drained: Vec<(String, ReceiverInstance)> = match self.tables.instances.write() {
            Ok(mut instances) => instances.drain().collect(),
            Err(e) => {
                warn!("Cannot drain receivers: {}", e);
                return;
            }
        };

        for (component_id, instance) in drained {
            instance.cancel.cancel();
            if let Err(e) = instance.receiver.stop().await {
                warn!("[{}] receiver stop failed: {}", component_id, e);
            }
        }
    }
}

impl StreamSenderSetter for ReceiverPlugin {
    /// Bind `sender` to its component, replacing any earlier binding.
    fn set_stream_sender(&self, sender: Arc<dyn StreamSender>) {
        let component_id = sender.component_id().to_string();

        let previous = match self.tables.senders.write() {
            Ok(mut senders) => senders.insert(component_id.clone(), sender.clone()),
            Err(e) => {
                warn!("[{}] cannot bind sender: {}", component_id, e);
                return;
            }
        };
        match previous {
            Some(old) if !Arc::ptr_eq(&old, &sender) => {
                warn!("[{}] replacing previously bound stream sender", component_id);
            }
            Some(_) => debug!("[{}] sender already bound", component_id),
            None => info!("[{}] stream sender bound", component_id),
        }

        let setter = self
            .tables
            .handlers
            .read()
            .ok()
            .and_then(|h| h.get(&component_id).and_then(|b| b.sender_setter.clone()));
        match setter {
            Some(setter) => {
                setter.set_stream_sender(sender);
                info!("[{}] sender installed on handler", component_id);
            }
            None => debug!("[{}] no handler yet; sender cached", component_id),
        }
    }
}
