//! Simbridge - plugin SDK for simulator transport plugins.
//!
//! A plugin process registers its endpoint with the simulator core, then
//! serves the plugin RPC: a manifest, a component lifecycle, unary message
//! delivery and a bidirectional message stream. Transport plugins are built
//! from a factory for [`TransportSender`](transport::TransportSender) or
//! [`TransportReceiver`](transport::TransportReceiver) instances.
//!
//! # Example
//!
//! ```rust,ignore
//! use simbridge::transport::ReceiverPlugin;
//! use simbridge::{bootstrap, Manifest, RegistrationConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> simbridge::Result<()> {
//!     let plugin = ReceiverPlugin::new(Manifest::default(), Arc::new(|req| make_udp_receiver(req)));
//!     let config = RegistrationConfig::new("udp-receiver", "http://core:8080")
//!         .with_plugin_type("receiver");
//!
//!     bootstrap::serve_plugin_with_registration(
//!         Arc::new(plugin),
//!         config,
//!         reqwest::Client::new(),
//!         None,
//!     )
//!     .await
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod manifest;
pub mod models;
pub mod plugin;
pub mod registration;
pub mod rpc;
pub mod stream;
pub mod testing;
pub mod transport;

// Re-export commonly used types
pub use error::{Result, SimError};
pub use manifest::ManifestRegistry;
pub use models::{
    CreateComponentRequest, Manifest, PluginInit, PluginShutdown, RegistrationConfig, SimMessage,
};
pub use plugin::Plugin;
pub use registration::{ConsulAgent, ConsulRegistrar, Registrar, TransportInitializer};
pub use stream::{Envelope, StreamHandler, StreamHandlerBinding, StreamSender, StreamSession};
pub use transport::{ReceiverPlugin, SenderPlugin, TransportReceiver, TransportSender};
pub use tokio_util::sync::CancellationToken;
