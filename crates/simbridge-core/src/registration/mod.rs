//! Endpoint registration: allocator handshake plus optional sidecar discovery.

mod handshake;
mod sidecar;

pub use crate::models::{PortAssignment, RegisterRequest, RegisteredPlugins, RegistrationConfig};
pub use handshake::{Handshake, SidecarTask, TransportInitializer};
pub use sidecar::{
    AgentRegistrar, AgentServiceCheck, AgentServiceRegistration, ConsulAgent, ConsulRegistrar,
    Registrar, ServiceRegistration, SidecarOutcome,
};
