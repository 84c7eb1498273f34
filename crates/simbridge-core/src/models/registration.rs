//! Endpoint registration wire types and handshake configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Allocator reply to `GET /allocate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAssignment {
    pub port: u16,
    /// Address the allocator suggests advertising; empty when it has no opinion.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
}

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub plugin: String,
    #[serde(rename = "type", default)]
    pub plugin_type: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

/// Registration records keyed by plugin name.
pub type RegisteredPlugins = HashMap<String, RegisterRequest>;

/// Immutable input to the registration handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationConfig {
    pub plugin_name: String,
    pub plugin_type: String,
    /// Allocator base URL, e.g. `http://core:8080`.
    pub allocator_url: String,
    pub enable_sidecar: bool,
    /// Address to advertise. Required when sidecar registration is enabled.
    pub service_address: String,
}

impl RegistrationConfig {
    pub fn new(plugin_name: impl Into<String>, allocator_url: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            allocator_url: allocator_url.into(),
            ..Self::default()
        }
    }

    pub fn with_plugin_type(mut self, plugin_type: impl Into<String>) -> Self {
        self.plugin_type = plugin_type.into();
        self
    }

    /// Enable sidecar registration, advertising `service_address`.
    pub fn with_sidecar(mut self, service_address: impl Into<String>) -> Self {
        self.enable_sidecar = true;
        self.service_address = service_address.into();
        self
    }

    pub fn with_service_address(mut self, service_address: impl Into<String>) -> Self {
        self.service_address = service_address.into();
        self
    }
}
