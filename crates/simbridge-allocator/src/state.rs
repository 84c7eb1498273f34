//! In-memory allocation and registration state.
//!
//! Nothing here is persisted; a restarted allocator starts from its base port
//! with empty tables.

use simbridge::models::{RegisterRequest, RegisteredPlugins};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Plugin name to assigned port.
#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: RwLock<HashMap<String, u16>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, plugin: &str, port: u16) {
        let mut ports = self.ports.write().unwrap_or_else(|e| e.into_inner());
        ports.insert(plugin.to_string(), port);
    }

    /// Snapshot of every assignment.
    pub fn all(&self) -> HashMap<String, u16> {
        self.ports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Endpoints plugins reported through `POST /register`, keyed by plugin name.
#[derive(Debug, Default)]
pub struct RegisteredPluginRegistry {
    plugins: RwLock<RegisteredPlugins>,
}

impl RegisteredPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `request`, replacing any earlier registration under the same name.
    pub fn add(&self, request: RegisterRequest) {
        let mut plugins = self.plugins.write().unwrap_or_else(|e| e.into_inner());
        plugins.insert(request.plugin.clone(), request);
    }

    pub fn all(&self) -> RegisteredPlugins {
        self.plugins
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Hands out ports to plugins.
pub trait Allocator: Send + Sync {
    /// Assign a port to `plugin`. `None` once the port range is exhausted.
    fn allocate(&self, plugin: &str) -> Option<u16>;
}

/// Sequential allocator starting at a base port.
///
/// Every call assigns a fresh port, even for a plugin that already has one.
#[derive(Debug)]
pub struct InMemoryAllocator {
    next: Mutex<Option<u16>>,
    registry: std::sync::Arc<PortRegistry>,
}

impl InMemoryAllocator {
    pub fn new(base_port: u16, registry: std::sync::Arc<PortRegistry>) -> Self {
        Self {
            next: Mutex::new(Some(base_port)),
            registry,
        }
    }
}

impl Allocator for InMemoryAllocator {
    fn allocate(&self, plugin: &str) -> Option<u16> {
        let port = {
            let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
            let port = (*next)?;
            *next = port.checked_add(1);
            port
        };
        self.registry.set(plugin, port);
        Some(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sequential_allocation() {
        let registry = Arc::new(PortRegistry::new());
        let allocator = InMemoryAllocator::new(9100, registry.clone());

        assert_eq!(allocator.allocate("a"), Some(9100));
        assert_eq!(allocator.allocate("b"), Some(9101));
        assert_eq!(allocator.allocate("a"), Some(9102));

        let all = registry.all();
        assert_eq!(all.get("a"), Some(&9102));
        assert_eq!(all.get("b"), Some(&9101));
    }

    #[test]
    fn test_allocation_stops_at_end_of_range() {
        let registry = Arc::new(PortRegistry::new());
        let allocator = InMemoryAllocator::new(u16::MAX, registry);

        assert_eq!(allocator.allocate("last"), Some(u16::MAX));
        assert_eq!(allocator.allocate("none"), None);
    }

    #[test]
    fn test_registration_overwrites_by_name() {
        let registry = RegisteredPluginRegistry::new();
        registry.add(RegisterRequest {
            plugin: "rx".to_string(),
            plugin_type: "receiver".to_string(),
            ip: "10.0.0.1".to_string(),
            port: 9100,
        });
        registry.add(RegisterRequest {
            plugin: "rx".to_string(),
            plugin_type: "receiver".to_string(),
            ip: "10.0.0.2".to_string(),
            port: 9105,
        });

        let all = registry.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all["rx"].ip, "10.0.0.2");
        assert_eq!(all["rx"].port, 9105);
    }
}
