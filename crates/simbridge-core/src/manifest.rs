//! Process-local manifest registry.
//!
//! Plugins register their manifests with a registry owned by the process
//! bootstrap; there is no global list.

use crate::models::Manifest;
use std::sync::RwLock;
use tracing::debug;

/// Accumulates manifests in registration order.
#[derive(Debug, Default)]
pub struct ManifestRegistry {
    manifests: RwLock<Vec<Manifest>>,
}

impl ManifestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, manifest: Manifest) {
        debug!("Registering manifest {} {}", manifest.name, manifest.version);
        if let Ok(mut manifests) = self.manifests.write() {
            manifests.push(manifest);
        }
    }

    /// Snapshot of every registered manifest, oldest first.
    pub fn all(&self) -> Vec<Manifest> {
        self.manifests.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.manifests.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything registered so far.
    pub fn reset(&self) {
        if let Ok(mut manifests) = self.manifests.write() {
            manifests.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> Manifest {
        Manifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_keeps_order() {
        let registry = ManifestRegistry::new();
        registry.register(manifest("udp-sender"));
        registry.register(manifest("mqtt-receiver"));

        let names: Vec<String> = registry.all().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["udp-sender", "mqtt-receiver"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reset_clears_registry() {
        let registry = ManifestRegistry::new();
        registry.register(manifest("udp-sender"));
        registry.reset();

        assert!(registry.is_empty());
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ManifestRegistry::new();
        let b = ManifestRegistry::new();
        a.register(manifest("only-in-a"));

        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }
}
