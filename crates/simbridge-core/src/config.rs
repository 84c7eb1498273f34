//! Centralized configuration constants for simbridge.
//!
//! Runtime configuration for the registration handshake lives in
//! [`crate::registration::RegistrationConfig`]; this module only holds the
//! fixed limits and timeouts shared by the protocol layers.

use std::time::Duration;

/// Stream and RPC protocol limits.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Largest frame accepted on a plugin connection (16 MiB).
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
    pub const MAX_CONNECTIONS: usize = 64;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Method that upgrades a connection into an envelope stream.
    pub const STREAM_METHOD: &'static str = "message_stream";
}

/// Component transport settings.
pub struct TransportConfig;

impl TransportConfig {
    /// Bound on a single outbound `send_sim` call in the sender registry.
    pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);
    /// Capacity of the in-memory inbound queues used by test receivers.
    pub const INBOUND_QUEUE_CAPACITY: usize = 64;
}

/// Timeouts for the registration handshake and sidecar registration.
pub struct RegistrationTimeouts;

impl RegistrationTimeouts {
    pub const ALLOCATOR_REQUEST: Duration = Duration::from_secs(10);
    pub const SIDECAR_REGISTER: Duration = Duration::from_secs(2);
    /// Bound on waiting for deregistration during shutdown.
    pub const SIDECAR_DEREGISTER: Duration = Duration::from_secs(5);
    pub const SIDECAR_CHECK_TIMEOUT: &'static str = "2s";
    pub const SIDECAR_CHECK_INTERVAL: Duration = Duration::from_secs(10);
    pub const SIDECAR_CHECK_PATH: &'static str = "/health";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert_eq!(TransportConfig::SEND_TIMEOUT, Duration::from_secs(5));
        assert!(RegistrationTimeouts::SIDECAR_REGISTER < RegistrationTimeouts::ALLOCATOR_REQUEST);
        assert!(ProtocolConfig::MAX_FRAME_SIZE > 0);
    }
}
