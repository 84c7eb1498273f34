//! Endpoint registration handshake.
//!
//! Order of operations:
//! 1. Validate the sidecar precondition (address present when a registrar is
//!    configured and sidecar registration is enabled).
//! 2. Ask the allocator for a port.
//! 3. Spawn sidecar registration in the background, if enabled.
//! 4. Register the endpoint with the core. Failure here is logged only.

use super::sidecar::{Registrar, ServiceRegistration, SidecarOutcome};
use crate::config::RegistrationTimeouts;
use crate::models::{PortAssignment, RegisterRequest, RegistrationConfig};
use crate::{Result, SimError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background sidecar registration attempt.
#[derive(Debug)]
pub struct SidecarTask {
    handle: JoinHandle<SidecarOutcome>,
}

impl SidecarTask {
    fn spawn(
        registrar: Arc<dyn Registrar>,
        cancel: CancellationToken,
        registration: ServiceRegistration,
    ) -> Self {
        let handle = tokio::spawn(async move { registrar.register(cancel, registration).await });
        Self { handle }
    }

    /// Wait for the registration attempt to finish.
    pub async fn wait(self) -> Result<SidecarOutcome> {
        self.handle
            .await
            .map_err(|e| SimError::Registration(format!("sidecar task failed: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Result of a successful handshake.
#[derive(Debug)]
pub struct Handshake {
    /// Port the plugin must listen on.
    pub port: u16,
    /// Address sent to the core.
    pub advertised_ip: String,
    pub sidecar: Option<SidecarTask>,
}

/// Runs the registration handshake for one plugin process.
pub struct TransportInitializer {
    pub config: RegistrationConfig,
    pub http: reqwest::Client,
    pub registrar: Option<Arc<dyn Registrar>>,
}

impl TransportInitializer {
    pub fn new(config: RegistrationConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            registrar: None,
        }
    }

    pub fn with_registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    fn allocator_base(&self) -> &str {
        self.config.allocator_url.trim_end_matches('/')
    }

    /// Run the handshake and return the allocated port.
    ///
    /// `cancel` is the root token; a registered sidecar deregisters when it fires.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<Handshake> {
        let sidecar_active = self.config.enable_sidecar && self.registrar.is_some();
        if sidecar_active && self.config.service_address.is_empty() {
            return Err(SimError::MissingAddress);
        }

        let assignment = self.fetch_port().await?;
        let port = assignment.port;
        info!(
            "Allocator assigned port {} to {}",
            port, self.config.plugin_name
        );

        let sidecar = match &self.registrar {
            Some(registrar) if self.config.enable_sidecar => {
                let registration = ServiceRegistration::new(
                    self.config.plugin_name.clone(),
                    self.config.service_address.clone(),
                    port,
                );
                Some(SidecarTask::spawn(
                    registrar.clone(),
                    cancel.clone(),
                    registration,
                ))
            }
            _ => {
                info!("Sidecar registration disabled");
                None
            }
        };

        let advertised_ip = if self.config.service_address.is_empty() {
            assignment.ip
        } else {
            self.config.service_address.clone()
        };

        let request = RegisterRequest {
            plugin: self.config.plugin_name.clone(),
            plugin_type: self.config.plugin_type.clone(),
            ip: advertised_ip.clone(),
            port,
        };
        if let Err(e) = self.register_with_core(&request).await {
            warn!(
                "Failed to register {} with core: {}",
                self.config.plugin_name, e
            );
        }

        Ok(Handshake {
            port,
            advertised_ip,
            sidecar,
        })
    }

    /// `GET {allocator}/allocate?plugin=<name>`.
    pub async fn fetch_port(&self) -> Result<PortAssignment> {
        let url = format!(
            "{}/allocate?plugin={}",
            self.allocator_base(),
            urlencoding::encode(&self.config.plugin_name)
        );
        debug!("Requesting port from {}", url);

        let response = self
            .http
            .get(&url)
            .timeout(RegistrationTimeouts::ALLOCATOR_REQUEST)
            .send()
            .await
            .map_err(|e| SimError::Allocator {
                message: format!("failed to request port: {}", e),
                status_code: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SimError::Allocator {
                message: format!("allocator returned {}", status),
                status_code: Some(status.as_u16()),
            });
        }

        response
            .json::<PortAssignment>()
            .await
            .map_err(|e| SimError::Allocator {
                message: format!("invalid allocator response: {}", e),
                status_code: Some(status.as_u16()),
            })
    }

    /// `POST {allocator}/register`.
    pub async fn register_with_core(&self, request: &RegisterRequest) -> Result<()> {
        let url = format!("{}/register", self.allocator_base());

        let response = self
            .http
            .post(&url)
            .timeout(RegistrationTimeouts::ALLOCATOR_REQUEST)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SimError::Registration(format!(
                "core returned {} for {}",
                status, request.plugin
            )));
        }

        info!(
            "Registered {} ({}) at {}:{}",
            request.plugin, request.plugin_type, request.ip, request.port
        );
        Ok(())
    }
}
