//! Sidecar service-discovery registration (Consul).
//!
//! Registration is attempted once under a short timeout. On success a watcher
//! task is armed that deregisters the service when the root cancellation token
//! fires; on failure or timeout nothing is retried and no watcher is armed.

use crate::config::RegistrationTimeouts;
use crate::{Result, SimError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What the handshake asks a sidecar registrar to announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub check_path: String,
    pub check_interval: Duration,
}

impl ServiceRegistration {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            check_path: RegistrationTimeouts::SIDECAR_CHECK_PATH.to_string(),
            check_interval: RegistrationTimeouts::SIDECAR_CHECK_INTERVAL,
        }
    }

    /// `<name>-<port>`.
    pub fn service_id(&self) -> String {
        format!("{}-{}", self.name, self.port)
    }
}

/// Result of one registration attempt.
#[derive(Debug)]
pub enum SidecarOutcome {
    /// Registered; `watcher` deregisters on root cancellation.
    Registered {
        service_id: String,
        watcher: JoinHandle<()>,
    },
    Failed(String),
    TimedOut,
    /// The request was unusable (no address) and never sent.
    Rejected(String),
}

impl SidecarOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, SidecarOutcome::Registered { .. })
    }
}

/// Something that can announce the plugin to a discovery system.
#[async_trait::async_trait]
pub trait Registrar: Send + Sync {
    /// Attempt registration; `cancel` is the process root token.
    async fn register(
        &self,
        cancel: CancellationToken,
        registration: ServiceRegistration,
    ) -> SidecarOutcome;
}

/// Consul agent service definition (`PUT /v1/agent/service/register` body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub check: AgentServiceCheck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "HTTP")]
    pub http: String,
    pub interval: String,
    pub timeout: String,
}

impl AgentServiceRegistration {
    pub fn from_registration(registration: &ServiceRegistration) -> Self {
        Self {
            id: registration.service_id(),
            name: registration.name.clone(),
            address: registration.address.clone(),
            port: registration.port,
            check: AgentServiceCheck {
                http: format!(
                    "http://{}:{}{}",
                    registration.address, registration.port, registration.check_path
                ),
                interval: format!("{}s", registration.check_interval.as_secs()),
                timeout: RegistrationTimeouts::SIDECAR_CHECK_TIMEOUT.to_string(),
            },
        }
    }
}

/// The slice of the Consul agent API the registrar needs.
#[async_trait::async_trait]
pub trait AgentRegistrar: Send + Sync {
    async fn register(&self, service: &AgentServiceRegistration) -> Result<()>;

    async fn deregister(&self, service_id: &str) -> Result<()>;
}

/// [`AgentRegistrar`] over the Consul HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulAgent {
    http: reqwest::Client,
    base_url: String,
}

impl ConsulAgent {
    pub const DEFAULT_ADDR: &'static str = "http://127.0.0.1:8500";

    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Agent address from `CONSUL_HTTP_ADDR`, falling back to the local agent.
    pub fn from_env(http: reqwest::Client) -> Self {
        let addr = std::env::var("CONSUL_HTTP_ADDR")
            .ok()
            .filter(|a| !a.trim().is_empty())
            .map(|a| {
                if a.starts_with("http://") || a.starts_with("https://") {
                    a
                } else {
                    format!("http://{}", a)
                }
            })
            .unwrap_or_else(|| Self::DEFAULT_ADDR.to_string());
        Self::new(http, addr)
    }

    async fn put(&self, path: &str, body: Option<&AgentServiceRegistration>) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.put(&url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| SimError::Network {
            message: format!("failed to contact Consul agent: {}", e),
            source: Some(e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SimError::Registration(format!(
                "Consul agent returned {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AgentRegistrar for ConsulAgent {
    async fn register(&self, service: &AgentServiceRegistration) -> Result<()> {
        self.put("/v1/agent/service/register", Some(service)).await
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let path = format!(
            "/v1/agent/service/deregister/{}",
            urlencoding::encode(service_id)
        );
        self.put(&path, None).await
    }
}

/// Consul-backed [`Registrar`].
pub struct ConsulRegistrar {
    agent: Arc<dyn AgentRegistrar>,
    timeout: Duration,
}

impl ConsulRegistrar {
    pub fn new(agent: Arc<dyn AgentRegistrar>) -> Self {
        Self {
            agent,
            timeout: RegistrationTimeouts::SIDECAR_REGISTER,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Registrar for ConsulRegistrar {
    async fn register(
        &self,
        cancel: CancellationToken,
        registration: ServiceRegistration,
    ) -> SidecarOutcome {
        if registration.address.is_empty() {
            error!("Sidecar registration failed: address must be provided");
            return SidecarOutcome::Rejected("address must be provided".to_string());
        }

        let service = AgentServiceRegistration::from_registration(&registration);
        let service_id = service.id.clone();

        match tokio::time::timeout(self.timeout, self.agent.register(&service)).await {
            Err(_) => {
                warn!(
                    "Sidecar registration of {} timed out after {:?}",
                    service_id, self.timeout
                );
                return SidecarOutcome::TimedOut;
            }
            Ok(Err(e)) => {
                warn!("Failed to register {} with Consul: {}", service_id, e);
                return SidecarOutcome::Failed(e.to_string());
            }
            Ok(Ok(())) => {}
        }

        info!(
            "Registered {} with Consul on {}:{}",
            registration.name, registration.address, registration.port
        );

        let agent = self.agent.clone();
        let id = service_id.clone();
        let watcher = tokio::spawn(async move {
            cancel.cancelled().await;
            info!("Deregistering {} from Consul", id);
            match agent.deregister(&id).await {
                Ok(()) => info!("{} deregistered from Consul", id),
                Err(e) => error!("Failed to deregister {}: {}", id, e),
            }
        });

        SidecarOutcome::Registered {
            service_id,
            watcher,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockAgent {
        registered: Mutex<Vec<AgentServiceRegistration>>,
        deregistered: Mutex<Vec<String>>,
        fail: bool,
        hang: bool,
    }

    #[async_trait::async_trait]
    impl AgentRegistrar for MockAgent {
        async fn register(&self, service: &AgentServiceRegistration) -> Result<()> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.registered.lock().unwrap().push(service.clone());
            if self.fail {
                return Err(SimError::Registration("agent unavailable".to_string()));
            }
            Ok(())
        }

        async fn deregister(&self, service_id: &str) -> Result<()> {
            self.deregistered.lock().unwrap().push(service_id.to_string());
            Ok(())
        }
    }

    fn registration() -> ServiceRegistration {
        ServiceRegistration::new("sample-plugin", "10.1.1.10", 7777)
    }

    #[test]
    fn test_agent_registration_shape() {
        let service = AgentServiceRegistration::from_registration(&registration());
        let json = serde_json::to_value(&service).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "ID": "sample-plugin-7777",
                "Name": "sample-plugin",
                "Address": "10.1.1.10",
                "Port": 7777,
                "Check": {
                    "HTTP": "http://10.1.1.10:7777/health",
                    "Interval": "10s",
                    "Timeout": "2s"
                }
            })
        );
    }

    #[tokio::test]
    async fn test_register_then_deregister_on_cancel() {
        let agent = Arc::new(MockAgent::default());
        let registrar = ConsulRegistrar::new(agent.clone());
        let cancel = CancellationToken::new();

        let outcome = registrar.register(cancel.clone(), registration()).await;
        let SidecarOutcome::Registered {
            service_id,
            watcher,
        } = outcome
        else {
            panic!("expected registration to succeed");
        };
        assert_eq!(service_id, "sample-plugin-7777");
        assert!(agent.deregistered.lock().unwrap().is_empty());

        cancel.cancel();
        watcher.await.unwrap();
        assert_eq!(
            agent.deregistered.lock().unwrap().clone(),
            vec!["sample-plugin-7777"]
        );
    }

    #[tokio::test]
    async fn test_empty_address_is_rejected_without_agent_call() {
        let agent = Arc::new(MockAgent::default());
        let registrar = ConsulRegistrar::new(agent.clone());

        let outcome = registrar
            .register(
                CancellationToken::new(),
                ServiceRegistration::new("sample-plugin", "", 7777),
            )
            .await;

        assert!(matches!(outcome, SidecarOutcome::Rejected(_)));
        assert!(agent.registered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_arms_no_watcher() {
        let agent = Arc::new(MockAgent {
            fail: true,
            ..Default::default()
        });
        let registrar = ConsulRegistrar::new(agent.clone());
        let cancel = CancellationToken::new();

        let outcome = registrar.register(cancel.clone(), registration()).await;
        assert!(matches!(outcome, SidecarOutcome::Failed(_)));

        cancel.cancel();
        tokio::task::yield_now().await;
        assert!(agent.deregistered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registration_times_out() {
        let agent = Arc::new(MockAgent {
            hang: true,
            ..Default::default()
        });
        let registrar = ConsulRegistrar::new(agent).with_timeout(Duration::from_millis(50));

        let outcome = registrar
            .register(CancellationToken::new(), registration())
            .await;
        assert!(matches!(outcome, SidecarOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_consul_agent_http_calls() {
        let mut server = Server::new_async().await;
        let register = server
            .mock("PUT", "/v1/agent/service/register")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "ID": "sample-plugin-7777",
                "Address": "10.1.1.10"
            })))
            .with_status(200)
            .create_async()
            .await;
        let deregister = server
            .mock("PUT", "/v1/agent/service/deregister/sample-plugin-7777")
            .with_status(200)
            .create_async()
            .await;

        let agent = ConsulAgent::new(reqwest::Client::new(), server.url());
        let service = AgentServiceRegistration::from_registration(&registration());
        agent.register(&service).await.unwrap();
        agent.deregister(&service.id).await.unwrap();

        register.assert_async().await;
        deregister.assert_async().await;
    }

    #[tokio::test]
    async fn test_consul_agent_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("PUT", "/v1/agent/service/register")
            .with_status(500)
            .with_body("agent down")
            .create_async()
            .await;

        let agent = ConsulAgent::new(reqwest::Client::new(), server.url());
        let service = AgentServiceRegistration::from_registration(&registration());
        let result = agent.register(&service).await;

        assert!(matches!(result, Err(SimError::Registration(_))));
    }
}
