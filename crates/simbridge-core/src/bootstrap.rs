//! Plugin process entry point: handshake, serve, shut down on signal.

use crate::config::RegistrationTimeouts;
use crate::models::RegistrationConfig;
use crate::plugin::Plugin;
use crate::registration::{Registrar, SidecarOutcome, SidecarTask, TransportInitializer};
use crate::rpc::PluginServer;
use crate::{Result, SimError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Register with the core, then serve `plugin` until SIGINT or SIGTERM.
///
/// The returned error is a handshake or bind failure; a clean shutdown
/// returns `Ok(())` after the server has drained.
pub async fn serve_plugin_with_registration<P: Plugin>(
    plugin: Arc<P>,
    config: RegistrationConfig,
    http: reqwest::Client,
    registrar: Option<Arc<dyn Registrar>>,
) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    serve_plugin_until(plugin, config, http, registrar, shutdown).await
}

/// Like [`serve_plugin_with_registration`], stopping when `shutdown` fires.
pub async fn serve_plugin_until<P: Plugin>(
    plugin: Arc<P>,
    config: RegistrationConfig,
    http: reqwest::Client,
    registrar: Option<Arc<dyn Registrar>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let name = config.plugin_name.clone();

    let mut initializer = TransportInitializer::new(config, http);
    if let Some(registrar) = registrar {
        initializer = initializer.with_registrar(registrar);
    }

    let handshake = initializer.init(&shutdown).await.map_err(|e| match e {
        e @ (SimError::MissingAddress | SimError::Registration(_)) => e,
        other => SimError::Registration(format!("transport init failed: {}", other)),
    })?;

    let bind_addr = format!("0.0.0.0:{}", handshake.port);
    let handle = PluginServer::bind(plugin, &bind_addr).await?;
    info!("{} serving on {}", name, handle.addr());

    shutdown.cancelled().await;

    info!("{} shutting down", name);
    handle.stop().await;

    if let Some(sidecar) = handshake.sidecar {
        finish_sidecar(sidecar).await;
    }

    Ok(())
}

/// Wait for a registered sidecar to deregister after the root token fired.
async fn finish_sidecar(sidecar: SidecarTask) {
    let watcher = match sidecar.wait().await {
        Ok(SidecarOutcome::Registered {
            service_id,
            watcher,
        }) => {
            info!("Waiting for {} to deregister", service_id);
            watcher
        }
        Ok(_) => return,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    match tokio::time::timeout(RegistrationTimeouts::SIDECAR_DEREGISTER, watcher).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Sidecar deregistration task failed: {}", e),
        Err(_) => warn!(
            "Sidecar deregistration did not finish within {:?}",
            RegistrationTimeouts::SIDECAR_DEREGISTER
        ),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
}
