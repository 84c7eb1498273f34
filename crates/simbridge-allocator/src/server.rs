//! HTTP server implementation using Axum.

use crate::state::{Allocator, PortRegistry, RegisteredPluginRegistry};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use simbridge::models::{PortAssignment, RegisterRequest};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    pub allocator: Arc<dyn Allocator>,
    pub ports: Arc<PortRegistry>,
    pub plugins: RegisteredPluginRegistry,
}

impl AppState {
    pub fn new(allocator: Arc<dyn Allocator>, ports: Arc<PortRegistry>) -> Self {
        Self {
            allocator,
            ports,
            plugins: RegisteredPluginRegistry::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AllocateQuery {
    #[serde(default)]
    plugin: Option<String>,
}

/// Build the allocator router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/allocate", get(handle_allocate))
        .route("/allocated_ports", get(handle_allocated_ports))
        .route("/register", post(handle_register))
        .route("/registered_plugins", get(handle_registered_plugins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the allocator HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Plugin allocator listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Allocator server error: {}", e);
        }
    });

    Ok(actual_addr)
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn handle_allocate(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AllocateQuery>,
) -> Response {
    let Some(plugin) = query.plugin.filter(|p| !p.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            "missing required query parameter: plugin",
        )
            .into_response();
    };

    match state.allocator.allocate(&plugin) {
        Some(port) => {
            info!("Allocated port {} for plugin {}", port, plugin);
            Json(PortAssignment {
                port,
                ip: String::new(),
            })
            .into_response()
        }
        None => {
            warn!("No ports left for plugin {}", plugin);
            (StatusCode::SERVICE_UNAVAILABLE, "port range exhausted").into_response()
        }
    }
}

async fn handle_allocated_ports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ports.all())
}

async fn handle_register(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected registration: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid JSON").into_response();
        }
    };

    if request.plugin.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "missing required field: plugin").into_response();
    }

    info!(
        "Registered plugin {} ({}) at {}:{}",
        request.plugin, request.plugin_type, request.ip, request.port
    );
    state.plugins.add(request);
    StatusCode::OK.into_response()
}

async fn handle_registered_plugins(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.plugins.all())
}
