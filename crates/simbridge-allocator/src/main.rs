//! Simbridge allocator server.

use anyhow::Result;
use clap::Parser;
use simbridge_allocator::{start_server, AppState, InMemoryAllocator, PortRegistry};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "simbridge-allocator")]
#[command(about = "In-memory port allocator and plugin registrar")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "ALLOCATOR_PORT", default_value_t = 8080)]
    port: u16,

    /// First port handed out to plugins
    #[arg(long, env = "ALLOCATOR_BASE_PORT", default_value_t = 9100)]
    base_port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting simbridge allocator (base port {})", args.base_port);

    let ports = Arc::new(PortRegistry::new());
    let allocator = Arc::new(InMemoryAllocator::new(args.base_port, ports.clone()));
    let state = Arc::new(AppState::new(allocator, ports));

    let addr = start_server(state, &args.host, args.port).await?;
    info!("Allocator running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
