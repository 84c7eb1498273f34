//! Simbridge allocator - development stand-in for the simulator core's
//! endpoint allocation and registration API.
//!
//! Plugins call `GET /allocate?plugin=<name>` for a port, then report their
//! endpoint with `POST /register`. All state is held in memory.

pub mod server;
pub mod state;

pub use server::{router, start_server, AppState};
pub use state::{Allocator, InMemoryAllocator, PortRegistry, RegisteredPluginRegistry};
