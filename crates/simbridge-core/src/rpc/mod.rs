//! Plugin RPC over TCP.
//!
//! Uses length-prefixed JSON frames: JSON-RPC 2.0 for unary calls, envelopes
//! after a connection is upgraded to a message stream.
//!
//! # Architecture
//!
//! - **Server**: runs in the plugin process, dispatches calls to a [`Plugin`](crate::Plugin)
//! - **Client**: the core side, for tests and host tooling
//! - **Protocol**: shared framing and JSON-RPC types used by both

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{CoreStream, PluginClient};
pub use protocol::{RpcRequest, RpcResponse};
pub use server::{PluginServer, PluginServerHandle};
